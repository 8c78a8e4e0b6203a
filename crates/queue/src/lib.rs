//! `mailspool-queue` — the durable task queue over an abstract store.
//!
//! The [`Queue`] service owns the task lifecycle (enqueue, claim, complete,
//! fail). All cross-process coordination is pushed into the store's atomic
//! claim primitive; the queue itself holds no state between calls.

pub mod memory;
pub mod postgres;
pub mod queue;
pub mod store;

pub use memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;
pub use queue::{FailOutcome, Queue, QueueError};
pub use store::{QueueStats, StoreError, TaskStore};
