//! `mailspool-core` — domain foundation for the email task queue.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the task model, its lifecycle transitions, and the retry backoff policy.

pub mod backoff;
pub mod error;
pub mod task;

pub use backoff::BackoffPolicy;
pub use error::{DomainError, DomainResult};
pub use task::{NewTask, OwnerId, Task, TaskId, TaskKind, TaskStatus};
