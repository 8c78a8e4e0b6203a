//! `mailspool-worker` — the polling delivery loop.
//!
//! A worker drives the queue on a fixed cadence: claim one task per tick,
//! hand it to the injected [`Delivery`] collaborator, and route the outcome
//! back into complete/fail. Multiple worker processes can run against one
//! store; the store's atomic claim keeps them from double-processing.

pub mod config;
pub mod delivery;
pub mod worker;

pub use config::WorkerConfig;
pub use delivery::{Delivery, DeliveryError, MessageSpec, NoopDelivery};
pub use worker::{ShutdownHandle, Worker, WorkerStats};
