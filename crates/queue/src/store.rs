//! The task store contract.
//!
//! Any store that can persist rows durably, atomically claim one eligible
//! row, and filter by status/timestamp can back the queue. The contract is
//! what makes running N independent worker processes safe: mutual exclusion
//! lives entirely in `claim_next`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use mailspool_core::{DomainError, NewTask, Task, TaskId};

/// Store-level error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A persisted row failed to decode (e.g. unknown kind text).
    #[error("corrupt task row {id}: {source}")]
    Corrupt {
        id: i64,
        #[source]
        source: DomainError,
    },

    /// Connectivity or query failure; no task state is assumed changed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// `last_error` text recorded when a stale claim is swept with no attempts
/// left, so the terminal row explains why it failed.
pub const STALE_CLAIM_ERROR: &str = "stale claim expired with no attempts remaining";

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Durable task storage with atomic claim semantics.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task and return its store-assigned id.
    async fn insert(&self, task: NewTask) -> Result<TaskId, StoreError>;

    /// Atomically claim the oldest eligible task: `Pending`, past its
    /// `next_eligible_at`, FIFO by creation time. The claimed task moves to
    /// `Processing` with `attempts` incremented, in one indivisible step
    /// with respect to concurrent callers. Rows locked by a concurrent
    /// claim are skipped, never waited on.
    ///
    /// `Ok(None)` means no work is available -- an expected steady state.
    async fn claim_next(&self) -> Result<Option<Task>, StoreError>;

    /// Terminal success: `Completed` + `processed_at`. No-op if the task is
    /// already terminal.
    async fn mark_completed(&self, id: TaskId) -> Result<(), StoreError>;

    /// Record a failure. `Some(retry_at)` returns the task to `Pending`,
    /// eligible again at that time; `None` is a permanent `Failed` with
    /// `processed_at` set. No-op if the task is already terminal.
    async fn mark_failed(
        &self,
        id: TaskId,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Fetch a task by id, for diagnostics and tests.
    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Per-status counts over the whole table.
    async fn stats(&self) -> Result<QueueStats, StoreError>;

    /// Visibility timeout: sweep `Processing` tasks whose `updated_at` is
    /// older than the cutoff. Tasks with attempts remaining return to
    /// `Pending` so work lost to a worker crash re-enters the eligible pool;
    /// tasks already at the ceiling go to `Failed` (the lost claim consumed
    /// the final attempt). Returns the number of swept tasks.
    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T: TaskStore + ?Sized> TaskStore for Arc<T> {
    async fn insert(&self, task: NewTask) -> Result<TaskId, StoreError> {
        (**self).insert(task).await
    }

    async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        (**self).claim_next().await
    }

    async fn mark_completed(&self, id: TaskId) -> Result<(), StoreError> {
        (**self).mark_completed(id).await
    }

    async fn mark_failed(
        &self,
        id: TaskId,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        (**self).mark_failed(id, error, retry_at).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        (**self).get(id).await
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        (**self).stats().await
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64, StoreError> {
        (**self).reclaim_stale(older_than).await
    }
}
