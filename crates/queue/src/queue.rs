//! The queue service: task lifecycle over an abstract store.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use mailspool_core::{BackoffPolicy, NewTask, OwnerId, Task, TaskId, TaskKind};

use super::store::{QueueStats, StoreError, TaskStore};

/// Default attempt ceiling for enqueued tasks.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Queue-level error.
///
/// Enqueue is fire-and-forget for the producer: only serialization and
/// store connectivity surface synchronously. Delivery failures never reach
/// the enqueuing caller.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid task: {0}")]
    Validation(String),
}

/// Which branch `fail` took, so callers can log the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The task re-enters the eligible pool at the given time.
    Retrying { at: chrono::DateTime<Utc> },
    /// `max_attempts` reached; the task is permanently `Failed`.
    Exhausted,
}

/// Owns the task lifecycle: enqueue, claim, complete, fail.
///
/// Pure logic over the [`TaskStore`] contract; the store handle is passed
/// in explicitly, so tests substitute an in-memory store that honors the
/// same atomic-claim semantics. The queue holds no state between calls --
/// all coordination lives in the store's claim primitive.
#[derive(Debug, Clone)]
pub struct Queue<S> {
    store: S,
    backoff: BackoffPolicy,
    default_max_attempts: i32,
}

impl<S: TaskStore> Queue<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            backoff: BackoffPolicy::default(),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    /// Insert a new `Pending` task, eligible immediately.
    ///
    /// The payload is serialized to its opaque blob form here; the queue
    /// never inspects it again. Callers needing atomicity with their own
    /// writes wrap this in their unit of work; the queue does not require a
    /// surrounding transaction to succeed.
    pub async fn enqueue<P: Serialize>(
        &self,
        kind: TaskKind,
        recipient: impl Into<String>,
        owner: Option<OwnerId>,
        payload: &P,
    ) -> Result<TaskId, QueueError> {
        let recipient = recipient.into();
        if recipient.trim().is_empty() {
            return Err(QueueError::Validation("recipient must not be empty".into()));
        }
        let payload = serde_json::to_value(payload)?;

        let id = self
            .store
            .insert(NewTask {
                kind,
                recipient,
                owner,
                payload,
                max_attempts: self.default_max_attempts,
            })
            .await?;
        debug!(task_id = %id, kind = %kind, "task enqueued");
        Ok(id)
    }

    /// Claim the next eligible task, if any. `Ok(None)` is the expected
    /// steady state when the backlog is empty.
    pub async fn claim_next(&self) -> Result<Option<Task>, QueueError> {
        Ok(self.store.claim_next().await?)
    }

    /// Mark a delivered task `Completed`. Idempotent on terminal tasks.
    pub async fn complete(&self, task: &Task) -> Result<(), QueueError> {
        Ok(self.store.mark_completed(task.id).await?)
    }

    /// Record a delivery failure, branching on the attempt ceiling:
    /// below it the task re-enters `Pending` with an exponential-backoff
    /// eligibility time, at or above it the task fails permanently.
    pub async fn fail(&self, task: &Task, error: &str) -> Result<FailOutcome, QueueError> {
        if task.attempts_exhausted() {
            self.store.mark_failed(task.id, error, None).await?;
            return Ok(FailOutcome::Exhausted);
        }
        // A delay too large to represent saturates at "never", not "now".
        let delay = chrono::Duration::from_std(self.backoff.delay(task.attempts))
            .unwrap_or(chrono::Duration::MAX);
        let at = Utc::now()
            .checked_add_signed(delay)
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
        self.store.mark_failed(task.id, error, Some(at)).await?;
        Ok(FailOutcome::Retrying { at })
    }

    /// Sweep stale `Processing` tasks (visibility timeout for workers that
    /// died mid-claim): back to the eligible pool with attempts remaining,
    /// permanently `Failed` otherwise.
    pub async fn reclaim_stale(&self, older_than: Duration) -> Result<u64, QueueError> {
        Ok(self.store.reclaim_stale(older_than).await?)
    }

    /// Per-status counts, for observability.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(self.store.stats().await?)
    }

    /// Fetch a task by id, for diagnostics and tests.
    pub async fn get(&self, id: TaskId) -> Result<Option<Task>, QueueError> {
        Ok(self.store.get(id).await?)
    }
}
