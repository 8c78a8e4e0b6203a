//! The task model and its lifecycle.
//!
//! A [`Task`] is one unit of asynchronous email work. It is created by a
//! producer, claimed by exactly one worker at a time, and eventually lands
//! in a terminal state (`Completed` or `Failed`). All mutation goes through
//! the transition helpers here so the lifecycle invariants live in one place.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Unique task identifier, assigned monotonically by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the principal a task originated from (e.g. a user id).
///
/// Optional on a task: not all emails are principal-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task kind, selecting which message template/behavior applies.
///
/// Closed set known at compile time. Matches on this enum are exhaustive;
/// adding a kind is a compile-time concern, not a runtime lookup miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Verification,
    PasswordReset,
    Notification,
}

impl TaskKind {
    /// Stable text form used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Verification => "verification",
            TaskKind::PasswordReset => "password_reset",
            TaskKind::Notification => "notification",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verification" => Ok(TaskKind::Verification),
            "password_reset" => Ok(TaskKind::PasswordReset),
            "notification" => Ok(TaskKind::Notification),
            other => Err(DomainError::UnknownKind(other.to_string())),
        }
    }
}

/// Task execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed (eligible once `next_eligible_at` passes).
    Pending,
    /// Claimed by exactly one worker; transient.
    Processing,
    /// Delivered successfully.
    Completed,
    /// Exhausted `max_attempts`; permanently failed.
    Failed,
}

impl TaskStatus {
    /// Terminal states are never claimed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Stable text form used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Insert shape for a new task: everything except the store-assigned fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub kind: TaskKind,
    pub recipient: String,
    pub owner: Option<OwnerId>,
    /// Opaque serialized payload; the queue never inspects it.
    pub payload: serde_json::Value,
    pub max_attempts: i32,
}

/// One unit of asynchronous email work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Destination identifier; opaque to the queue.
    pub recipient: String,
    pub owner: Option<OwnerId>,
    /// Opaque serialized payload for the chosen kind.
    pub payload: serde_json::Value,
    /// Claim attempts made so far; incremented atomically on each claim.
    pub attempts: i32,
    /// Ceiling above which the task fails permanently.
    pub max_attempts: i32,
    pub status: TaskStatus,
    /// Last failure description; retained across retries for diagnostics.
    pub last_error: Option<String>,
    /// Set once at enqueue time, immutable.
    pub created_at: DateTime<Utc>,
    /// Touched on every transition; drives stale-claim reclamation.
    pub updated_at: DateTime<Utc>,
    /// Set exactly once, on the transition into a terminal state.
    pub processed_at: Option<DateTime<Utc>>,
    /// Earliest claimable time; only meaningful while `Pending`.
    pub next_eligible_at: DateTime<Utc>,
}

impl NewTask {
    /// Materialize the task the store will persist.
    pub fn into_task(self, id: TaskId, now: DateTime<Utc>) -> Task {
        Task {
            id,
            kind: self.kind,
            recipient: self.recipient,
            owner: self.owner,
            payload: self.payload,
            attempts: 0,
            max_attempts: self.max_attempts,
            status: TaskStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            next_eligible_at: now,
        }
    }
}

impl Task {
    /// Whether the task can be claimed right now.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_eligible_at <= now
    }

    /// Whether the attempt ceiling has been reached.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Transition into `Processing`, counting the claim attempt.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        debug_assert!(!self.status.is_terminal());
        self.status = TaskStatus::Processing;
        self.attempts += 1;
        self.updated_at = now;
    }

    /// Transition into `Completed`. No-op if already terminal, so a repeated
    /// completion never overwrites `processed_at`.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Completed;
        self.processed_at = Some(now);
        self.updated_at = now;
    }

    /// Record a retriable failure: back to `Pending`, eligible again at
    /// `retry_at`. No-op if already terminal.
    pub fn mark_failed_retrying(
        &mut self,
        error: impl Into<String>,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Pending;
        self.last_error = Some(error.into());
        self.next_eligible_at = retry_at;
        self.updated_at = now;
    }

    /// Record a permanent failure. No-op if already terminal.
    pub fn mark_failed_permanent(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.into());
        self.processed_at = Some(now);
        self.updated_at = now;
    }

    /// Return a stuck `Processing` task to the eligible pool.
    ///
    /// The attempt counted at claim time stands, so a task stuck in a
    /// crash loop still exhausts `max_attempts`.
    pub fn mark_reclaimed(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.status, TaskStatus::Processing);
        self.status = TaskStatus::Pending;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: DateTime<Utc>) -> Task {
        NewTask {
            kind: TaskKind::Verification,
            recipient: "user@example.com".to_string(),
            owner: Some(OwnerId(7)),
            payload: serde_json::json!({"code": "123456"}),
            max_attempts: 3,
        }
        .into_task(TaskId(1), now)
    }

    #[test]
    fn new_task_starts_pending_and_eligible() {
        let now = Utc::now();
        let task = sample(now);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert!(task.is_eligible(now));
        assert!(task.processed_at.is_none());
    }

    #[test]
    fn claim_counts_attempt() {
        let now = Utc::now();
        let mut task = sample(now);

        task.mark_processing(now);
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.attempts, 1);
        assert!(!task.is_eligible(now));
    }

    #[test]
    fn completion_is_idempotent() {
        let now = Utc::now();
        let mut task = sample(now);
        task.mark_processing(now);
        task.mark_completed(now);

        let first_processed_at = task.processed_at;
        let later = now + chrono::Duration::seconds(10);
        task.mark_completed(later);

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.processed_at, first_processed_at);
    }

    #[test]
    fn retriable_failure_reenters_pending_with_delay() {
        let now = Utc::now();
        let mut task = sample(now);
        task.mark_processing(now);

        let retry_at = now + chrono::Duration::minutes(1);
        task.mark_failed_retrying("smtp timeout", retry_at, now);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.last_error.as_deref(), Some("smtp timeout"));
        assert!(!task.is_eligible(now));
        assert!(task.is_eligible(retry_at));
    }

    #[test]
    fn permanent_failure_is_terminal() {
        let now = Utc::now();
        let mut task = sample(now);
        task.mark_processing(now);
        task.mark_failed_permanent("mailbox does not exist", now);

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.processed_at.is_some());

        // Terminal state sticks through further transition calls.
        task.mark_failed_retrying("late error", now, now);
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn kind_text_roundtrip() {
        for kind in [
            TaskKind::Verification,
            TaskKind::PasswordReset,
            TaskKind::Notification,
        ] {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_text_is_an_error() {
        let err = "newsletter".parse::<TaskKind>().unwrap_err();
        assert_eq!(err, DomainError::UnknownKind("newsletter".to_string()));
    }

    #[test]
    fn status_text_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("stuck".parse::<TaskStatus>().is_err());
    }
}
