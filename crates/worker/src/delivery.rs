//! The delivery contract and per-kind message metadata.
//!
//! Delivery is an external collaborator: the queue only needs "turn a task
//! into a sent message or a descriptive error". The whole design leans on
//! at-least-once semantics -- a retried delivery after a failure must be
//! acceptable to the recipient, which implementations are expected to
//! honor (idempotent message content, not exactly-once transport).

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use mailspool_core::{Task, TaskKind};

/// Delivery failure description, routed into the queue's fail path.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("template render failed: {0}")]
    Template(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Turns a task's opaque payload into a sent message.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, task: &Task) -> Result<(), DeliveryError>;
}

/// Subject line and template name for one task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSpec {
    pub subject: &'static str,
    pub template: &'static str,
}

/// Message metadata per task kind.
///
/// Exhaustive by construction: adding a kind fails compilation here until
/// its subject and template are chosen.
pub fn message_spec(kind: TaskKind) -> MessageSpec {
    match kind {
        TaskKind::Verification => MessageSpec {
            subject: "Confirm your email address",
            template: "verification",
        },
        TaskKind::PasswordReset => MessageSpec {
            subject: "Reset your password",
            template: "password_reset",
        },
        TaskKind::Notification => MessageSpec {
            subject: "Notification",
            template: "notification",
        },
    }
}

/// Delivery that logs the would-be send and succeeds.
///
/// Used by the binary when no real transport is wired up, and handy in
/// local development to watch the queue drain.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelivery;

#[async_trait]
impl Delivery for NoopDelivery {
    async fn deliver(&self, task: &Task) -> Result<(), DeliveryError> {
        let spec = message_spec(task.kind);
        info!(
            task_id = %task.id,
            recipient = %task.recipient,
            subject = spec.subject,
            template = spec.template,
            "delivery skipped (no transport configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_message_spec() {
        for kind in [
            TaskKind::Verification,
            TaskKind::PasswordReset,
            TaskKind::Notification,
        ] {
            let spec = message_spec(kind);
            assert!(!spec.subject.is_empty());
            assert_eq!(spec.template, kind.as_str());
        }
    }
}
