//! The polling worker loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use mailspool_queue::{FailOutcome, Queue, TaskStore};

use super::config::WorkerConfig;
use super::delivery::Delivery;

// A zero interval would busy-spin against the store.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Counters accumulated over one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    /// Tasks claimed and handed to delivery.
    pub processed: u64,
    pub succeeded: u64,
    /// Failures that re-entered the pending pool.
    pub retried: u64,
    /// Failures that exhausted `max_attempts`.
    pub exhausted: u64,
    /// Stale `Processing` tasks returned to the pool by the reclaim sweep.
    pub reclaimed: u64,
}

/// Requests a graceful drain of a running worker.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<Notify>);

impl ShutdownHandle {
    /// Ask the worker to stop claiming and exit once any in-flight task
    /// has resolved. Safe to call before or during a run.
    pub fn drain(&self) {
        self.0.notify_one();
    }
}

/// Polling worker: two states, Running and Draining.
///
/// Running claims at most one task per poll tick and awaits its delivery to
/// completion -- the claim/deliver/record sequence is never interrupted by
/// shutdown. Draining begins when the shutdown handle fires: no new claims,
/// exit after the in-flight task (if any) resolves. One task per tick is a
/// deliberate trade: it bounds delivery-provider load per process, and
/// throughput scales by running more worker processes, which the store's
/// claim mutual exclusion makes safe.
pub struct Worker<S, D> {
    queue: Queue<S>,
    delivery: D,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl<S: TaskStore, D: Delivery> Worker<S, D> {
    pub fn new(queue: Queue<S>, delivery: D, config: WorkerConfig) -> Self {
        Self {
            queue,
            delivery,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Run until drained. Store errors are logged and the loop continues on
    /// the next tick; transient outages are retried by timer cadence, not
    /// by spinning.
    pub async fn run(self) -> WorkerStats {
        info!(
            worker = %self.config.name,
            poll_interval_secs = self.config.poll_interval_secs,
            "worker started"
        );

        let mut stats = WorkerStats::default();
        let mut poll = tokio::time::interval(self.config.poll_interval().max(MIN_TICK));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reclaim = tokio::time::interval(self.config.reclaim_interval().max(MIN_TICK));
        reclaim.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Check the drain signal before claiming anything new.
                biased;
                _ = self.shutdown.notified() => {
                    info!(worker = %self.config.name, "drain requested, no new claims");
                    break;
                }
                _ = poll.tick() => {
                    self.process_one(&mut stats).await;
                }
                _ = reclaim.tick() => {
                    self.reclaim_stale(&mut stats).await;
                }
            }
        }

        info!(
            worker = %self.config.name,
            processed = stats.processed,
            succeeded = stats.succeeded,
            retried = stats.retried,
            exhausted = stats.exhausted,
            "worker stopped"
        );
        stats
    }

    /// Claim and resolve at most one task. A delivery error is routed into
    /// the fail path, never dropped and never fatal to the loop.
    async fn process_one(&self, stats: &mut WorkerStats) {
        let task = match self.queue.claim_next().await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                error!(worker = %self.config.name, error = %e, "claim failed");
                return;
            }
        };

        debug!(
            task_id = %task.id,
            kind = %task.kind,
            recipient = %task.recipient,
            attempt = task.attempts,
            "claimed task"
        );
        stats.processed += 1;

        match self.delivery.deliver(&task).await {
            Ok(()) => {
                if let Err(e) = self.queue.complete(&task).await {
                    error!(task_id = %task.id, error = %e, "failed to record completion");
                    return;
                }
                stats.succeeded += 1;
                info!(task_id = %task.id, kind = %task.kind, "task delivered");
            }
            Err(delivery_err) => {
                warn!(
                    task_id = %task.id,
                    error = %delivery_err,
                    attempt = task.attempts,
                    max_attempts = task.max_attempts,
                    "delivery failed"
                );
                match self.queue.fail(&task, &delivery_err.to_string()).await {
                    Ok(FailOutcome::Retrying { at }) => {
                        stats.retried += 1;
                        info!(task_id = %task.id, next_eligible_at = %at, "task scheduled for retry");
                    }
                    Ok(FailOutcome::Exhausted) => {
                        stats.exhausted += 1;
                        warn!(task_id = %task.id, attempts = task.attempts, "task permanently failed");
                    }
                    Err(e) => {
                        error!(task_id = %task.id, error = %e, "failed to record failure");
                    }
                }
            }
        }
    }

    /// Return tasks abandoned mid-claim by a dead worker to the pool.
    async fn reclaim_stale(&self, stats: &mut WorkerStats) {
        match self.queue.reclaim_stale(self.config.stale_after()).await {
            Ok(0) => {}
            Ok(n) => {
                stats.reclaimed += n;
                warn!(worker = %self.config.name, reclaimed = n, "reclaimed stale processing tasks");
            }
            Err(e) => {
                error!(worker = %self.config.name, error = %e, "stale-task reclaim failed");
            }
        }
    }
}
