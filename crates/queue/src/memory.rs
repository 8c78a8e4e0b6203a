//! In-memory task store for tests and local development.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mailspool_core::{NewTask, Task, TaskId, TaskStatus};

use super::store::{QueueStats, StoreError, TaskStore, STALE_CLAIM_ERROR};

/// Mutex-guarded task map.
///
/// The mutex is the atomic-claim primitive: `claim_next` selects and
/// transitions a task under one lock acquisition, so concurrent claimers
/// observe the same mutual-exclusion contract a `FOR UPDATE SKIP LOCKED`
/// query provides.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    tasks: BTreeMap<TaskId, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: NewTask) -> Result<TaskId, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = TaskId(inner.next_id);
        let task = task.into_task(id, Utc::now());
        inner.tasks.insert(id, task);
        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();

        // Oldest eligible first; id breaks created_at ties.
        let candidate = inner
            .tasks
            .values()
            .filter(|t| t.is_eligible(now))
            .min_by_key(|t| (t.created_at, t.id))
            .map(|t| t.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let task = inner.tasks.get_mut(&id).unwrap();
        task.mark_processing(now);
        Ok(Some(task.clone()))
    }

    async fn mark_completed(&self, id: TaskId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        task.mark_completed(Utc::now());
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: TaskId,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let now = Utc::now();
        match retry_at {
            Some(at) => task.mark_failed_retrying(error, at, now),
            None => task.mark_failed_permanent(error, now),
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tasks.get(&id).cloned())
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut stats = QueueStats::default();
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        // An unrepresentable cutoff sweeps nothing rather than everything.
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut reclaimed = 0;
        for task in inner.tasks.values_mut() {
            if task.status == TaskStatus::Processing && task.updated_at < cutoff {
                // The lost claim already consumed an attempt; a task at the
                // ceiling has nothing left to retry with.
                if task.attempts_exhausted() {
                    task.mark_failed_permanent(STALE_CLAIM_ERROR, now);
                } else {
                    task.mark_reclaimed(now);
                }
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use mailspool_core::TaskKind;

    use super::*;

    fn new_task(recipient: &str) -> NewTask {
        NewTask {
            kind: TaskKind::Verification,
            recipient: recipient.to_string(),
            owner: None,
            payload: serde_json::json!({}),
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn insert_and_claim() {
        let store = InMemoryTaskStore::new();
        let id = store.insert(new_task("a@example.com")).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, TaskStatus::Processing);
        assert_eq!(claimed.attempts, 1);

        // Claimed task is invisible to further claims.
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fifo_among_eligible() {
        let store = InMemoryTaskStore::new();
        let first = store.insert(new_task("first@example.com")).await.unwrap();
        let second = store.insert(new_task("second@example.com")).await.unwrap();

        assert_eq!(store.claim_next().await.unwrap().unwrap().id, first);
        assert_eq!(store.claim_next().await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn backoff_delay_gates_eligibility() {
        let store = InMemoryTaskStore::new();
        let id = store.insert(new_task("a@example.com")).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        let retry_at = Utc::now() + chrono::Duration::minutes(1);
        store
            .mark_failed(id, "smtp timeout", Some(retry_at))
            .await
            .unwrap();

        // Not eligible until the retry time passes.
        assert!(store.claim_next().await.unwrap().is_none());

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.next_eligible_at, retry_at);
        assert_eq!(task.last_error.as_deref(), Some("smtp timeout"));
    }

    #[tokio::test]
    async fn terminal_tasks_are_never_claimed_again() {
        let store = InMemoryTaskStore::new();
        let completed = store.insert(new_task("a@example.com")).await.unwrap();
        let failed = store.insert(new_task("b@example.com")).await.unwrap();

        store.claim_next().await.unwrap();
        store.mark_completed(completed).await.unwrap();
        store.claim_next().await.unwrap();
        store.mark_failed(failed, "bounced", None).await.unwrap();

        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let store = InMemoryTaskStore::new();
        let id = store.insert(new_task("a@example.com")).await.unwrap();
        store.claim_next().await.unwrap();

        store.mark_completed(id).await.unwrap();
        let first = store.get(id).await.unwrap().unwrap();

        store.mark_completed(id).await.unwrap();
        let second = store.get(id).await.unwrap().unwrap();

        assert_eq!(second.status, TaskStatus::Completed);
        assert_eq!(second.processed_at, first.processed_at);
    }

    #[tokio::test]
    async fn concurrent_claims_never_hand_out_the_same_task() {
        let store = Arc::new(InMemoryTaskStore::new());
        for i in 0..50 {
            store
                .insert(new_task(&format!("user{i}@example.com")))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(task) = store.claim_next().await.unwrap() {
                    claimed.push(task.id);
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(id), "task {id} claimed twice");
            }
        }
        assert_eq!(total, 50);
    }

    #[tokio::test]
    async fn two_claimers_one_task() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.insert(new_task("only@example.com")).await.unwrap();

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.claim_next().await.unwrap() }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.claim_next().await.unwrap() }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a.is_some() != b.is_some(), "exactly one claim must succeed");
    }

    #[tokio::test]
    async fn stale_processing_tasks_are_reclaimed() {
        let store = InMemoryTaskStore::new();
        let id = store.insert(new_task("a@example.com")).await.unwrap();
        store.claim_next().await.unwrap();

        // Zero cutoff treats any Processing task as stale.
        let reclaimed = store.reclaim_stale(Duration::ZERO).await.unwrap();
        assert_eq!(reclaimed, 1);

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        // The claim attempt still counts toward the ceiling.
        assert_eq!(task.attempts, 1);

        // Fresh claims are not reclaimed under a generous cutoff.
        store.claim_next().await.unwrap().unwrap();
        let reclaimed = store.reclaim_stale(Duration::from_secs(600)).await.unwrap();
        assert_eq!(reclaimed, 0);
    }

    #[tokio::test]
    async fn reclaim_fails_tasks_with_no_attempts_left() {
        let store = InMemoryTaskStore::new();
        let id = store
            .insert(NewTask {
                max_attempts: 1,
                ..new_task("a@example.com")
            })
            .await
            .unwrap();
        store.claim_next().await.unwrap().unwrap();

        // The stale claim consumed the only attempt, so the sweep must not
        // hand the task out again.
        let reclaimed = store.reclaim_stale(Duration::ZERO).await.unwrap();
        assert_eq!(reclaimed, 1);
        assert!(store.claim_next().await.unwrap().is_none());

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 1);
        assert!(task.processed_at.is_some());
        assert!(task.last_error.is_some());
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let store = InMemoryTaskStore::new();
        for i in 0..4 {
            store
                .insert(new_task(&format!("user{i}@example.com")))
                .await
                .unwrap();
        }

        let a = store.claim_next().await.unwrap().unwrap();
        let b = store.claim_next().await.unwrap().unwrap();
        store.mark_completed(a.id).await.unwrap();
        store.mark_failed(b.id, "bounced", None).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
    }
}
