//! Postgres-backed task store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` inside a transaction: the oldest
//! eligible row is locked and transitioned to `processing` in one unit, and
//! rows already locked by a concurrent claimer are skipped rather than
//! waited on. That primitive is what lets N independent worker processes
//! share one backlog without double-processing or serializing on lock waits.
//!
//! SQLx errors all map to [`StoreError::Unavailable`] except row decoding,
//! which maps to [`StoreError::Corrupt`] (unknown kind/status text means the
//! row, not the connection, is bad).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use mailspool_core::{NewTask, Task, TaskId};

use super::store::{QueueStats, StoreError, TaskStore, STALE_CLAIM_ERROR};

const TASK_COLUMNS: &str = "id, kind, recipient, owner_id, payload, attempts, max_attempts, \
     status, last_error, created_at, updated_at, processed_at, next_eligible_at";

/// Table schema, applied by [`PostgresTaskStore::migrate`].
///
/// The composite index backs the claim query's filter and sort.
const SCHEMA_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS email_tasks (
    id               BIGSERIAL PRIMARY KEY,
    kind             TEXT NOT NULL,
    recipient        TEXT NOT NULL,
    owner_id         BIGINT,
    payload          JSONB NOT NULL,
    attempts         INTEGER NOT NULL DEFAULT 0,
    max_attempts     INTEGER NOT NULL DEFAULT 3,
    status           TEXT NOT NULL DEFAULT 'pending',
    last_error       TEXT,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    processed_at     TIMESTAMPTZ,
    next_eligible_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const SCHEMA_INDEX: &str = "\
CREATE INDEX IF NOT EXISTS email_tasks_claim_idx
    ON email_tasks (status, next_eligible_at, created_at)";

/// Postgres-backed task store.
///
/// Uses the SQLx connection pool, so the store is `Send + Sync` and can be
/// shared across tasks; all claim-path operations run in transactions.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the table schema. Idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        sqlx::query(SCHEMA_INDEX)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Whether a row with this id exists at all (used to distinguish
    /// "already terminal" no-ops from genuinely missing tasks).
    async fn exists(&self, id: TaskId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM email_tasks WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("exists", e))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self, task), fields(kind = %task.kind), err)]
    async fn insert(&self, task: NewTask) -> Result<TaskId, StoreError> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO email_tasks \
                 (kind, recipient, owner_id, payload, attempts, max_attempts, status, \
                  created_at, updated_at, next_eligible_at) \
             VALUES ($1, $2, $3, $4, 0, $5, 'pending', $6, $6, $6) \
             RETURNING id",
        )
        .bind(task.kind.as_str())
        .bind(&task.recipient)
        .bind(task.owner.map(|o| o.0))
        .bind(&task.payload)
        .bind(task.max_attempts)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("insert", e))?;
        Ok(TaskId(id))
    }

    #[instrument(skip(self), err)]
    async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("claim_next/begin", e))?;

        let row = sqlx::query(
            "SELECT id FROM email_tasks \
             WHERE status = 'pending' AND next_eligible_at <= $1 \
             ORDER BY created_at ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_next/select", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("claim_next/rollback", e))?;
            return Ok(None);
        };
        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("claim_next/select", e))?;

        let row = sqlx::query(&format!(
            "UPDATE email_tasks \
             SET status = 'processing', attempts = attempts + 1, updated_at = $2 \
             WHERE id = $1 \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_next/update", e))?;

        let task = decode_task(&row)?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("claim_next/commit", e))?;
        Ok(Some(task))
    }

    async fn mark_completed(&self, id: TaskId) -> Result<(), StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE email_tasks \
             SET status = 'completed', processed_at = $2, updated_at = $2 \
             WHERE id = $1 AND status NOT IN ('completed', 'failed')",
        )
        .bind(id.0)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_completed", e))?;

        // Zero rows means either an idempotent no-op on a terminal task or
        // a missing row; only the latter is an error.
        if result.rows_affected() == 0 && !self.exists(id).await? {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: TaskId,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let result = match retry_at {
            Some(at) => {
                sqlx::query(
                    "UPDATE email_tasks \
                     SET status = 'pending', last_error = $2, next_eligible_at = $3, \
                         updated_at = $4 \
                     WHERE id = $1 AND status NOT IN ('completed', 'failed')",
                )
                .bind(id.0)
                .bind(error)
                .bind(at)
                .bind(now)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "UPDATE email_tasks \
                     SET status = 'failed', last_error = $2, processed_at = $3, \
                         updated_at = $3 \
                     WHERE id = $1 AND status NOT IN ('completed', 'failed')",
                )
                .bind(id.0)
                .bind(error)
                .bind(now)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("mark_failed", e))?;

        if result.rows_affected() == 0 && !self.exists(id).await? {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM email_tasks WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(decode_task).transpose()
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM email_tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("stats", e))?;
            let n = n.max(0) as u64;
            match status.as_str() {
                "pending" => stats.pending = n,
                "processing" => stats.processing = n,
                "completed" => stats.completed = n,
                "failed" => stats.failed = n,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64, StoreError> {
        let now = Utc::now();
        // An unrepresentable cutoff sweeps nothing rather than everything.
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        // Tasks at the attempt ceiling fail terminally: the lost claim
        // consumed the final attempt, so they must not be handed out again.
        let result = sqlx::query(
            "UPDATE email_tasks \
             SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END, \
                 last_error = CASE WHEN attempts >= max_attempts THEN $3 ELSE last_error END, \
                 processed_at = CASE WHEN attempts >= max_attempts THEN $2 ELSE processed_at END, \
                 updated_at = $2 \
             WHERE status = 'processing' AND updated_at < $1",
        )
        .bind(cutoff)
        .bind(now)
        .bind(STALE_CLAIM_ERROR)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reclaim_stale", e))?;
        Ok(result.rows_affected())
    }
}

fn decode_task(row: &PgRow) -> Result<Task, StoreError> {
    let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("decode", e))?;
    let kind_text: String = row.try_get("kind").map_err(|e| map_sqlx_error("decode", e))?;
    let status_text: String = row
        .try_get("status")
        .map_err(|e| map_sqlx_error("decode", e))?;

    let kind = kind_text
        .parse()
        .map_err(|source| StoreError::Corrupt { id, source })?;
    let status = status_text
        .parse()
        .map_err(|source| StoreError::Corrupt { id, source })?;

    Ok(Task {
        id: TaskId(id),
        kind,
        recipient: row
            .try_get("recipient")
            .map_err(|e| map_sqlx_error("decode", e))?,
        owner: row
            .try_get::<Option<i64>, _>("owner_id")
            .map_err(|e| map_sqlx_error("decode", e))?
            .map(mailspool_core::OwnerId),
        payload: row
            .try_get("payload")
            .map_err(|e| map_sqlx_error("decode", e))?,
        attempts: row
            .try_get("attempts")
            .map_err(|e| map_sqlx_error("decode", e))?,
        max_attempts: row
            .try_get("max_attempts")
            .map_err(|e| map_sqlx_error("decode", e))?,
        status,
        last_error: row
            .try_get("last_error")
            .map_err(|e| map_sqlx_error("decode", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("decode", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| map_sqlx_error("decode", e))?,
        processed_at: row
            .try_get("processed_at")
            .map_err(|e| map_sqlx_error("decode", e))?,
        next_eligible_at: row
            .try_get("next_eligible_at")
            .map_err(|e| map_sqlx_error("decode", e))?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(format!("{operation}: {err}"))
}
