use super::model::MutationPatch;
use crate::model::{MutationRecord, MutationStatus, NewMutation, Operation};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

pub type Pool = SqlitePool;

const SELECT_COLUMNS: &str =
    "SELECT id, timestamp, resource, operation, payload, status, retry_count, last_error FROM mutation_queue";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let mut options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid queue database url {normalized}"))?
        .create_if_missing(true)
        .synchronous(SqliteSynchronous::Full);
    if !normalized.starts_with("sqlite::memory") {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to open queue database")?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure the parent
/// directory exists. In-memory and non-sqlite URLs pass through unchanged.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn row_to_record(row: &SqliteRow) -> Result<MutationRecord> {
    let id: String = row.try_get("id")?;
    let ts: i64 = row.try_get("timestamp")?;
    let operation: String = row.try_get("operation")?;
    let status: String = row.try_get("status")?;
    let payload: String = row.try_get("payload")?;

    Ok(MutationRecord {
        timestamp: DateTime::<Utc>::from_timestamp_millis(ts)
            .ok_or_else(|| anyhow!("mutation {} has out-of-range timestamp {}", id, ts))?,
        resource: row.try_get("resource")?,
        operation: Operation::parse_operation(&operation)
            .ok_or_else(|| anyhow!("mutation {} has unknown operation {}", id, operation))?,
        payload: serde_json::from_str(&payload)
            .with_context(|| format!("mutation {} has corrupt payload", id))?,
        status: MutationStatus::parse_status(&status)
            .ok_or_else(|| anyhow!("mutation {} has unknown status {}", id, status))?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        id,
    })
}

/// Durably append a mutation. The id is always freshly generated and the
/// record starts as `Pending` with no retries.
#[instrument(skip_all)]
pub async fn enqueue_mutation(pool: &Pool, mutation: &NewMutation) -> Result<MutationRecord> {
    let id = Uuid::new_v4().to_string();
    let payload =
        serde_json::to_string(&mutation.payload).context("failed to serialize mutation payload")?;

    // Clamp to the newest queued timestamp so a wall clock stepping backwards
    // cannot reorder replay. Same-millisecond ties fall back to rowid.
    let ts: i64 = sqlx::query_scalar(
        "INSERT INTO mutation_queue (id, timestamp, resource, operation, payload, status, retry_count) \
         VALUES (?, MAX(?, COALESCE((SELECT MAX(timestamp) FROM mutation_queue), 0)), ?, ?, ?, ?, 0) \
         RETURNING timestamp",
    )
    .bind(&id)
    .bind(Utc::now().timestamp_millis())
    .bind(&mutation.resource)
    .bind(mutation.operation.as_str())
    .bind(&payload)
    .bind(MutationStatus::Pending.as_str())
    .fetch_one(pool)
    .await
    .context("failed to persist queued mutation")?;

    debug!(%id, resource = %mutation.resource, operation = %mutation.operation, "mutation enqueued");

    Ok(MutationRecord {
        timestamp: DateTime::<Utc>::from_timestamp_millis(ts)
            .ok_or_else(|| anyhow!("mutation {} has out-of-range timestamp {}", id, ts))?,
        resource: mutation.resource.clone(),
        operation: mutation.operation,
        payload: mutation.payload.clone(),
        status: MutationStatus::Pending,
        retry_count: 0,
        last_error: None,
        id,
    })
}

/// Snapshot of every queued mutation in replay order.
#[instrument(skip_all)]
pub async fn list_mutations(pool: &Pool) -> Result<Vec<MutationRecord>> {
    let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY timestamp ASC, rowid ASC"))
        .fetch_all(pool)
        .await
        .context("failed to read mutation queue")?;
    rows.iter().map(row_to_record).collect()
}

#[instrument(skip_all)]
pub async fn get_mutation(pool: &Pool, id: &str) -> Result<Option<MutationRecord>> {
    let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to read mutation")?;
    row.as_ref().map(row_to_record).transpose()
}

/// Delete a mutation. Unknown ids are a no-op; returns whether a row went away.
#[instrument(skip_all)]
pub async fn remove_mutation(pool: &Pool, id: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM mutation_queue WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to remove mutation")?;
    Ok(res.rows_affected() > 0)
}

/// Merge `patch` into the row for `id` in one statement. Unknown ids are a
/// no-op; returns whether a row was touched.
#[instrument(skip_all)]
pub async fn patch_mutation(pool: &Pool, id: &str, patch: &MutationPatch) -> Result<bool> {
    if patch.is_empty() {
        return Ok(false);
    }
    let res = sqlx::query(
        "UPDATE mutation_queue SET \
            status = COALESCE(?, status), \
            last_error = COALESCE(?, last_error), \
            retry_count = COALESCE(?, retry_count) \
         WHERE id = ?",
    )
    .bind(patch.status.map(|s| s.as_str()))
    .bind(patch.last_error.as_deref())
    .bind(patch.retry_count)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update mutation")?;
    Ok(res.rows_affected() > 0)
}

/// Drop every queued mutation. Administrative use only.
#[instrument(skip_all)]
pub async fn clear_mutations(pool: &Pool) -> Result<u64> {
    let res = sqlx::query("DELETE FROM mutation_queue")
        .execute(pool)
        .await
        .context("failed to clear mutation queue")?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn count_mutations(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mutation_queue")
        .fetch_one(pool)
        .await
        .context("failed to count queued mutations")?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn count_mutations_by_status(pool: &Pool, status: MutationStatus) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mutation_queue WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to count {} mutations", status.as_str()))?;
    Ok(count)
}
