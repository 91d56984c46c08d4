// tierrestore/src/ledger/mod.rs
//! Durable record of one restore request: which paths remain pending and which are done.
//!
//! Rows live in a single SQLite table. A row is deleted by the same update that empties
//! its pending list, so a missing row means the request is fully processed.

use chrono::{SecondsFormat, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::LedgerError;
use crate::notify::{StatusEvent, StatusReporter};

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS restore_requests (
        request_id TEXT PRIMARY KEY,
        bucket_paths TEXT,
        ttl INTEGER,
        processed_paths TEXT,
        created_at TEXT,
        updated_at TEXT
    )
"#;

type RequestRow = (String, String, i64, String, String, String);

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub request_id: String,
    pub pending_paths: Vec<String>,
    pub processed_paths: Vec<String>,
    pub ttl_days: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<RequestRow> for RestoreRequest {
    type Error = LedgerError;

    fn try_from(row: RequestRow) -> LedgerResult<Self> {
        let (request_id, pending, ttl_days, processed, created_at, updated_at) = row;
        Ok(RestoreRequest {
            request_id,
            pending_paths: serde_json::from_str(&pending)?,
            processed_paths: serde_json::from_str(&processed)?,
            ttl_days,
            created_at,
            updated_at,
        })
    }
}

/// 128 random bits from the OS generator, hex encoded.
pub fn generate_request_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub struct Ledger {
    pool: Pool<Sqlite>,
    reporter: Arc<StatusReporter>,
    // One mutation path per request id; distinct requests never contend here.
    request_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Ledger {
    /// Opens (creating if needed) the ledger database at `path`.
    pub async fn open(path: &Path, reporter: Arc<StatusReporter>) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let ledger = Ledger {
            pool,
            reporter,
            request_locks: std::sync::Mutex::new(HashMap::new()),
        };
        ledger.ensure_schema().await?;
        tracing::debug!(path = %path.display(), "Opened restore ledger");
        Ok(ledger)
    }

    async fn ensure_schema(&self) -> LedgerResult<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    fn request_lock(&self, request_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .request_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(request_id.to_string()).or_default().clone()
    }

    /// Drops the map entry once no other caller holds or waits on the lock.
    fn release_request_lock(&self, request_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .request_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(request_id);
        }
    }

    /// Provisions the table if absent and inserts a new request row.
    ///
    /// Fails with [`LedgerError::AlreadyExists`] when the id is taken and with
    /// [`LedgerError::NoPaths`] when `paths` is empty.
    pub async fn create(&self, request_id: &str, paths: &[String], ttl_days: i64) -> LedgerResult<()> {
        if paths.is_empty() {
            return Err(LedgerError::NoPaths(request_id.to_string()));
        }
        self.ensure_schema().await?;

        let pending_json = serde_json::to_string(paths)?;
        let processed_json = serde_json::to_string(&Vec::<String>::new())?;
        let created_at = now_rfc3339();

        let mut tx = self.pool.begin().await?;
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT request_id FROM restore_requests WHERE request_id = ?")
                .bind(request_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(LedgerError::AlreadyExists(request_id.to_string()));
        }

        sqlx::query(
            "INSERT INTO restore_requests (request_id, bucket_paths, ttl, processed_paths, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(request_id)
        .bind(&pending_json)
        .bind(ttl_days)
        .bind(&processed_json)
        .bind(&created_at)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.reporter.publish(StatusEvent::RequestCreated {
            request_id: request_id.to_string(),
            paths: paths.to_vec(),
            ttl_days,
            created_at,
        });
        Ok(())
    }

    /// Moves `path` from pending to processed and reports whether the request is complete.
    ///
    /// Only the first matching pending entry is removed, and `path` is appended to the
    /// processed list even when it was not pending. The row is deleted once pending is
    /// empty. Calls for the same request are serialized.
    pub async fn mark_processed(&self, request_id: &str, path: &str) -> LedgerResult<bool> {
        let lock = self.request_lock(request_id);
        let updated = {
            let _guard = lock.lock().await;
            self.move_to_processed(request_id, path).await
        };
        self.release_request_lock(request_id, lock);

        let (pending, processed) = updated?;
        let complete = pending.is_empty();
        self.reporter.publish(StatusEvent::PathsUpdated {
            request_id: request_id.to_string(),
            path: path.to_string(),
            pending,
            processed,
        });
        Ok(complete)
    }

    async fn move_to_processed(
        &self,
        request_id: &str,
        path: &str,
    ) -> LedgerResult<(Vec<String>, Vec<String>)> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT bucket_paths, processed_paths FROM restore_requests WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((pending_json, processed_json)) = row else {
            return Err(LedgerError::NotFound(request_id.to_string()));
        };

        let mut pending: Vec<String> = serde_json::from_str(&pending_json)?;
        let mut processed: Vec<String> = serde_json::from_str(&processed_json)?;
        processed.push(path.to_string());
        if let Some(index) = pending.iter().position(|p| p == path) {
            pending.remove(index);
        }
        let complete = pending.is_empty();

        if complete {
            sqlx::query("DELETE FROM restore_requests WHERE request_id = ?")
                .bind(request_id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                "UPDATE restore_requests SET bucket_paths = ?, processed_paths = ?, updated_at = ? \
                 WHERE request_id = ?",
            )
            .bind(serde_json::to_string(&pending)?)
            .bind(serde_json::to_string(&processed)?)
            .bind(now_rfc3339())
            .bind(request_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok((pending, processed))
    }

    pub async fn fetch(&self, request_id: &str) -> LedgerResult<Option<RestoreRequest>> {
        let row: Option<RequestRow> = sqlx::query_as(
            "SELECT request_id, bucket_paths, ttl, processed_paths, created_at, updated_at \
             FROM restore_requests WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RestoreRequest::try_from).transpose()
    }

    /// Every request that still has pending paths, oldest first.
    pub async fn list_open(&self) -> LedgerResult<Vec<RestoreRequest>> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT request_id, bucket_paths, ttl, processed_paths, created_at, updated_at \
             FROM restore_requests ORDER BY created_at, request_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RestoreRequest::try_from).collect()
    }
}
