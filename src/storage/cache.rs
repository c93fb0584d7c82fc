//! Time-expiring result cache keyed by (indicator, indicator_type, source)
//!
//! A connection is opened per operation and closed after it, so a store
//! failure on one call cannot corrupt state for the next. When the
//! underlying database is unusable, every `get` reports a miss and every
//! write is a no-op; enrichment proceeds uncached.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Connection, Row, SqliteConnection};
use tokio::sync::Mutex;

use crate::models::{Indicator, Source, ThreatRecord};

/// SQLite-backed cache for normalized provider results
#[derive(Clone)]
pub struct ResultCache {
    db_path: PathBuf,
    cache_duration_secs: i64,
    initialized: Arc<AtomicBool>,
    init_lock: Arc<Mutex<()>>,
}

impl ResultCache {
    /// Create a cache handle; the schema is created lazily on first use
    pub fn new(db_path: impl Into<PathBuf>, cache_duration_secs: i64) -> Self {
        Self {
            db_path: db_path.into(),
            cache_duration_secs,
            initialized: Arc::new(AtomicBool::new(false)),
            init_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn cache_duration_secs(&self) -> i64 {
        self.cache_duration_secs
    }

    async fn connect(&self) -> Option<SqliteConnection> {
        let url = format!("sqlite://{}?mode=rwc", self.db_path.display());
        match SqliteConnection::connect(&url).await {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.db_path.display(),
                    "Cache store unavailable"
                );
                None
            }
        }
    }

    /// Create the schema at most once per process; concurrent early
    /// callers serialize on the init lock, later callers take the
    /// lock-free path.
    async fn ensure_schema(&self) -> bool {
        if self.initialized.load(Ordering::Acquire) {
            return true;
        }

        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return true;
        }

        let Some(mut conn) = self.connect().await else {
            return false;
        };

        let ddl = sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS result_cache (
                indicator TEXT NOT NULL,
                indicator_type TEXT NOT NULL
                    CHECK(indicator_type IN ('ip', 'domain', 'hash', 'url')),
                source TEXT NOT NULL,
                result TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                PRIMARY KEY (indicator, source)
            )
            "#,
        )
        .execute(&mut conn)
        .await;

        if let Err(e) = ddl {
            tracing::warn!(error = %e, "Failed to initialize cache schema");
            conn.close().await.ok();
            return false;
        }

        if let Err(e) = sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_result_cache_timestamp ON result_cache (timestamp)",
        )
        .execute(&mut conn)
        .await
        {
            tracing::warn!(error = %e, "Failed to create cache timestamp index");
            conn.close().await.ok();
            return false;
        }

        conn.close().await.ok();
        self.initialized.store(true, Ordering::Release);
        tracing::debug!(path = %self.db_path.display(), "Cache schema initialized");
        true
    }

    /// Fetch a fresh cached record. An expired entry reads as a miss and
    /// is left in place for the pruning sweep.
    pub async fn get(&self, indicator: &str, source: Source) -> Option<ThreatRecord> {
        if !self.ensure_schema().await {
            return None;
        }
        let mut conn = self.connect().await?;

        let row = sqlx::query(
            "SELECT result, timestamp FROM result_cache WHERE indicator = ?1 AND source = ?2",
        )
        .bind(indicator)
        .bind(source.as_str())
        .fetch_optional(&mut conn)
        .await;
        conn.close().await.ok();

        let row = match row {
            Ok(row) => row?,
            Err(e) => {
                tracing::warn!(error = %e, indicator, "Cache read failed");
                return None;
            }
        };

        let stored_at: i64 = row.get("timestamp");
        let age = Utc::now().timestamp() - stored_at;
        if age >= self.cache_duration_secs {
            tracing::debug!(indicator, source = %source, age, "Cache entry expired");
            return None;
        }

        let result: String = row.get("result");
        match serde_json::from_str(&result) {
            Ok(record) => {
                tracing::debug!(indicator, source = %source, age, "Cache hit");
                Some(record)
            }
            Err(e) => {
                tracing::warn!(error = %e, indicator, "Cached payload unreadable");
                None
            }
        }
    }

    /// Store a normalized record; a write to an existing key overwrites
    pub async fn put(&self, indicator: &Indicator, record: &ThreatRecord) {
        if !self.ensure_schema().await {
            return;
        }
        let Some(mut conn) = self.connect().await else {
            return;
        };

        let result = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, indicator = %indicator.value, "Record not serializable");
                return;
            }
        };

        let write = sqlx::query(
            r#"
            INSERT OR REPLACE INTO result_cache (indicator, indicator_type, source, result, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&indicator.value)
        .bind(indicator.indicator_type.as_str())
        .bind(record.source.as_str())
        .bind(result)
        .bind(Utc::now().timestamp())
        .execute(&mut conn)
        .await;
        conn.close().await.ok();

        if let Err(e) = write {
            tracing::warn!(error = %e, indicator = %indicator.value, "Cache write failed");
        }
    }

    /// Invalidate a single entry
    pub async fn delete(&self, indicator: &str, source: Source) {
        if !self.ensure_schema().await {
            return;
        }
        let Some(mut conn) = self.connect().await else {
            return;
        };

        let delete = sqlx::query("DELETE FROM result_cache WHERE indicator = ?1 AND source = ?2")
            .bind(indicator)
            .bind(source.as_str())
            .execute(&mut conn)
            .await;
        conn.close().await.ok();

        if let Err(e) = delete {
            tracing::warn!(error = %e, indicator, "Cache delete failed");
        }
    }

    /// Delete all entries stored before the cutoff. Triggered by the
    /// periodic sweep, never per-lookup.
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> u64 {
        if !self.ensure_schema().await {
            return 0;
        }
        let Some(mut conn) = self.connect().await else {
            return 0;
        };

        let pruned = sqlx::query("DELETE FROM result_cache WHERE timestamp < ?1")
            .bind(cutoff.timestamp())
            .execute(&mut conn)
            .await;
        conn.close().await.ok();

        match pruned {
            Ok(result) => {
                let rows = result.rows_affected();
                tracing::info!(rows, cutoff = %cutoff, "Pruned stale cache entries");
                rows
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cache prune failed");
                0
            }
        }
    }
}
