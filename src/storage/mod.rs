//! Persistence layer for threat records and the result cache

pub mod cache;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{CountBucket, KpiSummary, StoredThreat, ThreatRecord};

/// Repository holding the latest record per (indicator, source) pair.
/// Tagging and the administrative read operations all go through here.
#[derive(Clone)]
pub struct ThreatRepo {
    pool: SqlitePool,
}

impl ThreatRepo {
    /// Open the repository and create the schema if needed
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to open threat database")?;

        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threats (
                id TEXT PRIMARY KEY,
                indicator TEXT NOT NULL,
                source TEXT NOT NULL,
                severity TEXT NOT NULL,
                country TEXT,
                latitude REAL,
                longitude REAL,
                attributes TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                observed_at TEXT NOT NULL,
                UNIQUE (indicator, source)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create threats table")?;

        Ok(())
    }

    /// Upsert a record, latest-wins per (indicator, source); the row id
    /// and accumulated tags survive the overwrite.
    pub async fn save(&self, record: &ThreatRecord) -> Result<String> {
        let country = record
            .attributes
            .get("country")
            .and_then(Value::as_str)
            .filter(|c| *c != "N/A")
            .map(str::to_string);

        let attributes =
            serde_json::to_string(&record.attributes).context("Failed to serialize attributes")?;
        let tags = serde_json::to_string(&record.tags).context("Failed to serialize tags")?;

        let row = sqlx::query(
            r#"
            INSERT INTO threats (
                id, indicator, source, severity, country, latitude, longitude,
                attributes, tags, observed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (indicator, source) DO UPDATE SET
                severity = excluded.severity,
                country = excluded.country,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                attributes = excluded.attributes,
                observed_at = excluded.observed_at
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&record.indicator)
        .bind(record.source.as_str())
        .bind(record.severity.as_str())
        .bind(&country)
        .bind(record.geo.map(|g| g.latitude))
        .bind(record.geo.map(|g| g.longitude))
        .bind(attributes)
        .bind(tags)
        .bind(record.observed_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .context("Failed to save threat record")?;

        Ok(row.get("id"))
    }

    /// Most recently observed records
    pub async fn recent(&self, limit: i64) -> Result<Vec<StoredThreat>> {
        let rows = sqlx::query("SELECT * FROM threats ORDER BY observed_at DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch recent threats")?;

        rows.iter().map(row_to_threat).collect()
    }

    /// Fetch a single record by id
    pub async fn get(&self, id: &str) -> Result<Option<StoredThreat>> {
        let row = sqlx::query("SELECT * FROM threats WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch threat")?;

        row.as_ref().map(row_to_threat).transpose()
    }

    /// Append a tag to a record with set semantics; a duplicate tag is
    /// not appended. Returns false when the id is unknown.
    pub async fn add_tag(&self, id: &str, tag: &str) -> Result<bool> {
        let row = sqlx::query("SELECT tags FROM threats WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch tags")?;

        let Some(row) = row else {
            return Ok(false);
        };

        let raw: String = row.get("tags");
        let mut tags: Vec<String> =
            serde_json::from_str(&raw).context("Stored tags unreadable")?;

        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
            sqlx::query("UPDATE threats SET tags = ?1 WHERE id = ?2")
                .bind(serde_json::to_string(&tags)?)
                .bind(id)
                .execute(&self.pool)
                .await
                .context("Failed to update tags")?;
        }

        Ok(true)
    }

    /// Bulk delete; returns the number of removed records
    pub async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM threats")
            .execute(&self.pool)
            .await
            .context("Failed to clear threats")?;

        Ok(result.rows_affected())
    }

    /// CSV export of the whole collection
    pub async fn export_csv(&self) -> Result<String> {
        let rows = sqlx::query(
            "SELECT indicator, source, observed_at, attributes, tags FROM threats ORDER BY observed_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to export threats")?;

        let mut out = String::from("Indicator,Source,Timestamp,Data,Tags\n");
        for row in rows {
            let tags_raw: String = row.get("tags");
            let tags: Vec<String> = serde_json::from_str(&tags_raw).unwrap_or_default();

            let fields = [
                row.get::<String, _>("indicator"),
                row.get::<String, _>("source"),
                row.get::<String, _>("observed_at"),
                row.get::<String, _>("attributes"),
                tags.join(", "),
            ];
            let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }

        Ok(out)
    }

    /// Headline KPI counters
    pub async fn kpis(&self) -> Result<KpiSummary> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM threats")
            .fetch_one(&self.pool)
            .await?;

        let high: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM threats WHERE severity = 'high'")
            .fetch_one(&self.pool)
            .await?;

        let medium: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM threats WHERE severity = 'medium'")
                .fetch_one(&self.pool)
                .await?;

        let unique: (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT indicator) FROM threats")
            .fetch_one(&self.pool)
            .await?;

        Ok(KpiSummary {
            total_threats: total.0,
            high_severity: high.0,
            medium_severity: medium.0,
            unique_indicators: unique.0,
        })
    }

    /// Record counts grouped by source
    pub async fn counts_by_source(&self) -> Result<Vec<CountBucket>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT source, COUNT(*) as count FROM threats GROUP BY source ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate by source")?;

        Ok(rows
            .into_iter()
            .map(|(name, count)| CountBucket { name, count })
            .collect())
    }

    /// Record counts grouped by severity
    pub async fn counts_by_severity(&self) -> Result<Vec<CountBucket>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT severity, COUNT(*) as count FROM threats GROUP BY severity ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate by severity")?;

        Ok(rows
            .into_iter()
            .map(|(name, count)| CountBucket { name, count })
            .collect())
    }

    /// Top origin countries, excluding records without one
    pub async fn top_countries(&self, limit: i64) -> Result<Vec<CountBucket>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT country, COUNT(*) as count FROM threats
            WHERE country IS NOT NULL
            GROUP BY country ORDER BY count DESC LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate by country")?;

        Ok(rows
            .into_iter()
            .map(|(name, count)| CountBucket { name, count })
            .collect())
    }
}

fn row_to_threat(row: &SqliteRow) -> Result<StoredThreat> {
    let attributes_raw: String = row.get("attributes");
    let tags_raw: String = row.get("tags");
    let observed_raw: String = row.get("observed_at");

    Ok(StoredThreat {
        id: row.get("id"),
        indicator: row.get("indicator"),
        source: row.get("source"),
        severity: row.get("severity"),
        country: row.get("country"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        attributes: serde_json::from_str(&attributes_raw)
            .context("Stored attributes unreadable")?,
        tags: serde_json::from_str(&tags_raw).context("Stored tags unreadable")?,
        observed_at: DateTime::parse_from_rfc3339(&observed_raw)
            .context("Stored timestamp unreadable")?
            .with_timezone(&Utc),
    })
}

/// Quote a CSV field when it contains a delimiter, quote, or newline
fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
