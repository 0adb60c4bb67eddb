//! SQLite row store
//!
//! One `miner_stats` row per record, indexed by `(ip, collected_at)` so a
//! single miner's history can be read back in time order.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rigscan_core::{NormalizedRecord, Sink};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info, warn};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS miner_stats (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    collected_at  TEXT    NOT NULL,
    ip            TEXT    NOT NULL,
    model         TEXT,
    hashrate_5s   REAL,
    hashrate_avg  REAL,
    temperature   REAL,
    worker_name   TEXT,
    pool          TEXT,
    owner_name    TEXT,
    is_online     INTEGER NOT NULL
)
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_miner_time ON miner_stats(ip, collected_at)";

/// A stored `miner_stats` row
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct MinerStatsRow {
    pub id: i64,
    pub collected_at: DateTime<Utc>,
    pub ip: String,
    pub model: Option<String>,
    pub hashrate_5s: Option<f64>,
    pub hashrate_avg: Option<f64>,
    pub temperature: Option<f64>,
    pub worker_name: Option<String>,
    pub pool: Option<String>,
    /// Not populated by the scanner; kept for rows written by other tools
    pub owner_name: Option<String>,
    pub is_online: bool,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database and ensure the schema exists
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .context("Failed to create miner_stats table")?;
        sqlx::query(CREATE_INDEX)
            .execute(&pool)
            .await
            .context("Failed to create miner_stats index")?;

        info!(path = %path.display(), "Opened row store");
        Ok(Self { pool })
    }

    /// Insert all records in one transaction
    pub async fn insert(&self, records: &[NormalizedRecord]) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO miner_stats
                    (collected_at, ip, model, hashrate_5s, hashrate_avg, temperature,
                     worker_name, pool, owner_name, is_online)
                VALUES
                    (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
                "#,
            )
            // Fixed-width UTC text keeps the index in time order
            .bind(record.collected_at.to_rfc3339_opts(SecondsFormat::Micros, true))
            .bind(record.host.to_string())
            .bind(&record.model)
            .bind(record.hashrate_5s)
            .bind(record.hashrate_avg)
            .bind(record.temperature)
            .bind(&record.worker_name)
            .bind(&record.pool)
            .bind(record.online)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Most recent rows for one miner, newest first
    pub async fn history(&self, ip: IpAddr, limit: i64) -> Result<Vec<MinerStatsRow>, sqlx::Error> {
        sqlx::query_as::<_, MinerStatsRow>(
            r#"
            SELECT id, collected_at, ip, model, hashrate_5s, hashrate_avg, temperature,
                   worker_name, pool, owner_name, is_online
            FROM miner_stats
            WHERE ip = ?
            ORDER BY collected_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(ip.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[async_trait]
impl Sink for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn store(&self, record: NormalizedRecord) {
        self.store_batch(vec![record]).await;
    }

    async fn store_batch(&self, records: Vec<NormalizedRecord>) {
        if records.is_empty() {
            return;
        }
        match self.insert(&records).await {
            Ok(rows) => debug!(rows, "Stored rows"),
            Err(e) => warn!(error = %e, count = records.len(), "Failed to store rows"),
        }
    }
}
