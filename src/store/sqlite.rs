//! SQLite store backend
//!
//! One row per proxy keyed by `proxy_key` (`host:port`). Timestamps are
//! stored as epoch seconds and protocols as a JSON array.

use crate::error::StoreError;
use crate::proxy::models::ProxyRecord;
use crate::store::StoreBackend;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Table names are interpolated into SQL, so only plain identifiers pass
static TABLE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("Invalid table name regex"));

/// How many times bootstrap polls for the new table
const TABLE_READY_ATTEMPTS: u32 = 20;

/// Delay between bootstrap polls
const TABLE_READY_POLL: Duration = Duration::from_millis(250);

const COLUMNS: &str = "proxy_key, id, ip, port, anonymity, asn, city, country, isp, org, region, \
    protocols, latency, response_time, speed, working_percent, up_time, up_time_success_count, \
    up_time_try_count, google, created_at, last_checked, updated_at";

/// Check that `name` can be used as a table identifier
pub fn is_valid_table_name(name: &str) -> bool {
    TABLE_NAME_REGEX.is_match(name)
}

/// Backend storing proxies in a SQLite table
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    table: String,
    upsert_sql: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `database_url`
    pub async fn connect(database_url: &str, table: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool, table)
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool, table: &str) -> Result<Self, StoreError> {
        if !is_valid_table_name(table) {
            return Err(StoreError::backend(format!("invalid table name {:?}", table)));
        }

        let placeholders = vec!["?"; COLUMNS.split(',').count()].join(", ");
        let upsert_sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table, COLUMNS, placeholders
        );

        Ok(Self {
            pool,
            table: table.to_string(),
            upsert_sql,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn table_exists(&self) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(&self.table)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(count > 0)
    }

    async fn create_table(&self) -> Result<(), StoreError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                proxy_key TEXT PRIMARY KEY NOT NULL,
                id TEXT NOT NULL,
                ip TEXT NOT NULL,
                port INTEGER NOT NULL,
                anonymity TEXT NOT NULL,
                asn TEXT NOT NULL,
                city TEXT NOT NULL,
                country TEXT NOT NULL,
                isp TEXT NOT NULL,
                org TEXT NOT NULL,
                region TEXT,
                protocols TEXT NOT NULL,
                latency REAL NOT NULL,
                response_time INTEGER NOT NULL,
                speed INTEGER NOT NULL,
                working_percent REAL,
                up_time REAL NOT NULL,
                up_time_success_count INTEGER NOT NULL,
                up_time_try_count INTEGER NOT NULL,
                google INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_checked INTEGER NOT NULL,
                updated_at INTEGER
            )",
            self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: &SqliteRow) -> Result<ProxyRecord, StoreError> {
        let key: String = row.try_get("proxy_key")?;

        let port: i64 = row.try_get("port")?;
        let port = u16::try_from(port)
            .map_err(|_| StoreError::corrupt(&key, format!("port {} out of range", port)))?;

        let protocols: String = row.try_get("protocols")?;
        let protocols: Vec<String> = serde_json::from_str(&protocols)
            .map_err(|e| StoreError::corrupt(&key, format!("protocols: {}", e)))?;

        let updated_at: Option<i64> = row.try_get("updated_at")?;
        let updated_at = match updated_at {
            Some(secs) => Some(from_epoch(&key, "updated_at", secs)?),
            None => None,
        };

        Ok(ProxyRecord {
            id: row.try_get("id")?,
            host: row.try_get("ip")?,
            port,
            anonymity: row.try_get("anonymity")?,
            asn: row.try_get("asn")?,
            city: row.try_get("city")?,
            country: row.try_get("country")?,
            isp: row.try_get("isp")?,
            org: row.try_get("org")?,
            region: row.try_get("region")?,
            protocols,
            latency: row.try_get("latency")?,
            response_time: row.try_get("response_time")?,
            speed: row.try_get("speed")?,
            working_percent: row.try_get("working_percent")?,
            up_time: row.try_get("up_time")?,
            up_time_success_count: row.try_get("up_time_success_count")?,
            up_time_try_count: row.try_get("up_time_try_count")?,
            google: row.try_get("google")?,
            created_at: from_epoch(&key, "created_at", row.try_get("created_at")?)?,
            last_checked: from_epoch(&key, "last_checked", row.try_get("last_checked")?)?,
            updated_at,
        })
    }
}

fn from_epoch(key: &str, column: &str, secs: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| StoreError::corrupt(key, format!("{} {} out of range", column, secs)))
}

#[async_trait]
impl StoreBackend for SqliteBackend {
    async fn ensure_table(&self) -> Result<(), StoreError> {
        if self.table_exists().await? {
            info!(table = %self.table, "table already exists");
            return Ok(());
        }

        info!(table = %self.table, "creating table");
        self.create_table().await?;

        for _ in 0..TABLE_READY_ATTEMPTS {
            if self.table_exists().await? {
                info!(table = %self.table, "table created");
                return Ok(());
            }
            tokio::time::sleep(TABLE_READY_POLL).await;
        }

        Err(StoreError::Bootstrap {
            table: self.table.clone(),
            message: "table did not become visible".to_string(),
        })
    }

    async fn get_chunk(&self, keys: &[String]) -> Result<Vec<ProxyRecord>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM {} WHERE proxy_key IN (",
            COLUMNS, self.table
        ));
        let mut separated = qb.separated(", ");
        for key in keys {
            separated.push_bind(key.as_str());
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn put_chunk(&self, records: &[ProxyRecord]) -> Result<(), StoreError> {
        // one transaction per chunk: a chunk is either fully written or not at all
        let mut tx = self.pool.begin().await?;

        for record in records {
            let key = record.key();
            let protocols = serde_json::to_string(&record.protocols)
                .map_err(|e| StoreError::corrupt(&key, format!("protocols: {}", e)))?;

            sqlx::query(&self.upsert_sql)
                .bind(&key)
                .bind(&record.id)
                .bind(&record.host)
                .bind(i64::from(record.port))
                .bind(&record.anonymity)
                .bind(&record.asn)
                .bind(&record.city)
                .bind(&record.country)
                .bind(&record.isp)
                .bind(&record.org)
                .bind(&record.region)
                .bind(protocols)
                .bind(record.latency)
                .bind(record.response_time)
                .bind(record.speed)
                .bind(record.working_percent)
                .bind(record.up_time)
                .bind(record.up_time_success_count)
                .bind(record.up_time_try_count)
                .bind(record.google)
                .bind(record.created_at.timestamp())
                .bind(record.last_checked.timestamp())
                .bind(record.updated_at.map(|t| t.timestamp()))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
