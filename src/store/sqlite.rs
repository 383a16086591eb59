use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{FactRecord, FactStore, Instrument};
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed store for the instrument catalog, facts, and indexed
/// documents. Supports concurrent reads; concurrent writes to the same key
/// are serialized by the upsert, last-write-wins.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store instance
    pub async fn new(config: &DatabaseConfig) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StoreError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory store. Used by tests.
    ///
    /// The pool is capped at one connection; each in-memory connection
    /// would otherwise see its own empty database.
    pub async fn new_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StoreError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl FactStore for SqliteStore {
    async fn get_fact(&self, ticker: &str, field: &str) -> StoreResult<Option<FactRecord>> {
        let row: Option<FactRow> = sqlx::query_as(
            r#"
            SELECT ticker, field, value, retrieved_at
            FROM facts
            WHERE ticker = ? AND field = ?
            "#,
        )
        .bind(ticker)
        .bind(field)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FactRecord::try_from).transpose()
    }

    async fn put_fact(&self, record: &FactRecord) -> StoreResult<()> {
        let value = serde_json::to_string(&record.value).map_err(|e| StoreError::Query {
            message: format!("Failed to serialize fact value: {}", e),
        })?;

        // Last-write-wins by retrieved_at: never overwrite a newer value.
        sqlx::query(
            r#"
            INSERT INTO facts (ticker, field, value, retrieved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(ticker, field) DO UPDATE SET
                value = excluded.value,
                retrieved_at = excluded.retrieved_at
            WHERE excluded.retrieved_at >= facts.retrieved_at
            "#,
        )
        .bind(&record.ticker)
        .bind(&record.field)
        .bind(&value)
        .bind(record.retrieved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn resolve_instrument(&self, query: &str) -> StoreResult<Option<Instrument>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        // Exact ticker match first, then exact name, then name substring.
        let row: Option<InstrumentRow> = sqlx::query_as(
            r#"
            SELECT ticker, name, sector FROM instruments WHERE ticker = ?
            "#,
        )
        .bind(trimmed)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Some(row.into()));
        }

        let row: Option<InstrumentRow> = sqlx::query_as(
            r#"
            SELECT ticker, name, sector
            FROM instruments
            WHERE name = ? OR name LIKE ?
            ORDER BY length(name) ASC
            LIMIT 1
            "#,
        )
        .bind(trimmed)
        .bind(format!("%{}%", trimmed))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn search_by_sector(&self, sector: &str) -> StoreResult<Vec<Instrument>> {
        let rows: Vec<InstrumentRow> = sqlx::query_as(
            r#"
            SELECT ticker, name, sector
            FROM instruments
            WHERE sector = ?
            ORDER BY ticker ASC
            "#,
        )
        .bind(sector)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn upsert_instrument(&self, instrument: &Instrument) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO instruments (ticker, name, sector, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(ticker) DO UPDATE SET
                name = excluded.name,
                sector = excluded.sector,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&instrument.ticker)
        .bind(&instrument.name)
        .bind(&instrument.sector)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct FactRow {
    ticker: String,
    field: String,
    value: String,
    retrieved_at: String,
}

impl TryFrom<FactRow> for FactRecord {
    type Error = StoreError;

    fn try_from(row: FactRow) -> Result<Self, Self::Error> {
        let value = serde_json::from_str(&row.value).map_err(|e| StoreError::Query {
            message: format!("Corrupt fact value for {}/{}: {}", row.ticker, row.field, e),
        })?;
        let retrieved_at = DateTime::parse_from_rfc3339(&row.retrieved_at)
            .map_err(|e| StoreError::Query {
                message: format!("Corrupt timestamp for {}/{}: {}", row.ticker, row.field, e),
            })?
            .with_timezone(&Utc);

        Ok(FactRecord {
            ticker: row.ticker,
            field: row.field,
            value,
            retrieved_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InstrumentRow {
    ticker: String,
    name: String,
    sector: Option<String>,
}

impl From<InstrumentRow> for Instrument {
    fn from(row: InstrumentRow) -> Self {
        Instrument {
            ticker: row.ticker,
            name: row.name,
            sector: row.sector,
        }
    }
}
