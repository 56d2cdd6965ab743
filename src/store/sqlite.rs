//! SQLite implementation of the store port using SQLx.
//!
//! The store is a single local database file (`DB_NAME`). Everything the
//! pipeline relies on is expressed in the SQL itself:
//!
//! - Idempotent saves via `ON CONFLICT (transaction_hash, log_index) DO NOTHING`
//! - Monotonic cursors via a conditional upsert
//!   (`WHERE excluded.last_synced_block > sync_cursors.last_synced_block`)
//!
//! # Type Conversions
//!
//! SQLite uses signed 64-bit integers while the domain uses unsigned types.
//! These casts are safe because block numbers and log indexes won't exceed
//! `i64::MAX`.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

use std::str::FromStr;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::{debug, instrument};

use crate::error::{InfraError, Result};
use crate::ports::store::{EventStore, SaveOutcome};
use crate::types::{EthAddress, EventPage, EventQuery, TokenValue, TransferEvent, TransferStats, TxHash};

// ═══════════════════════════════════════════════════════════════════════════════
// SQLITE STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// SQLite-backed store implementation.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store with an existing connection pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `db_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub async fn connect(db_name: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_name)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // An in-memory SQLite database exists per connection; a pool larger
        // than one would see a different empty database on each checkout.
        let max_connections = if db_name == ":memory:" { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(InfraError::Database)?;

        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| InfraError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROW MAPPING
// ═══════════════════════════════════════════════════════════════════════════════

/// Database row for transfer events.
#[derive(Debug, FromRow)]
struct TransferEventRow {
    transaction_hash: String,
    log_index: i64,
    block_number: i64,
    block_timestamp: i64,
    from_address: String,
    to_address: String,
    value: String,
    indexed_at: DateTime<Utc>,
}

impl TryFrom<TransferEventRow> for TransferEvent {
    type Error = InfraError;

    fn try_from(row: TransferEventRow) -> std::result::Result<Self, Self::Error> {
        Ok(TransferEvent {
            transaction_hash: TxHash::from_hex(&row.transaction_hash)
                .map_err(|e| corrupt_row("transaction_hash", &e))?,
            log_index: row.log_index as u64,
            block_number: row.block_number as u64,
            timestamp: DateTime::<Utc>::from_timestamp(row.block_timestamp, 0)
                .ok_or_else(|| corrupt_row("block_timestamp", &row.block_timestamp))?,
            from: EthAddress::from_hex(&row.from_address)
                .map_err(|e| corrupt_row("from_address", &e))?,
            to: EthAddress::from_hex(&row.to_address).map_err(|e| corrupt_row("to_address", &e))?,
            value: TokenValue::parse(&row.value).map_err(|e| corrupt_row("value", &e))?,
            indexed_at: row.indexed_at,
        })
    }
}

fn corrupt_row(column: &str, detail: &dyn std::fmt::Debug) -> InfraError {
    InfraError::Database(sqlx::Error::Decode(
        format!("corrupt {column} in row: {detail:?}").into(),
    ))
}

/// Append the query's filter conditions to a statement.
fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, query: &'a EventQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(from) = &query.from {
        builder.push(" AND from_address = ").push_bind(from.to_hex());
    }
    if let Some(to) = &query.to {
        builder.push(" AND to_address = ").push_bind(to.to_hex());
    }
    if let Some(start) = query.start_block {
        builder
            .push(" AND block_number >= ")
            .push_bind(start as i64);
    }
    if let Some(end) = query.end_block {
        builder.push(" AND block_number <= ").push_bind(end as i64);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl EventStore for SqliteStore {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn save_events(&self, events: &[TransferEvent]) -> Result<SaveOutcome> {
        let mut outcome = SaveOutcome::default();
        if events.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;

        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO transfer_events (
                    transaction_hash, log_index, block_number, block_timestamp,
                    from_address, to_address, value, indexed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (transaction_hash, log_index) DO NOTHING
                "#,
            )
            .bind(event.transaction_hash.to_hex())
            .bind(event.log_index as i64)
            .bind(event.block_number as i64)
            .bind(event.timestamp.timestamp())
            .bind(event.from.to_hex())
            .bind(event.to.to_hex())
            .bind(event.value.to_decimal())
            .bind(event.indexed_at)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;

            if result.rows_affected() > 0 {
                outcome.inserted += 1;
            } else {
                outcome.ignored += 1;
            }
        }

        tx.commit().await.map_err(InfraError::Database)?;

        debug!(
            inserted = outcome.inserted,
            ignored = outcome.ignored,
            "Events saved"
        );
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn get_cursor(&self, id: &str) -> Result<Option<u64>> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT last_synced_block FROM sync_cursors WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(InfraError::Database)?;

        Ok(row.map(|block| block as u64))
    }

    #[instrument(skip(self))]
    async fn create_cursor(&self, id: &str, block: u64) -> Result<u64> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (id, last_synced_block, last_synced_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(block as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        // A concurrent create may have won; the stored value is authoritative.
        let stored: i64 =
            sqlx::query_scalar("SELECT last_synced_block FROM sync_cursors WHERE id = ?1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(InfraError::Database)?;

        Ok(stored as u64)
    }

    #[instrument(skip(self))]
    async fn advance_cursor(&self, id: &str, block: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (id, last_synced_block, last_synced_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (id) DO UPDATE SET
                last_synced_block = excluded.last_synced_block,
                last_synced_at = excluded.last_synced_at
            WHERE excluded.last_synced_block > sync_cursors.last_synced_block
            "#,
        )
        .bind(id)
        .bind(block as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(())
    }

    #[instrument(skip(self, query), fields(page = query.page, page_size = query.page_size))]
    async fn get_events(&self, query: &EventQuery) -> Result<EventPage> {
        let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM transfer_events");
        push_filters(&mut count_builder, query);
        let total_count: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        let mut builder = QueryBuilder::new(
            "SELECT transaction_hash, log_index, block_number, block_timestamp, \
             from_address, to_address, value, indexed_at FROM transfer_events",
        );
        push_filters(&mut builder, query);
        builder
            .push(" ORDER BY block_number DESC, log_index ASC LIMIT ")
            .push_bind(query.take() as i64)
            .push(" OFFSET ")
            .push_bind(query.skip() as i64);

        let rows: Vec<TransferEventRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        let events = rows
            .into_iter()
            .map(TransferEvent::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(EventPage {
            events,
            total_count: total_count as u64,
        })
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> Result<TransferStats> {
        let total_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfer_events")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        // SQLite's SUM would coerce the TEXT column to floating point and
        // silently lose precision, so the sum is computed exactly here.
        let mut total = BigDecimal::from(0);
        let mut values =
            sqlx::query_scalar::<_, String>("SELECT value FROM transfer_events").fetch(&self.pool);
        while let Some(value) = values.try_next().await.map_err(InfraError::Database)? {
            let parsed = BigDecimal::from_str(&value)
                .map_err(|e| corrupt_row("value", &e.to_string()))?;
            total += parsed;
        }

        Ok(TransferStats {
            total_events: total_events as u64,
            total_value_transferred: total.normalized().to_string(),
        })
    }
}
