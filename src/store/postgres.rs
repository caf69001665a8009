//! PostgreSQL-based broadcast store.
//!
//! Table structure:
//! - `broadcasts` - one row per broadcast with its status and final counts
//! - `broadcast_deliveries` - append-only per-recipient outcomes

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::broadcast::{DeliveryResult, MessageTag};
use crate::config::DatabaseConfig;

use super::types::{
    BroadcastCompletion, BroadcastRecord, BroadcastStatus, DeliveryRecord, NewBroadcast,
    StoreError,
};
use super::BroadcastRecordStore;

const CREATE_BROADCASTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS broadcasts (
        id UUID PRIMARY KEY,
        page_id TEXT NOT NULL,
        template TEXT NOT NULL,
        recipient_count BIGINT NOT NULL DEFAULT 0,
        sent_count BIGINT NOT NULL DEFAULT 0,
        failed_count BIGINT NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        message_tag TEXT,
        scheduled_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        completed_at TIMESTAMPTZ,
        error TEXT
    )
"#;

const CREATE_BROADCASTS_PAGE_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_broadcasts_page_created
    ON broadcasts (page_id, created_at DESC)
"#;

const CREATE_DELIVERIES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS broadcast_deliveries (
        id BIGSERIAL PRIMARY KEY,
        broadcast_id UUID NOT NULL REFERENCES broadcasts(id) ON DELETE CASCADE,
        recipient_id TEXT NOT NULL,
        succeeded BOOLEAN NOT NULL,
        error_detail TEXT,
        sent_message_id TEXT,
        message TEXT NOT NULL,
        completed_at TIMESTAMPTZ NOT NULL
    )
"#;

const CREATE_DELIVERIES_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_broadcast_deliveries_broadcast
    ON broadcast_deliveries (broadcast_id, id)
"#;

#[derive(sqlx::FromRow)]
struct BroadcastRow {
    id: Uuid,
    page_id: String,
    template: String,
    recipient_count: i64,
    sent_count: i64,
    failed_count: i64,
    status: String,
    message_tag: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl TryFrom<BroadcastRow> for BroadcastRecord {
    type Error = StoreError;

    fn try_from(row: BroadcastRow) -> Result<Self, Self::Error> {
        let message_tag = row
            .message_tag
            .map(|tag| tag.parse::<MessageTag>())
            .transpose()
            .map_err(StoreError::Corrupt)?;

        Ok(BroadcastRecord {
            id: row.id,
            page_id: row.page_id,
            template: row.template,
            recipient_count: row.recipient_count.max(0) as usize,
            sent_count: row.sent_count.max(0) as usize,
            failed_count: row.failed_count.max(0) as usize,
            status: row.status.parse()?,
            message_tag,
            scheduled_at: row.scheduled_at,
            created_at: row.created_at,
            completed_at: row.completed_at,
            error: row.error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    broadcast_id: Uuid,
    recipient_id: String,
    succeeded: bool,
    error_detail: Option<String>,
    sent_message_id: Option<String>,
    message: String,
    completed_at: DateTime<Utc>,
}

impl From<DeliveryRow> for DeliveryRecord {
    fn from(row: DeliveryRow) -> Self {
        DeliveryRecord {
            broadcast_id: row.broadcast_id,
            result: DeliveryResult {
                recipient_id: row.recipient_id,
                succeeded: row.succeeded,
                error_detail: row.error_detail,
                sent_message_id: row.sent_message_id,
                message: row.message,
                completed_at: row.completed_at,
            },
        }
    }
}

/// Broadcast store backed by PostgreSQL
#[derive(Clone)]
pub struct PostgresBroadcastStore {
    pool: PgPool,
}

impl PostgresBroadcastStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool for the given database URL
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(url)
            .await?;

        tracing::info!(
            pool_size = config.pool_size,
            "PostgreSQL connection pool created"
        );

        Ok(Self::new(pool))
    }

    /// Create the tables and indexes if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in [
            CREATE_BROADCASTS_TABLE,
            CREATE_BROADCASTS_PAGE_INDEX,
            CREATE_DELIVERIES_TABLE,
            CREATE_DELIVERIES_INDEX,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BroadcastRecordStore for PostgresBroadcastStore {
    async fn create(&self, broadcast: NewBroadcast) -> Result<BroadcastRecord, StoreError> {
        let record = BroadcastRecord::new(Uuid::new_v4(), broadcast);

        sqlx::query(
            r#"
            INSERT INTO broadcasts
                (id, page_id, template, recipient_count, status, message_tag, scheduled_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.page_id)
        .bind(&record.template)
        .bind(record.recipient_count as i64)
        .bind(record.status.as_str())
        .bind(record.message_tag.map(|t| t.as_str()))
        .bind(record.scheduled_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn mark_sending(&self, id: Uuid, recipient_count: usize) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE broadcasts SET status = $2, recipient_count = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(BroadcastStatus::Sending.as_str())
        .bind(recipient_count as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn record_delivery(&self, id: Uuid, result: &DeliveryResult) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO broadcast_deliveries
                (broadcast_id, recipient_id, succeeded, error_detail, sent_message_id, message, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(&result.recipient_id)
        .bind(result.succeeded)
        .bind(&result.error_detail)
        .bind(&result.sent_message_id)
        .bind(&result.message)
        .bind(result.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete(&self, id: Uuid, completion: BroadcastCompletion) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE broadcasts
            SET status = $2, sent_count = $3, failed_count = $4, completed_at = $5, error = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(completion.status.as_str())
        .bind(completion.sent_count as i64)
        .bind(completion.failed_count as i64)
        .bind(completion.completed_at)
        .bind(&completion.error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BroadcastRecord>, StoreError> {
        let row: Option<BroadcastRow> = sqlx::query_as("SELECT * FROM broadcasts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(BroadcastRecord::try_from).transpose()
    }

    async fn list(
        &self,
        page_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BroadcastRecord>, StoreError> {
        let rows: Vec<BroadcastRow> = sqlx::query_as(
            r#"
            SELECT * FROM broadcasts
            WHERE ($1::TEXT IS NULL OR page_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(page_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BroadcastRecord::try_from).collect()
    }

    async fn deliveries(&self, id: Uuid) -> Result<Vec<DeliveryRecord>, StoreError> {
        if self.get(id).await?.is_none() {
            return Err(StoreError::NotFound(id));
        }

        let rows: Vec<DeliveryRow> = sqlx::query_as(
            r#"
            SELECT broadcast_id, recipient_id, succeeded, error_detail, sent_message_id, message, completed_at
            FROM broadcast_deliveries
            WHERE broadcast_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeliveryRecord::from).collect())
    }
}
