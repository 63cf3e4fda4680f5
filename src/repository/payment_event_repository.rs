use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{PaymentEvent, PaymentEventKind},
    error::{AppError, Result},
    repository::PaymentEventRepository,
};

#[derive(FromRow)]
struct PaymentEventRow {
    id: String,
    merchant_transaction_id: String,
    kind: String,
    detail: Option<String>,
    created_at: NaiveDateTime,
}

/// Append-only log. There is deliberately no update or delete here.
pub struct SqlitePaymentEventRepository {
    pool: SqlitePool,
}

impl SqlitePaymentEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: PaymentEventRow) -> Result<PaymentEvent> {
        let kind = PaymentEventKind::parse(&row.kind)
            .ok_or_else(|| AppError::Database(format!("Invalid payment event kind: {}", row.kind)))?;
        let detail = row
            .detail
            .map(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| AppError::Database(format!("Corrupt event detail: {}", e)))
            })
            .transpose()?;

        Ok(PaymentEvent {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            merchant_transaction_id: row.merchant_transaction_id,
            kind,
            detail,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }
}

#[async_trait]
impl PaymentEventRepository for SqlitePaymentEventRepository {
    async fn append(
        &self,
        merchant_transaction_id: &str,
        kind: PaymentEventKind,
        detail: Option<serde_json::Value>,
    ) -> Result<()> {
        let detail_json = detail
            .map(|v| {
                serde_json::to_string(&v)
                    .map_err(|e| AppError::Internal(format!("Failed to encode event detail: {}", e)))
            })
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO payment_events (id, merchant_transaction_id, kind, detail, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(merchant_transaction_id)
        .bind(kind.as_str())
        .bind(&detail_json)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn list_for_transaction(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<Vec<PaymentEvent>> {
        let rows = sqlx::query_as::<_, PaymentEventRow>(
            r#"
            SELECT id, merchant_transaction_id, kind, detail, created_at
            FROM payment_events
            WHERE merchant_transaction_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(merchant_transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}
