use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{PaymentStatus, PaymentTransaction},
    error::{AppError, Result},
    repository::{
        registration_repository::{parse_payment_status, payment_status_to_str},
        TransactionRepository,
    },
};

#[derive(FromRow)]
struct TransactionRow {
    id: String,
    registration_id: Option<String>,
    merchant_transaction_id: String,
    amount_cents: i64,
    status: String,
    gateway_response: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteTransactionRepository {
    pool: SqlitePool,
}

impl SqliteTransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: TransactionRow) -> Result<PaymentTransaction> {
        let registration_id = row
            .registration_id
            .map(|s| Uuid::parse_str(&s).map_err(|e| AppError::Database(e.to_string())))
            .transpose()?;
        let gateway_response = row
            .gateway_response
            .map(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| AppError::Database(format!("Corrupt gateway response: {}", e)))
            })
            .transpose()?;

        Ok(PaymentTransaction {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            registration_id,
            merchant_transaction_id: row.merchant_transaction_id,
            amount_cents: row.amount_cents,
            status: parse_payment_status(&row.status)?,
            gateway_response,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, registration_id, merchant_transaction_id, amount_cents,
           status, gateway_response, created_at, updated_at
    FROM payment_transactions
"#;

#[async_trait]
impl TransactionRepository for SqliteTransactionRepository {
    async fn create(&self, transaction: PaymentTransaction) -> Result<PaymentTransaction> {
        let response_json = transaction
            .gateway_response
            .as_ref()
            .map(|v| {
                serde_json::to_string(v).map_err(|e| {
                    AppError::Internal(format!("Failed to encode gateway response: {}", e))
                })
            })
            .transpose()?;
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO payment_transactions (
                id, registration_id, merchant_transaction_id, amount_cents,
                status, gateway_response, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(transaction.registration_id.map(|id| id.to_string()))
        .bind(&transaction.merchant_transaction_id)
        .bind(transaction.amount_cents)
        .bind(payment_status_to_str(&transaction.status))
        .bind(&response_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_merchant_id(&transaction.merchant_transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::Database("Failed to retrieve created transaction".to_string())
            })
    }

    async fn find_by_merchant_id(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "{} WHERE merchant_transaction_id = ?",
            SELECT_COLUMNS
        ))
        .bind(merchant_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_transaction(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_registration(
        &self,
        registration_id: Uuid,
    ) -> Result<Vec<PaymentTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "{} WHERE registration_id = ? ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(registration_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    async fn mark_result(
        &self,
        merchant_transaction_id: &str,
        status: PaymentStatus,
        gateway_response: &serde_json::Value,
    ) -> Result<bool> {
        let response_json = serde_json::to_string(gateway_response)
            .map_err(|e| AppError::Internal(format!("Failed to encode gateway response: {}", e)))?;
        let now = Utc::now().naive_utc();

        // The status guard makes duplicate notifications no-ops even
        // when two deliveries race: only one UPDATE can move the row
        // out of pending.
        let result = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = ?,
                gateway_response = ?,
                updated_at = ?
            WHERE merchant_transaction_id = ? AND status = 'pending'
            "#,
        )
        .bind(payment_status_to_str(&status))
        .bind(&response_json)
        .bind(now)
        .bind(merchant_transaction_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM payment_transactions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
