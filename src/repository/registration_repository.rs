use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{BookingDetails, PaymentStatus, Registration},
    error::{AppError, Result},
    repository::RegistrationRepository,
};

#[derive(FromRow)]
struct RegistrationRow {
    id: String,
    user_id: String,
    experience_id: String,
    amount_cents: i64,
    transaction_id: Option<String>,
    payment_status: String,
    payment_date: Option<NaiveDateTime>,
    booking_details: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteRegistrationRepository {
    pool: SqlitePool,
}

impl SqliteRegistrationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_registration(row: RegistrationRow) -> Result<Registration> {
        let booking_details: BookingDetails = serde_json::from_str(&row.booking_details)
            .map_err(|e| AppError::Database(format!("Corrupt booking details: {}", e)))?;

        Ok(Registration {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            user_id: Uuid::parse_str(&row.user_id)
                .map_err(|e| AppError::Database(e.to_string()))?,
            experience_id: Uuid::parse_str(&row.experience_id)
                .map_err(|e| AppError::Database(e.to_string()))?,
            amount_cents: row.amount_cents,
            transaction_id: row.transaction_id,
            payment_status: parse_payment_status(&row.payment_status)?,
            payment_date: row
                .payment_date
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            booking_details,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

pub(crate) fn parse_payment_status(s: &str) -> Result<PaymentStatus> {
    match s {
        "pending" => Ok(PaymentStatus::Pending),
        "completed" => Ok(PaymentStatus::Completed),
        "failed" => Ok(PaymentStatus::Failed),
        _ => Err(AppError::Database(format!("Invalid payment status: {}", s))),
    }
}

pub(crate) fn payment_status_to_str(status: &PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, experience_id, amount_cents, transaction_id,
           payment_status, payment_date, booking_details,
           created_at, updated_at
    FROM registrations
"#;

#[async_trait]
impl RegistrationRepository for SqliteRegistrationRepository {
    async fn create(&self, registration: Registration) -> Result<Registration> {
        let details_json = serde_json::to_string(&registration.booking_details)
            .map_err(|e| AppError::Internal(format!("Failed to encode booking details: {}", e)))?;
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO registrations (
                id, user_id, experience_id, amount_cents, transaction_id,
                payment_status, payment_date, booking_details,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(registration.id.to_string())
        .bind(registration.user_id.to_string())
        .bind(registration.experience_id.to_string())
        .bind(registration.amount_cents)
        .bind(&registration.transaction_id)
        .bind(payment_status_to_str(&registration.payment_status))
        .bind(registration.payment_date.map(|dt| dt.naive_utc()))
        .bind(&details_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(registration.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created registration".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Registration>> {
        let row = sqlx::query_as::<_, RegistrationRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_registration(r)?)),
            None => Ok(None),
        }
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Registration>> {
        let rows = sqlx::query_as::<_, RegistrationRow>(&format!(
            "{} WHERE user_id = ? ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_registration).collect()
    }

    async fn attach_transaction(&self, id: Uuid, merchant_transaction_id: &str) -> Result<()> {
        let now = Utc::now().naive_utc();
        // A new attempt may only be attached while the registration is
        // still pending. Completed and failed are terminal here too: a
        // notification that resolved the registration between the
        // caller's read and this write must not be undone.
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET transaction_id = ?,
                updated_at = ?
            WHERE id = ? AND payment_status = 'pending'
            "#,
        )
        .bind(merchant_transaction_id)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Registration {} is not awaiting payment",
                id
            )));
        }
        Ok(())
    }

    async fn mark_payment_result(
        &self,
        id: Uuid,
        status: PaymentStatus,
        payment_date: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        // Only pending registrations move; completed and failed are
        // terminal, so a late or duplicate notification changes nothing
        // and the caller can tell from the row count.
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET payment_status = ?,
                payment_date = COALESCE(?, payment_date),
                updated_at = ?
            WHERE id = ? AND payment_status = 'pending'
            "#,
        )
        .bind(payment_status_to_str(&status))
        .bind(payment_date.map(|dt| dt.naive_utc()))
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
