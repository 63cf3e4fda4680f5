use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::Experience,
    error::{AppError, Result},
    repository::ExperienceRepository,
};

#[derive(FromRow)]
struct ExperienceRow {
    id: String,
    title: String,
    description: String,
    location: Option<String>,
    start_date: NaiveDateTime,
    ticket_price_cents: i64,
    total_capacity: i64,
    current_participants: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteExperienceRepository {
    pool: SqlitePool,
}

impl SqliteExperienceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_experience(row: ExperienceRow) -> Result<Experience> {
        Ok(Experience {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            title: row.title,
            description: row.description,
            location: row.location,
            start_date: DateTime::from_naive_utc_and_offset(row.start_date, Utc),
            ticket_price_cents: row.ticket_price_cents,
            total_capacity: row.total_capacity,
            current_participants: row.current_participants,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, title, description, location, start_date,
           ticket_price_cents, total_capacity, current_participants,
           created_at, updated_at
    FROM experiences
"#;

#[async_trait]
impl ExperienceRepository for SqliteExperienceRepository {
    async fn create(&self, experience: Experience) -> Result<Experience> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO experiences (
                id, title, description, location, start_date,
                ticket_price_cents, total_capacity, current_participants,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(experience.id.to_string())
        .bind(&experience.title)
        .bind(&experience.description)
        .bind(&experience.location)
        .bind(experience.start_date.naive_utc())
        .bind(experience.ticket_price_cents)
        .bind(experience.total_capacity)
        .bind(experience.current_participants)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(experience.id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created experience".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Experience>> {
        let row = sqlx::query_as::<_, ExperienceRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_experience(r)?)),
            None => Ok(None),
        }
    }

    async fn list_open(&self) -> Result<Vec<Experience>> {
        let rows = sqlx::query_as::<_, ExperienceRow>(&format!(
            "{} WHERE current_participants < total_capacity ORDER BY start_date ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_experience).collect()
    }

    async fn reserve_spots(&self, id: Uuid, count: i64) -> Result<bool> {
        let now = Utc::now().naive_utc();
        // Guard and increment in one statement so two concurrent
        // bookings cannot both claim the last seats.
        let result = sqlx::query(
            r#"
            UPDATE experiences
            SET current_participants = current_participants + ?,
                updated_at = ?
            WHERE id = ? AND current_participants + ? <= total_capacity
            "#,
        )
        .bind(count)
        .bind(now)
        .bind(id.to_string())
        .bind(count)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_spots(&self, id: Uuid, count: i64) -> Result<()> {
        let now = Utc::now().naive_utc();
        // Single atomic decrement, floored at zero. Reading the counter
        // first and writing it back would let two concurrent failures
        // release the same seats twice.
        let result = sqlx::query(
            r#"
            UPDATE experiences
            SET current_participants = MAX(current_participants - ?, 0),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(count)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Experience {} not found", id)));
        }
        Ok(())
    }
}
