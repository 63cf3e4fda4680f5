use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bookable outing (trek, camp, workshop) with a hard seat cap.
///
/// `current_participants` is provisionally incremented when a booking
/// is created and released by the capacity reconciler if the payment
/// ultimately fails. All mutation goes through the atomic repository
/// operations; application code never read-modify-writes the counters.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Experience {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub start_date: DateTime<Utc>,
    pub ticket_price_cents: i64,
    pub total_capacity: i64,
    pub current_participants: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experience {
    pub fn spots_left(&self) -> i64 {
        (self.total_capacity - self.current_participants).max(0)
    }
}
