use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One customer's intent to attend an experience. Created when the
/// booking form is submitted; the payment fields are owned by the
/// payment orchestrator and callback processor afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub experience_id: Uuid,
    pub amount_cents: i64,
    /// Merchant transaction id of the current payment attempt. May
    /// briefly point at a rolled-back attempt; the next attempt
    /// overwrites it.
    pub transaction_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_date: Option<DateTime<Utc>>,
    pub booking_details: BookingDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `Pending -> Completed` and `Pending -> Failed` are the only legal
/// transitions. Both outcomes are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BookingDetails {
    pub tickets: Vec<TicketLine>,
    #[serde(default)]
    pub food: Vec<FoodLine>,
    pub emergency_contact: EmergencyContact,
    #[serde(default)]
    pub dietary_notes: Option<String>,
}

impl BookingDetails {
    /// Seats counted against the experience's capacity.
    pub fn ticket_count(&self) -> i64 {
        self.tickets.iter().map(|t| t.quantity).sum()
    }

    /// Server-side total, in minor units.
    pub fn total_cents(&self) -> i64 {
        let tickets: i64 = self
            .tickets
            .iter()
            .map(|t| t.quantity * t.unit_price_cents)
            .sum();
        let food: i64 = self
            .food
            .iter()
            .map(|f| f.quantity * f.unit_price_cents)
            .sum();
        tickets + food
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketLine {
    pub label: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoodLine {
    pub label: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relationship: Option<String>,
}
