use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::PaymentStatus;

/// One attempt to collect payment for a registration. Kept forever as
/// an audit trail, except when the same attempt fails irrecoverably
/// before the user ever saw the pay page and is rolled back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    /// Nullable until the registration row has been linked back.
    pub registration_id: Option<Uuid>,
    /// Merchant-generated id sent to the gateway. Globally unique; a
    /// fresh one is minted per orchestration attempt.
    pub merchant_transaction_id: String,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    /// Raw gateway payload from the last notification, for audits.
    pub gateway_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
