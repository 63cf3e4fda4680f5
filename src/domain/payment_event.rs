use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only audit record, one per significant step while processing
/// a payment notification. Keyed by merchant transaction id so an
/// incident can be reconstructed with a single query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: Uuid,
    pub merchant_transaction_id: String,
    pub kind: PaymentEventKind,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    Received,
    InvalidRequest,
    SignatureVerificationFailed,
    ResponseDecoded,
    DuplicateCallback,
    TransactionUpdateError,
    RegistrationUpdateError,
    CapacityReleaseError,
    RolledBack,
    Processed,
}

impl PaymentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventKind::Received => "received",
            PaymentEventKind::InvalidRequest => "invalid_request",
            PaymentEventKind::SignatureVerificationFailed => "signature_verification_failed",
            PaymentEventKind::ResponseDecoded => "response_decoded",
            PaymentEventKind::DuplicateCallback => "duplicate_callback",
            PaymentEventKind::TransactionUpdateError => "transaction_update_error",
            PaymentEventKind::RegistrationUpdateError => "registration_update_error",
            PaymentEventKind::CapacityReleaseError => "capacity_release_error",
            PaymentEventKind::RolledBack => "rolled_back",
            PaymentEventKind::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "received" => PaymentEventKind::Received,
            "invalid_request" => PaymentEventKind::InvalidRequest,
            "signature_verification_failed" => PaymentEventKind::SignatureVerificationFailed,
            "response_decoded" => PaymentEventKind::ResponseDecoded,
            "duplicate_callback" => PaymentEventKind::DuplicateCallback,
            "transaction_update_error" => PaymentEventKind::TransactionUpdateError,
            "registration_update_error" => PaymentEventKind::RegistrationUpdateError,
            "capacity_release_error" => PaymentEventKind::CapacityReleaseError,
            "rolled_back" => PaymentEventKind::RolledBack,
            "processed" => PaymentEventKind::Processed,
            _ => return None,
        })
    }
}
