use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::state::AppState,
    domain::PaymentStatus,
    error::{AppError, Result},
    payments::service::{OrchestrationOutcome, MAX_ORCHESTRATION_ATTEMPTS},
};

#[derive(Deserialize, Validate)]
pub struct InitiatePaymentBody {
    pub registration_id: Uuid,
    #[validate(length(min = 10, max = 15))]
    pub mobile_number: String,
}

#[derive(Serialize)]
pub struct InitiatePaymentResponse {
    pub success: bool,
    pub payment_url: Option<String>,
    pub merchant_transaction_id: Option<String>,
    pub error: Option<String>,
    pub retryable: bool,
}

/// Starts payment collection for a registration. Runs the full
/// orchestration retry loop, so a transient gateway hiccup is absorbed
/// here rather than bounced to the booking UI.
pub async fn initiate(
    State(state): State<AppState>,
    Json(body): Json<InitiatePaymentBody>,
) -> Result<Json<InitiatePaymentResponse>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let registration = state
        .registration_repo
        .find_by_id(body.registration_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Registration {} not found", body.registration_id))
        })?;

    // Only a pending registration may start payment collection. A
    // failed one already gave its seats back, so retrying it would
    // re-open the capacity-release path; the customer books again
    // instead.
    match registration.payment_status {
        PaymentStatus::Pending => {}
        PaymentStatus::Completed => {
            return Err(AppError::Conflict(
                "Registration is already paid".to_string(),
            ));
        }
        PaymentStatus::Failed => {
            return Err(AppError::Conflict(
                "Payment for this registration already failed; create a new booking".to_string(),
            ));
        }
    }

    let outcome = state
        .payment_service
        .initiate_with_retries(
            registration.id,
            registration.amount_cents,
            registration.user_id,
            &body.mobile_number,
            MAX_ORCHESTRATION_ATTEMPTS,
        )
        .await?;

    let response = match outcome {
        OrchestrationOutcome::Success {
            payment_url,
            merchant_transaction_id,
        } => InitiatePaymentResponse {
            success: true,
            payment_url: Some(payment_url),
            merchant_transaction_id: Some(merchant_transaction_id),
            error: None,
            retryable: false,
        },
        // Provider codes stay in the logs and the event trail; the
        // client only learns whether trying again is worthwhile.
        OrchestrationOutcome::Retryable { .. } => InitiatePaymentResponse {
            success: false,
            payment_url: None,
            merchant_transaction_id: None,
            error: Some("Payment could not be started, please try again".to_string()),
            retryable: true,
        },
        OrchestrationOutcome::Fatal { .. } => InitiatePaymentResponse {
            success: false,
            payment_url: None,
            merchant_transaction_id: None,
            error: Some("Payment could not be started".to_string()),
            retryable: false,
        },
    };

    Ok(Json(response))
}

/// Poll endpoint for the booking UI. Answers "still pending" any number
/// of times; an id the store does not know (for example one that was
/// rolled back) also reads as pending until a new attempt or a late
/// notification resolves it.
pub async fn status(
    State(state): State<AppState>,
    Path(merchant_transaction_id): Path<String>,
) -> Result<Json<Value>> {
    let transaction = state
        .transaction_repo
        .find_by_merchant_id(&merchant_transaction_id)
        .await?;

    let body = match transaction {
        Some(t) => json!({
            "merchant_transaction_id": t.merchant_transaction_id,
            "status": t.status,
            "registration_id": t.registration_id,
            "resolved": t.status != PaymentStatus::Pending,
        }),
        None => json!({
            "merchant_transaction_id": merchant_transaction_id,
            "status": PaymentStatus::Pending,
            "registration_id": null,
            "resolved": false,
        }),
    };

    Ok(Json(body))
}
