//! Payment orchestrator.
//!
//! Drives one payment attempt across the gateway and the two persisted
//! records that must stay in agreement: the pending transaction row and
//! the registration pointing at it. There is no distributed
//! transaction, so ordering and rollback carry the consistency burden:
//! the transaction row exists before the registration references it,
//! and a fatal failure deletes the row again.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    domain::{PaymentEventKind, PaymentStatus, PaymentTransaction},
    error::Result,
    payments::phonepe::{GatewayOutcome, InitiatePaymentRequest, PaymentGateway},
    repository::{PaymentEventRepository, RegistrationRepository, TransactionRepository},
};

/// Orchestration-level attempt cap, on top of the gateway client's own
/// HTTP retries. Each attempt here uses a fresh merchant transaction id.
pub const MAX_ORCHESTRATION_ATTEMPTS: u32 = 3;

const RETRY_HINT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub enum OrchestrationOutcome {
    Success {
        payment_url: String,
        merchant_transaction_id: String,
    },
    /// The attempt failed but the transaction row was kept pending: a
    /// later attempt or an eventual late webhook can still resolve it.
    Retryable {
        code: String,
        message: String,
        retry_after: Duration,
    },
    /// Rolled back; the caller should show a failure and may start
    /// over from scratch.
    Fatal { code: String, message: String },
}

pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    transaction_repo: Arc<dyn TransactionRepository>,
    registration_repo: Arc<dyn RegistrationRepository>,
    event_log: Arc<dyn PaymentEventRepository>,
    /// Externally reachable base URL for redirect/callback routes.
    base_url: String,
}

impl PaymentService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        transaction_repo: Arc<dyn TransactionRepository>,
        registration_repo: Arc<dyn RegistrationRepository>,
        event_log: Arc<dyn PaymentEventRepository>,
        base_url: String,
    ) -> Self {
        Self {
            gateway,
            transaction_repo,
            registration_repo,
            event_log,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// One payment attempt for a registration. The amount has already
    /// been validated against the registration's line items by the
    /// booking handler.
    pub async fn initiate_payment(
        &self,
        registration_id: Uuid,
        amount_cents: i64,
        user_id: Uuid,
        mobile_number: &str,
    ) -> Result<OrchestrationOutcome> {
        let merchant_transaction_id = mint_transaction_id();

        let transaction = self
            .transaction_repo
            .create(PaymentTransaction {
                id: Uuid::new_v4(),
                registration_id: Some(registration_id),
                merchant_transaction_id: merchant_transaction_id.clone(),
                amount_cents,
                status: PaymentStatus::Pending,
                gateway_response: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await?;

        // Link the registration to this attempt before the gateway is
        // involved. If the link fails the fresh transaction row is
        // removed again so the two records never disagree about which
        // attempt is current.
        if let Err(e) = self
            .registration_repo
            .attach_transaction(registration_id, &merchant_transaction_id)
            .await
        {
            tracing::error!(
                registration_id = %registration_id,
                merchant_transaction_id = %merchant_transaction_id,
                error = %e,
                "Failed to link registration to transaction"
            );
            self.rollback_transaction(&transaction).await;
            return Ok(OrchestrationOutcome::Fatal {
                code: "REGISTRATION_UPDATE_FAILED".to_string(),
                message: "Could not start the payment".to_string(),
            });
        }

        let callback_url = format!("{}/payment/callback/{}", self.base_url, merchant_transaction_id);
        let request = InitiatePaymentRequest {
            amount_cents,
            merchant_transaction_id: merchant_transaction_id.clone(),
            merchant_user_id: user_id.to_string(),
            redirect_url: callback_url.clone(),
            callback_url,
            mobile_number: mobile_number.to_string(),
        };

        match self.gateway.initiate_payment(&request).await? {
            GatewayOutcome::Success { payment_url, .. } => {
                tracing::info!(
                    registration_id = %registration_id,
                    merchant_transaction_id = %merchant_transaction_id,
                    "Payment attempt started"
                );
                Ok(OrchestrationOutcome::Success {
                    payment_url,
                    merchant_transaction_id,
                })
            }
            GatewayOutcome::Failure {
                code,
                message,
                should_retry: true,
            } => {
                // No rollback: the pending row lets a later attempt or
                // a late webhook still resolve this id.
                tracing::warn!(
                    merchant_transaction_id = %merchant_transaction_id,
                    code = %code,
                    "Retryable gateway failure"
                );
                Ok(OrchestrationOutcome::Retryable {
                    code,
                    message,
                    retry_after: RETRY_HINT,
                })
            }
            GatewayOutcome::Failure {
                code,
                message,
                should_retry: false,
            } => {
                self.rollback_transaction(&transaction).await;
                Ok(OrchestrationOutcome::Fatal { code, message })
            }
        }
    }

    /// Orchestration-level retry loop: a fresh merchant transaction id
    /// per attempt (the gateway requires uniqueness per attempt), the
    /// hinted delay between attempts, capped at `max_attempts`.
    pub async fn initiate_with_retries(
        &self,
        registration_id: Uuid,
        amount_cents: i64,
        user_id: Uuid,
        mobile_number: &str,
        max_attempts: u32,
    ) -> Result<OrchestrationOutcome> {
        let max_attempts = max_attempts.clamp(1, MAX_ORCHESTRATION_ATTEMPTS);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = self
                .initiate_payment(registration_id, amount_cents, user_id, mobile_number)
                .await?;

            match outcome {
                // The final attempt's outcome is returned as-is, even
                // when it is still retryable.
                OrchestrationOutcome::Retryable { retry_after, .. }
                    if attempt < max_attempts =>
                {
                    tokio::time::sleep(retry_after).await;
                }
                other => return Ok(other),
            }
        }
    }

    /// Last-resort cleanup. Failures are logged, never propagated: a
    /// rollback error must not mask the failure that triggered it.
    async fn rollback_transaction(&self, transaction: &PaymentTransaction) {
        if let Err(e) = self.transaction_repo.delete(transaction.id).await {
            tracing::error!(
                merchant_transaction_id = %transaction.merchant_transaction_id,
                error = %e,
                "Rollback failed; transaction row left behind for manual cleanup"
            );
            return;
        }

        if let Err(e) = self
            .event_log
            .append(
                &transaction.merchant_transaction_id,
                PaymentEventKind::RolledBack,
                Some(serde_json::json!({
                    "registration_id": transaction.registration_id,
                    "amount_cents": transaction.amount_cents,
                })),
            )
            .await
        {
            tracing::warn!(
                merchant_transaction_id = %transaction.merchant_transaction_id,
                error = %e,
                "Failed to record rollback event"
            );
        }
    }
}

/// Merchant transaction ids must be unique per attempt at the gateway:
/// millisecond timestamp plus a random suffix, namespaced with a fixed
/// prefix.
pub fn mint_transaction_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x1000000);
    format!("TP-{}-{:06X}", Utc::now().timestamp_millis(), suffix)
}

impl OrchestrationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OrchestrationOutcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_namespaced_and_distinct() {
        let a = mint_transaction_id();
        let b = mint_transaction_id();
        assert!(a.starts_with("TP-"));
        assert_ne!(a, b);
    }
}
