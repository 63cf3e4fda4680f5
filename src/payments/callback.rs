//! Callback/webhook processor.
//!
//! Both inbound channels land here: the signed server-to-server POST
//! webhook (HMAC over the raw body) and the redirect-style callback the
//! browser delivers when the customer returns from the pay page
//! (salted-SHA256 checksum keyed to the callback path). Either may
//! arrive first, both may arrive, or neither; the only protection
//! against double-processing is the conditional status update in
//! `apply_outcome`. Each processing step is appended to the payment
//! event log for audits.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    config::GatewayConfig,
    domain::{PaymentEventKind, PaymentStatus},
    error::{AppError, Result},
    payments::{checksum, reconciler::CapacityReconciler},
    repository::{PaymentEventRepository, RegistrationRepository, TransactionRepository},
};

/// Provider result code that maps to a completed payment. Every other
/// code is a failure.
const SUCCESS_CODE: &str = "PAYMENT_SUCCESS";

pub struct CallbackProcessor {
    transaction_repo: Arc<dyn TransactionRepository>,
    registration_repo: Arc<dyn RegistrationRepository>,
    event_log: Arc<dyn PaymentEventRepository>,
    reconciler: Arc<CapacityReconciler>,
    gateway_config: GatewayConfig,
}

/// A decoded notification, whichever channel it came through.
#[derive(Debug)]
struct Notification {
    merchant_transaction_id: String,
    code: String,
    raw: serde_json::Value,
}

impl CallbackProcessor {
    pub fn new(
        transaction_repo: Arc<dyn TransactionRepository>,
        registration_repo: Arc<dyn RegistrationRepository>,
        event_log: Arc<dyn PaymentEventRepository>,
        reconciler: Arc<CapacityReconciler>,
        gateway_config: GatewayConfig,
    ) -> Self {
        Self {
            transaction_repo,
            registration_repo,
            event_log,
            reconciler,
            gateway_config,
        }
    }

    /// Server-to-server webhook: HMAC-verified against the raw body
    /// exactly as received, before anything is parsed in earnest.
    pub async fn process_webhook(&self, raw_body: &[u8], signature: Option<&str>) -> Result<()> {
        // Best-effort id for the log; nothing is trusted until the
        // signature checks out.
        let provisional_id = peek_transaction_id(raw_body);
        self.log(&provisional_id, PaymentEventKind::Received, None).await;

        let Some(signature) = signature else {
            self.log(
                &provisional_id,
                PaymentEventKind::SignatureVerificationFailed,
                Some(serde_json::json!({"reason": "missing_signature"})),
            )
            .await;
            return Err(AppError::InvalidSignature);
        };

        if !checksum::verify_webhook_signature(
            raw_body,
            &self.gateway_config.webhook_secret,
            signature,
        ) {
            self.log(
                &provisional_id,
                PaymentEventKind::SignatureVerificationFailed,
                None,
            )
            .await;
            return Err(AppError::InvalidSignature);
        }

        let notification = match decode_notification(raw_body) {
            Ok(n) => n,
            Err(e) => {
                self.log(
                    &provisional_id,
                    PaymentEventKind::InvalidRequest,
                    Some(serde_json::json!({"reason": e.to_string()})),
                )
                .await;
                return Err(e);
            }
        };

        self.log(
            &notification.merchant_transaction_id,
            PaymentEventKind::ResponseDecoded,
            Some(serde_json::json!({"code": notification.code})),
        )
        .await;

        self.apply_outcome(notification).await
    }

    /// Redirect callback, POST variant: `{"response": "<base64 json>"}`
    /// with an X-VERIFY checksum keyed to this transaction's callback
    /// path.
    pub async fn process_redirect_post(
        &self,
        merchant_transaction_id: &str,
        encoded_response: &str,
        x_verify: Option<&str>,
    ) -> Result<()> {
        self.log(merchant_transaction_id, PaymentEventKind::Received, None)
            .await;

        let data = format!(
            "{}/payment/callback/{}",
            encoded_response, merchant_transaction_id
        );
        if !self.verify_redirect_checksum(&data, x_verify) {
            self.log(
                merchant_transaction_id,
                PaymentEventKind::SignatureVerificationFailed,
                None,
            )
            .await;
            return Err(AppError::InvalidSignature);
        }

        let decoded = BASE64
            .decode(encoded_response)
            .map_err(|_| AppError::BadRequest("Invalid base64 response".to_string()))
            .and_then(|bytes| decode_notification(&bytes));

        let notification = match decoded {
            Ok(n) => n,
            Err(e) => {
                self.log(
                    merchant_transaction_id,
                    PaymentEventKind::InvalidRequest,
                    Some(serde_json::json!({"reason": e.to_string()})),
                )
                .await;
                return Err(e);
            }
        };

        if notification.merchant_transaction_id != merchant_transaction_id {
            self.log(
                merchant_transaction_id,
                PaymentEventKind::InvalidRequest,
                Some(serde_json::json!({"reason": "transaction_id_mismatch"})),
            )
            .await;
            return Err(AppError::BadRequest(
                "Transaction id does not match callback path".to_string(),
            ));
        }

        self.log(
            merchant_transaction_id,
            PaymentEventKind::ResponseDecoded,
            Some(serde_json::json!({"code": notification.code})),
        )
        .await;

        self.apply_outcome(notification).await
    }

    /// Redirect callback, GET variant: a bare status code in the query
    /// string, checksummed over `{code}/payment/callback/{id}`. A
    /// missing checksum is treated like a bad one.
    pub async fn process_redirect_get(
        &self,
        merchant_transaction_id: &str,
        code: &str,
        checksum_param: Option<&str>,
    ) -> Result<()> {
        self.log(merchant_transaction_id, PaymentEventKind::Received, None)
            .await;

        let data = format!("{}/payment/callback/{}", code, merchant_transaction_id);
        if !self.verify_redirect_checksum(&data, checksum_param) {
            self.log(
                merchant_transaction_id,
                PaymentEventKind::SignatureVerificationFailed,
                None,
            )
            .await;
            return Err(AppError::InvalidSignature);
        }

        self.log(
            merchant_transaction_id,
            PaymentEventKind::ResponseDecoded,
            Some(serde_json::json!({"code": code})),
        )
        .await;

        self.apply_outcome(Notification {
            merchant_transaction_id: merchant_transaction_id.to_string(),
            code: code.to_string(),
            raw: serde_json::json!({"code": code, "channel": "redirect"}),
        })
        .await
    }

    fn verify_redirect_checksum(&self, data: &str, received: Option<&str>) -> bool {
        match received {
            Some(value) => checksum::verify_x_verify(data, &self.gateway_config.salt_key, value),
            None => false,
        }
    }

    /// The state transition shared by every channel.
    async fn apply_outcome(&self, notification: Notification) -> Result<()> {
        let merchant_transaction_id = notification.merchant_transaction_id.clone();
        let resolved = if notification.code == SUCCESS_CODE {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        };

        let Some(transaction) = self
            .transaction_repo
            .find_by_merchant_id(&merchant_transaction_id)
            .await?
        else {
            // Terminal for this request; the gateway may retry
            // delivery and a later attempt may find the row.
            self.log(
                &merchant_transaction_id,
                PaymentEventKind::InvalidRequest,
                Some(serde_json::json!({"reason": "unknown_transaction"})),
            )
            .await;
            return Err(AppError::NotFound(format!(
                "Unknown transaction {}",
                merchant_transaction_id
            )));
        };

        // Idempotency guard: completed and failed are both terminal.
        // Duplicate or replayed notifications are acknowledged without
        // re-triggering any side effects.
        if transaction.status != PaymentStatus::Pending {
            self.log(&merchant_transaction_id, PaymentEventKind::DuplicateCallback, None)
                .await;
            return Ok(());
        }

        match self
            .transaction_repo
            .mark_result(&merchant_transaction_id, resolved, &notification.raw)
            .await
        {
            // Zero rows changed: a concurrent delivery won the race
            // after our read. Same as the duplicate case above.
            Ok(false) => {
                self.log(&merchant_transaction_id, PaymentEventKind::DuplicateCallback, None)
                    .await;
                return Ok(());
            }
            Ok(true) => {}
            Err(e) => {
                self.log(
                    &merchant_transaction_id,
                    PaymentEventKind::TransactionUpdateError,
                    Some(serde_json::json!({"error": e.to_string()})),
                )
                .await;
                return Err(AppError::Internal(format!(
                    "Failed to update transaction {}: {}",
                    merchant_transaction_id, e
                )));
            }
        }

        let Some(registration_id) = transaction.registration_id else {
            // Unlinked transaction; nothing more to update but the
            // notification itself was processed.
            self.log(&merchant_transaction_id, PaymentEventKind::Processed, None)
                .await;
            return Ok(());
        };

        let payment_date = (resolved == PaymentStatus::Completed).then(Utc::now);
        let registration_changed = match self
            .registration_repo
            .mark_payment_result(registration_id, resolved, payment_date)
            .await
        {
            Ok(changed) => changed,
            Err(e) => {
                // The transaction row already moved. Log enough to
                // reconcile by hand; automatic rollback is not safe
                // here since the customer may already have paid.
                self.log(
                    &merchant_transaction_id,
                    PaymentEventKind::RegistrationUpdateError,
                    Some(serde_json::json!({
                        "registration_id": registration_id,
                        "attempted_status": resolved,
                        "error": e.to_string(),
                    })),
                )
                .await;
                return Err(AppError::Internal(format!(
                    "Failed to update registration {}: {}",
                    registration_id, e
                )));
            }
        };

        // Seats go back only when this notification actually moved the
        // registration into failed. A second failed attempt for a
        // registration that already released its seats must not
        // release them again.
        if resolved == PaymentStatus::Failed && registration_changed {
            self.release_capacity(&merchant_transaction_id, registration_id)
                .await;
        }

        self.log(
            &merchant_transaction_id,
            PaymentEventKind::Processed,
            Some(serde_json::json!({"status": resolved})),
        )
        .await;

        tracing::info!(
            merchant_transaction_id = %merchant_transaction_id,
            registration_id = %registration_id,
            status = ?resolved,
            "Payment notification processed"
        );
        Ok(())
    }

    /// Releases the registration's seats after a failed payment. A
    /// failure here is an inconsistency for manual reconciliation, not
    /// a reason to reject the notification.
    async fn release_capacity(&self, merchant_transaction_id: &str, registration_id: uuid::Uuid) {
        let registration = match self.registration_repo.find_by_id(registration_id).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                self.log(
                    merchant_transaction_id,
                    PaymentEventKind::CapacityReleaseError,
                    Some(serde_json::json!({
                        "registration_id": registration_id,
                        "reason": "registration_missing",
                    })),
                )
                .await;
                return;
            }
            Err(e) => {
                self.log(
                    merchant_transaction_id,
                    PaymentEventKind::CapacityReleaseError,
                    Some(serde_json::json!({
                        "registration_id": registration_id,
                        "error": e.to_string(),
                    })),
                )
                .await;
                return;
            }
        };

        let ticket_count = registration.booking_details.ticket_count();
        if let Err(e) = self
            .reconciler
            .release_tickets(registration.experience_id, ticket_count)
            .await
        {
            self.log(
                merchant_transaction_id,
                PaymentEventKind::CapacityReleaseError,
                Some(serde_json::json!({
                    "experience_id": registration.experience_id,
                    "ticket_count": ticket_count,
                    "error": e.to_string(),
                })),
            )
            .await;
        }
    }

    /// Event-log writes must never break payment processing.
    async fn log(
        &self,
        merchant_transaction_id: &str,
        kind: PaymentEventKind,
        detail: Option<serde_json::Value>,
    ) {
        if let Err(e) = self
            .event_log
            .append(merchant_transaction_id, kind, detail)
            .await
        {
            tracing::warn!(
                merchant_transaction_id = %merchant_transaction_id,
                kind = kind.as_str(),
                error = %e,
                "Failed to append payment event"
            );
        }
    }
}

/// Decodes either webhook body shape: the documented
/// `{"response": "<base64 json>"}` envelope, or the bare JSON the
/// sandbox simulator posts.
fn decode_notification(raw_body: &[u8]) -> Result<Notification> {
    let outer: serde_json::Value = serde_json::from_slice(raw_body)
        .map_err(|_| AppError::BadRequest("Invalid JSON body".to_string()))?;

    let inner = match outer.get("response").and_then(|v| v.as_str()) {
        Some(encoded) => {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|_| AppError::BadRequest("Invalid base64 response".to_string()))?;
            serde_json::from_slice(&bytes)
                .map_err(|_| AppError::BadRequest("Invalid JSON in response envelope".to_string()))?
        }
        None => outer,
    };

    // Provider payloads nest the interesting bits under `data`, except
    // when they don't.
    let merchant_transaction_id = inner
        .pointer("/data/merchantTransactionId")
        .or_else(|| inner.get("merchantTransactionId"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::BadRequest("Missing merchantTransactionId".to_string()))?
        .to_string();
    let code = inner
        .get("code")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::BadRequest("Missing result code".to_string()))?
        .to_string();

    Ok(Notification {
        merchant_transaction_id,
        code,
        raw: inner,
    })
}

/// Extracts a transaction id from an unverified body for log keying
/// only. Falls back to a fixed marker so rejected garbage still shows
/// up in the log.
fn peek_transaction_id(raw_body: &[u8]) -> String {
    decode_notification(raw_body)
        .map(|n| n.merchant_transaction_id)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_json_body() {
        let body = br#"{"merchantTransactionId":"TP-1-A","code":"PAYMENT_SUCCESS"}"#;
        let n = decode_notification(body).unwrap();
        assert_eq!(n.merchant_transaction_id, "TP-1-A");
        assert_eq!(n.code, "PAYMENT_SUCCESS");
    }

    #[test]
    fn decodes_base64_envelope() {
        let inner = serde_json::json!({
            "code": "PAYMENT_ERROR",
            "data": {"merchantTransactionId": "TP-2-B"}
        });
        let body = serde_json::json!({
            "response": BASE64.encode(serde_json::to_vec(&inner).unwrap())
        });
        let n = decode_notification(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(n.merchant_transaction_id, "TP-2-B");
        assert_eq!(n.code, "PAYMENT_ERROR");
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(decode_notification(b"not json").is_err());
        assert!(decode_notification(br#"{"code":"PAYMENT_SUCCESS"}"#).is_err());
        assert!(decode_notification(br#"{"merchantTransactionId":"TP-3-C"}"#).is_err());
    }
}
