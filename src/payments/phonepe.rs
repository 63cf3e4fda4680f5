//! PhonePe pay-page client.
//!
//! Wraps the `/pg/v1/pay` contract: build the request envelope, base64
//! it, sign with X-VERIFY, POST, and classify the response into a
//! tagged outcome. Transient failures are retried here with bounded
//! exponential backoff, always reusing the same merchant transaction id
//! (the gateway treats duplicate init calls for one id as safe
//! retries). Minting a *new* id is the orchestrator's decision, never
//! this client's.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

use crate::{
    config::GatewayConfig,
    error::{AppError, Result},
    payments::checksum,
};

pub const PAY_ENDPOINT: &str = "/pg/v1/pay";

/// Provider result codes that indicate the request may succeed if
/// simply tried again.
const TRANSIENT_CODES: &[&str] = &["INTERNAL_SERVER_ERROR", "TOO_MANY_REQUESTS", "TIMED_OUT"];

#[derive(Debug, Clone)]
pub struct InitiatePaymentRequest {
    pub amount_cents: i64,
    pub merchant_transaction_id: String,
    pub merchant_user_id: String,
    pub redirect_url: String,
    pub callback_url: String,
    pub mobile_number: String,
}

/// Tagged result of an init call. Provider-level failures are values,
/// not `Err`: only infrastructure problems (request building, config)
/// surface as errors.
#[derive(Debug, Clone)]
pub enum GatewayOutcome {
    Success {
        payment_url: String,
        raw: serde_json::Value,
    },
    Failure {
        code: String,
        message: String,
        /// Whether the orchestrator may reasonably start another
        /// attempt (with a fresh merchant transaction id).
        should_retry: bool,
    },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_payment(&self, request: &InitiatePaymentRequest) -> Result<GatewayOutcome>;

    /// Diagnostic ping with a throwaway payload; not on the booking path.
    async fn verify_credentials(&self) -> Result<bool>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PayPayload<'a> {
    merchant_id: &'a str,
    merchant_transaction_id: &'a str,
    merchant_user_id: &'a str,
    amount: i64,
    redirect_url: &'a str,
    redirect_mode: &'a str,
    callback_url: &'a str,
    payment_instrument: PaymentInstrument<'a>,
    mobile_number: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentInstrument<'a> {
    #[serde(rename = "type")]
    instrument_type: &'a str,
}

#[derive(Serialize)]
struct PayEnvelope {
    request: String,
}

pub struct PhonePeClient {
    http: reqwest::Client,
    config: GatewayConfig,
    base_url: String,
}

impl PhonePeClient {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        let base_url = config.api_base_url().to_string();
        Ok(Self {
            http,
            config,
            base_url,
        })
    }

    /// Overrides the API base URL. Used by tests pointing the client at
    /// a local stub server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn encode_and_sign(&self, request: &InitiatePaymentRequest) -> Result<(String, String)> {
        let digits_only: String = request
            .mobile_number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();

        let payload = PayPayload {
            merchant_id: &self.config.merchant_id,
            merchant_transaction_id: &request.merchant_transaction_id,
            merchant_user_id: &request.merchant_user_id,
            amount: request.amount_cents,
            redirect_url: &request.redirect_url,
            redirect_mode: "POST",
            callback_url: &request.callback_url,
            payment_instrument: PaymentInstrument {
                instrument_type: "PAY_PAGE",
            },
            mobile_number: digits_only,
        };

        let json = serde_json::to_vec(&payload)
            .map_err(|e| AppError::Internal(format!("Failed to encode pay payload: {}", e)))?;
        let encoded = BASE64.encode(json);
        let signature = checksum::x_verify(
            &format!("{}{}", encoded, PAY_ENDPOINT),
            &self.config.salt_key,
            self.config.salt_index,
        );
        Ok((encoded, signature))
    }

    async fn attempt(&self, encoded: &str, signature: &str) -> Result<AttemptResult> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, PAY_ENDPOINT))
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("X-VERIFY", signature)
            .header("X-MERCHANT-ID", &self.config.merchant_id)
            .json(&PayEnvelope {
                request: encoded.to_string(),
            })
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return Ok(AttemptResult::Transient {
                    code: "NETWORK".to_string(),
                    message: e.to_string(),
                });
            }
            Err(e) => {
                return Err(AppError::Gateway(format!("Request failed: {}", e)));
            }
        };

        let status = response.status();
        if is_transient_status(status) {
            return Ok(AttemptResult::Transient {
                code: format!("HTTP_{}", status.as_u16()),
                message: "Transient gateway status".to_string(),
            });
        }

        let body: serde_json::Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                return Ok(AttemptResult::Terminal {
                    code: "INVALID_RESPONSE".to_string(),
                    message: format!("Unparseable gateway response: {}", e),
                });
            }
        };

        let success = body.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        let code = body
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("UNKNOWN")
            .to_string();

        if !status.is_success() || !success {
            let message = body
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Gateway rejected the payment request")
                .to_string();
            if TRANSIENT_CODES.contains(&code.as_str()) {
                return Ok(AttemptResult::Transient { code, message });
            }
            return Ok(AttemptResult::Terminal { code, message });
        }

        let payment_url = body
            .pointer("/data/instrumentResponse/redirectInfo/url")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        match payment_url {
            Some(url) => Ok(AttemptResult::Success {
                payment_url: url,
                raw: body,
            }),
            // An OK response without a pay-page URL is unusable even
            // though the call "succeeded".
            None => Ok(AttemptResult::Terminal {
                code: "INVALID_RESPONSE".to_string(),
                message: "Gateway response missing redirect URL".to_string(),
            }),
        }
    }
}

enum AttemptResult {
    Success {
        payment_url: String,
        raw: serde_json::Value,
    },
    Transient {
        code: String,
        message: String,
    },
    Terminal {
        code: String,
        message: String,
    },
}

#[async_trait]
impl PaymentGateway for PhonePeClient {
    async fn initiate_payment(&self, request: &InitiatePaymentRequest) -> Result<GatewayOutcome> {
        let (encoded, signature) = self.encode_and_sign(request)?;

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_transient: Option<(String, String)> = None;

        for attempt in 1..=max_attempts {
            match self.attempt(&encoded, &signature).await? {
                AttemptResult::Success { payment_url, raw } => {
                    tracing::info!(
                        merchant_transaction_id = %request.merchant_transaction_id,
                        attempt,
                        "Payment initiated"
                    );
                    return Ok(GatewayOutcome::Success { payment_url, raw });
                }
                AttemptResult::Terminal { code, message } => {
                    tracing::warn!(
                        merchant_transaction_id = %request.merchant_transaction_id,
                        code = %code,
                        "Terminal gateway failure"
                    );
                    return Ok(GatewayOutcome::Failure {
                        code,
                        message,
                        should_retry: false,
                    });
                }
                AttemptResult::Transient { code, message } => {
                    tracing::warn!(
                        merchant_transaction_id = %request.merchant_transaction_id,
                        code = %code,
                        attempt,
                        "Transient gateway failure"
                    );
                    last_transient = Some((code, message));
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff_delay(
                            attempt,
                            self.config.retry_base_ms,
                            self.config.retry_cap_ms,
                        ))
                        .await;
                    }
                }
            }
        }

        let (code, message) =
            last_transient.unwrap_or_else(|| ("UNKNOWN".to_string(), "Retries exhausted".to_string()));
        Ok(GatewayOutcome::Failure {
            code,
            message,
            should_retry: true,
        })
    }

    async fn verify_credentials(&self) -> Result<bool> {
        let probe = InitiatePaymentRequest {
            amount_cents: 100,
            merchant_transaction_id: format!("PROBE-{}", chrono::Utc::now().timestamp_millis()),
            merchant_user_id: "credential-probe".to_string(),
            redirect_url: "https://localhost/probe".to_string(),
            callback_url: "https://localhost/probe".to_string(),
            mobile_number: "9999999999".to_string(),
        };
        let (encoded, signature) = self.encode_and_sign(&probe)?;
        match self.attempt(&encoded, &signature).await? {
            AttemptResult::Success { .. } => Ok(true),
            // Anything except an auth-ish rejection means the key pair
            // was at least accepted.
            AttemptResult::Terminal { code, .. } => {
                Ok(code != "KEY_NOT_CONFIGURED" && code != "401" && code != "UNAUTHORIZED")
            }
            AttemptResult::Transient { .. } => Ok(true),
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        408 | 429 | 500 | 502 | 503 | 504
    )
}

/// Exponential backoff with ±20% jitter: `base * 2^(n-1)` capped, where
/// `attempt` is the 1-based attempt that just failed.
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(20));
    let capped = exp.min(cap_ms);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    let with_jitter = ((capped as f64) * jitter) as u64;
    Duration::from_millis(with_jitter.min(cap_ms))
}

#[cfg(any(test, feature = "test-utils"))]
pub use fake::FakeGateway;

#[cfg(any(test, feature = "test-utils"))]
mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Scripted gateway for tests: pops one outcome per call and
    /// records every request it saw.
    pub struct FakeGateway {
        outcomes: Mutex<Vec<GatewayOutcome>>,
        pub calls: Mutex<Vec<InitiatePaymentRequest>>,
    }

    impl FakeGateway {
        pub fn new(mut outcomes: Vec<GatewayOutcome>) -> Self {
            // Stored in pop order.
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn succeeding(payment_url: &str) -> Self {
            Self::new(vec![GatewayOutcome::Success {
                payment_url: payment_url.to_string(),
                raw: serde_json::json!({"success": true}),
            }])
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().expect("fake gateway lock").len()
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn initiate_payment(
            &self,
            request: &InitiatePaymentRequest,
        ) -> Result<GatewayOutcome> {
            self.calls
                .lock()
                .expect("fake gateway lock")
                .push(request.clone());
            self.outcomes
                .lock()
                .expect("fake gateway lock")
                .pop()
                .ok_or_else(|| AppError::Gateway("FakeGateway ran out of outcomes".to_string()))
        }

        async fn verify_credentials(&self) -> Result<bool> {
            Ok(true)
        }
    }
}
