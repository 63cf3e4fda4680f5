use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};

use trailpass::{
    config::GatewayConfig,
    payments::{GatewayOutcome, InitiatePaymentRequest, PaymentGateway, PhonePeClient},
};

/// Stub PhonePe that runs a scripted sequence of HTTP responses and
/// records what it was sent.
#[derive(Clone)]
struct StubState {
    hits: Arc<AtomicUsize>,
    /// (X-VERIFY header, request body) per attempt.
    seen: Arc<Mutex<Vec<(String, Value)>>>,
    /// Status codes to emit before the final response.
    failures: Arc<Vec<u16>>,
    /// Final response body once the failures are used up.
    final_response: Arc<Value>,
    final_status: u16,
}

async fn stub_pay(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    let x_verify = headers
        .get("x-verify")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    state.seen.lock().unwrap().push((x_verify, body));

    if let Some(&code) = state.failures.get(hit) {
        return (
            StatusCode::from_u16(code).unwrap(),
            Json(json!({"success": false, "code": "UPSTREAM"})),
        );
    }
    (
        StatusCode::from_u16(state.final_status).unwrap(),
        Json(state.final_response.as_ref().clone()),
    )
}

async fn spawn_stub(state: StubState) -> anyhow::Result<SocketAddr> {
    let app = Router::new()
        .route("/pg/v1/pay", post(stub_pay))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

fn fast_config() -> GatewayConfig {
    GatewayConfig {
        merchant_id: "MERCHANTTEST".to_string(),
        salt_key: "test-salt".to_string(),
        salt_index: 1,
        webhook_secret: "whsec_test".to_string(),
        sandbox: true,
        timeout_secs: 5,
        max_attempts: 5,
        // Millisecond backoff so retries do not slow the suite down.
        retry_base_ms: 5,
        retry_cap_ms: 50,
    }
}

fn request() -> InitiatePaymentRequest {
    InitiatePaymentRequest {
        amount_cents: 160_000,
        merchant_transaction_id: "TP-1709290000000-ABCDEF".to_string(),
        merchant_user_id: "user-1".to_string(),
        redirect_url: "https://trailpass.example/payment/callback/TP-1709290000000-ABCDEF"
            .to_string(),
        callback_url: "https://trailpass.example/payment/callback/TP-1709290000000-ABCDEF"
            .to_string(),
        mobile_number: "+91 98765-43210".to_string(),
    }
}

fn success_body() -> Value {
    json!({
        "success": true,
        "code": "PAYMENT_INITIATED",
        "data": {
            "merchantId": "MERCHANTTEST",
            "merchantTransactionId": "TP-1709290000000-ABCDEF",
            "instrumentResponse": {
                "type": "PAY_PAGE",
                "redirectInfo": {"url": "https://pay.example/hosted/42", "method": "POST"}
            }
        }
    })
}

#[tokio::test]
async fn recovers_after_two_rate_limited_attempts() -> anyhow::Result<()> {
    let state = StubState {
        hits: Arc::new(AtomicUsize::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
        failures: Arc::new(vec![429, 429]),
        final_response: Arc::new(success_body()),
        final_status: 200,
    };
    let addr = spawn_stub(state.clone()).await?;

    let client = PhonePeClient::new(fast_config())?.with_base_url(format!("http://{}", addr));
    let outcome = client.initiate_payment(&request()).await?;

    let GatewayOutcome::Success { payment_url, .. } = outcome else {
        panic!("expected success, got {:?}", outcome);
    };
    assert_eq!(payment_url, "https://pay.example/hosted/42");
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);

    // Every attempt reused the same signed envelope, so the merchant
    // transaction id was identical across retries.
    let seen = state.seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.windows(2).all(|w| w[0] == w[1]));
    assert!(!seen[0].0.is_empty(), "X-VERIFY header missing");
    assert!(seen[0].0.contains("###1"));
    Ok(())
}

#[tokio::test]
async fn gives_up_after_five_attempts() -> anyhow::Result<()> {
    let state = StubState {
        hits: Arc::new(AtomicUsize::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
        failures: Arc::new(vec![503; 10]),
        final_response: Arc::new(json!({})),
        final_status: 200,
    };
    let addr = spawn_stub(state.clone()).await?;

    let client = PhonePeClient::new(fast_config())?.with_base_url(format!("http://{}", addr));
    let outcome = client.initiate_payment(&request()).await?;

    let GatewayOutcome::Failure { should_retry, .. } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(should_retry);
    assert_eq!(state.hits.load(Ordering::SeqCst), 5);
    Ok(())
}

#[tokio::test]
async fn provider_rejection_is_terminal_on_the_first_attempt() -> anyhow::Result<()> {
    let state = StubState {
        hits: Arc::new(AtomicUsize::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
        failures: Arc::new(vec![]),
        final_response: Arc::new(json!({
            "success": false,
            "code": "BAD_REQUEST",
            "message": "merchantTransactionId already exists",
        })),
        final_status: 400,
    };
    let addr = spawn_stub(state.clone()).await?;

    let client = PhonePeClient::new(fast_config())?.with_base_url(format!("http://{}", addr));
    let outcome = client.initiate_payment(&request()).await?;

    let GatewayOutcome::Failure {
        code, should_retry, ..
    } = outcome
    else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(code, "BAD_REQUEST");
    assert!(!should_retry);
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn ok_response_without_redirect_url_is_invalid() -> anyhow::Result<()> {
    let state = StubState {
        hits: Arc::new(AtomicUsize::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
        failures: Arc::new(vec![]),
        final_response: Arc::new(json!({
            "success": true,
            "code": "PAYMENT_INITIATED",
            "data": {"merchantId": "MERCHANTTEST"},
        })),
        final_status: 200,
    };
    let addr = spawn_stub(state.clone()).await?;

    let client = PhonePeClient::new(fast_config())?.with_base_url(format!("http://{}", addr));
    let outcome = client.initiate_payment(&request()).await?;

    let GatewayOutcome::Failure {
        code, should_retry, ..
    } = outcome
    else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(code, "INVALID_RESPONSE");
    assert!(!should_retry);
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn envelope_strips_mobile_number_to_digits() -> anyhow::Result<()> {
    let state = StubState {
        hits: Arc::new(AtomicUsize::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
        failures: Arc::new(vec![]),
        final_response: Arc::new(success_body()),
        final_status: 200,
    };
    let addr = spawn_stub(state.clone()).await?;

    let client = PhonePeClient::new(fast_config())?.with_base_url(format!("http://{}", addr));
    client.initiate_payment(&request()).await?;

    let seen = state.seen.lock().unwrap();
    let encoded = seen[0].1["request"].as_str().unwrap();
    let payload: Value = serde_json::from_slice(
        &base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)?,
    )?;
    assert_eq!(payload["mobileNumber"], "919876543210");
    assert_eq!(payload["amount"], 160_000);
    assert_eq!(payload["paymentInstrument"]["type"], "PAY_PAGE");
    assert_eq!(payload["redirectMode"], "POST");
    assert_eq!(
        payload["merchantTransactionId"],
        "TP-1709290000000-ABCDEF"
    );
    Ok(())
}
