use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tower::util::ServiceExt;
use uuid::Uuid;

use trailpass::{
    api::{self, state::AppState},
    config::{DatabaseConfig, GatewayConfig, ServerConfig, Settings},
    domain::Experience,
    payments::{
        checksum, CallbackProcessor, CapacityReconciler, FakeGateway, GatewayOutcome,
        PaymentService,
    },
    repository::{
        ExperienceRepository, SqliteExperienceRepository, SqlitePaymentEventRepository,
        SqliteRegistrationRepository, SqliteTransactionRepository,
    },
};

fn settings() -> Settings {
    Settings {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            base_url: "https://trailpass.example".to_string(),
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        },
        gateway: GatewayConfig {
            merchant_id: "MERCHANTTEST".to_string(),
            salt_key: "test-salt".to_string(),
            salt_index: 1,
            webhook_secret: "whsec_test".to_string(),
            sandbox: true,
            timeout_secs: 5,
            max_attempts: 5,
            retry_base_ms: 5,
            retry_cap_ms: 50,
        },
    }
}

async fn test_app(gateway: Arc<FakeGateway>) -> anyhow::Result<(Router, SqlitePool, Uuid)> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let experience_repo = Arc::new(SqliteExperienceRepository::new(pool.clone()));
    let registration_repo = Arc::new(SqliteRegistrationRepository::new(pool.clone()));
    let transaction_repo = Arc::new(SqliteTransactionRepository::new(pool.clone()));
    let event_log = Arc::new(SqlitePaymentEventRepository::new(pool.clone()));

    let experience = experience_repo
        .create(Experience {
            id: Uuid::new_v4(),
            title: "Ridge Trek".to_string(),
            description: "Sunrise ridge walk".to_string(),
            location: Some("Sahyadri".to_string()),
            start_date: Utc::now(),
            ticket_price_cents: 120_000,
            total_capacity: 3,
            current_participants: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await?;

    let settings = Arc::new(settings());
    let payment_service = Arc::new(PaymentService::new(
        gateway,
        transaction_repo.clone(),
        registration_repo.clone(),
        event_log.clone(),
        settings.server.base_url.clone(),
    ));
    let reconciler = Arc::new(CapacityReconciler::new(experience_repo.clone()));
    let callback_processor = Arc::new(CallbackProcessor::new(
        transaction_repo.clone(),
        registration_repo.clone(),
        event_log,
        reconciler,
        settings.gateway.clone(),
    ));

    let app = api::create_app(AppState::new(
        payment_service,
        callback_processor,
        registration_repo,
        transaction_repo,
        experience_repo,
        settings,
    ));

    Ok((app, pool, experience.id))
}

fn registration_body(experience_id: Uuid, total_cents: i64, quantity: i64) -> Value {
    json!({
        "user_id": Uuid::new_v4(),
        "experience_id": experience_id,
        "total_cents": total_cents,
        "booking_details": {
            "tickets": [
                {"label": "Adult", "quantity": quantity, "unit_price_cents": 120_000}
            ],
            "food": [],
            "emergency_contact": {"name": "Meera", "phone": "9876512345"},
        }
    })
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn post_webhook(app: &Router, body: &[u8]) -> StatusCode {
    let signature = checksum::webhook_signature(body, "whsec_test");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/phonepe")
                .header("content-type", "application/json")
                .header("x-webhook-signature", signature)
                .body(Body::from(body.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    response.status()
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn amount_mismatch_rejects_before_any_payment_work() -> anyhow::Result<()> {
    let gateway = Arc::new(FakeGateway::succeeding("https://pay.example/p/1"));
    let (app, pool, experience_id) = test_app(gateway.clone()).await?;

    // Line items sum to 240_000 but the client claims 200_000.
    let (status, _) = post_json(
        &app,
        "/api/registrations",
        registration_body(experience_id, 200_000, 2),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Nothing was created or reserved, and the gateway never heard
    // about it.
    assert_eq!(gateway.call_count(), 0);
    let participants: i64 =
        sqlx::query_scalar("SELECT current_participants FROM experiences WHERE id = ?")
            .bind(experience_id.to_string())
            .fetch_one(&pool)
            .await?;
    assert_eq!(participants, 0);
    let registrations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM registrations")
        .fetch_one(&pool)
        .await?;
    assert_eq!(registrations, 0);
    Ok(())
}

#[tokio::test]
async fn booking_and_payment_happy_path() -> anyhow::Result<()> {
    let gateway = Arc::new(FakeGateway::succeeding("https://pay.example/p/1"));
    let (app, _pool, experience_id) = test_app(gateway).await?;

    let (status, registration) = post_json(
        &app,
        "/api/registrations",
        registration_body(experience_id, 240_000, 2),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let registration_id = registration["id"].as_str().unwrap().to_string();

    let (status, payment) = post_json(
        &app,
        "/api/payments/initiate",
        json!({"registration_id": registration_id, "mobile_number": "9876543210"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["success"], true);
    assert_eq!(payment["payment_url"], "https://pay.example/p/1");
    let merchant_transaction_id = payment["merchant_transaction_id"].as_str().unwrap();

    // Poll endpoint reports pending until a notification lands.
    let (status, poll) = get_json(
        &app,
        &format!("/api/payments/status/{}", merchant_transaction_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poll["status"], "pending");
    assert_eq!(poll["resolved"], false);
    Ok(())
}

#[tokio::test]
async fn overbooking_is_refused_atomically() -> anyhow::Result<()> {
    let gateway = Arc::new(FakeGateway::succeeding("https://pay.example/p/1"));
    let (app, pool, experience_id) = test_app(gateway).await?;

    // Capacity is 3; a 2-seat booking fits, a second one does not.
    let (status, _) = post_json(
        &app,
        "/api/registrations",
        registration_body(experience_id, 240_000, 2),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = post_json(
        &app,
        "/api/registrations",
        registration_body(experience_id, 240_000, 2),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let participants: i64 =
        sqlx::query_scalar("SELECT current_participants FROM experiences WHERE id = ?")
            .bind(experience_id.to_string())
            .fetch_one(&pool)
            .await?;
    assert_eq!(participants, 2);
    Ok(())
}

#[tokio::test]
async fn failed_registration_cannot_be_reinitiated() -> anyhow::Result<()> {
    let gateway = Arc::new(FakeGateway::succeeding("https://pay.example/p/1"));
    let (app, pool, experience_id) = test_app(gateway).await?;

    let (status, registration) = post_json(
        &app,
        "/api/registrations",
        registration_body(experience_id, 240_000, 2),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let registration_id = registration["id"].as_str().unwrap().to_string();

    let (status, payment) = post_json(
        &app,
        "/api/payments/initiate",
        json!({"registration_id": registration_id, "mobile_number": "9876543210"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let merchant_transaction_id = payment["merchant_transaction_id"].as_str().unwrap();

    // The payment fails; the two reserved seats go back to the pool.
    let body = serde_json::to_vec(&json!({
        "merchantTransactionId": merchant_transaction_id,
        "code": "PAYMENT_ERROR",
    }))?;
    assert_eq!(post_webhook(&app, &body).await, StatusCode::OK);

    // Someone else books the whole experience in the meantime.
    let (status, _) = post_json(
        &app,
        "/api/registrations",
        registration_body(experience_id, 360_000, 3),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Retrying the failed registration is refused; its seats were
    // already released once and now belong to the other booking.
    let (status, _) = post_json(
        &app,
        "/api/payments/initiate",
        json!({"registration_id": registration_id, "mobile_number": "9876543210"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let participants: i64 =
        sqlx::query_scalar("SELECT current_participants FROM experiences WHERE id = ?")
            .bind(experience_id.to_string())
            .fetch_one(&pool)
            .await?;
    assert_eq!(participants, 3);
    Ok(())
}

#[tokio::test]
async fn gateway_codes_never_reach_the_client() -> anyhow::Result<()> {
    let gateway = Arc::new(FakeGateway::new(vec![GatewayOutcome::Failure {
        code: "KEY_NOT_CONFIGURED".to_string(),
        message: "Key not configured for the merchant".to_string(),
        should_retry: false,
    }]));
    let (app, _pool, experience_id) = test_app(gateway).await?;

    let (status, registration) = post_json(
        &app,
        "/api/registrations",
        registration_body(experience_id, 240_000, 2),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let registration_id = registration["id"].as_str().unwrap().to_string();

    let (status, payment) = post_json(
        &app,
        "/api/payments/initiate",
        json!({"registration_id": registration_id, "mobile_number": "9876543210"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["success"], false);
    assert_eq!(payment["retryable"], false);

    // The provider's own code and message appear nowhere in the
    // client-facing body.
    let rendered = payment.to_string();
    assert!(!rendered.contains("KEY_NOT_CONFIGURED"));
    assert!(!rendered.contains("Key not configured"));
    assert!(payment.get("code").is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_status_poll_reads_as_pending() -> anyhow::Result<()> {
    let gateway = Arc::new(FakeGateway::succeeding("https://pay.example/p/1"));
    let (app, _pool, _experience_id) = test_app(gateway).await?;

    let (status, poll) = get_json(&app, "/api/payments/status/TP-0-NOWHERE").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poll["status"], "pending");
    assert_eq!(poll["resolved"], false);
    Ok(())
}

#[tokio::test]
async fn health_endpoint_responds() -> anyhow::Result<()> {
    let gateway = Arc::new(FakeGateway::succeeding("https://pay.example/p/1"));
    let (app, _pool, _experience_id) = test_app(gateway).await?;

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    Ok(())
}
