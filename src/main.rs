use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trailpass::{
    api::{self, state::AppState},
    config::Settings,
    payments::{CallbackProcessor, CapacityReconciler, PaymentGateway, PaymentService, PhonePeClient},
    repository::{
        SqliteExperienceRepository, SqlitePaymentEventRepository, SqliteRegistrationRepository,
        SqliteTransactionRepository,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trailpass=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Missing gateway credentials must kill the process here, not
    // surface on the first checkout.
    let settings = Settings::new()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    tracing::info!(
        "Starting Trailpass server on {}:{}",
        settings.server.host,
        settings.server.port
    );

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    // Initialize repositories
    let registration_repo = Arc::new(SqliteRegistrationRepository::new(db_pool.clone()));
    let transaction_repo = Arc::new(SqliteTransactionRepository::new(db_pool.clone()));
    let experience_repo = Arc::new(SqliteExperienceRepository::new(db_pool.clone()));
    let event_log = Arc::new(SqlitePaymentEventRepository::new(db_pool.clone()));

    // Gateway client + diagnostic ping
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(PhonePeClient::new(settings.gateway.clone())?);
    match gateway.verify_credentials().await {
        Ok(true) => tracing::info!("Gateway credentials verified"),
        Ok(false) => tracing::warn!("Gateway rejected the configured credentials"),
        Err(e) => tracing::warn!("Gateway credential check failed: {}", e),
    }

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

    let settings = Arc::new(settings);
    let app_state = AppState::new(
        payment_service,
        callback_processor,
        registration_repo,
        transaction_repo,
        experience_repo,
        settings.clone(),
    );
    let app = api::create_app(app_state);

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        settings.server.host, settings.server.port
    ))
    .await?;

    tracing::info!(
        "Server listening on http://{}:{}",
        settings.server.host,
        settings.server.port
    );

    axum::serve(listener, app).await?;

    Ok(())
}
