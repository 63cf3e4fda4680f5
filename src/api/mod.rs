pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use state::AppState;

pub fn create_app(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::root::health_check))
        .nest("/api", api_routes())
        // Gateway-facing routes live outside /api: their paths are
        // part of the external contract.
        .route("/webhooks/phonepe", post(handlers::callbacks::phonepe_webhook))
        .route(
            "/payment/callback/:merchant_transaction_id",
            get(handlers::callbacks::redirect_callback_get)
                .post(handlers::callbacks::redirect_callback_post),
        )
        .with_state(app_state)
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive()) // Configure properly for production
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/experiences", get(handlers::experiences::list))
        .route("/experiences/:id", get(handlers::experiences::get))
        .route("/registrations", post(handlers::registrations::create))
        .route("/registrations/:id", get(handlers::registrations::get))
        .route("/payments/initiate", post(handlers::payments::initiate))
        .route(
            "/payments/status/:merchant_transaction_id",
            get(handlers::payments::status),
        )
}
