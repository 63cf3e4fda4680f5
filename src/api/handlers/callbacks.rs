use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    api::state::AppState,
    error::{AppError, Result},
};

/// Header carrying the HMAC signature on the server-to-server webhook.
const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Header carrying the salted-SHA256 checksum on the callback POST.
const X_VERIFY_HEADER: &str = "x-verify";

pub async fn phonepe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    state
        .callback_processor
        .process_webhook(&body, signature)
        .await?;

    Ok(Json(json!({"success": true})))
}

#[derive(Deserialize)]
pub struct RedirectQuery {
    pub code: Option<String>,
    pub checksum: Option<String>,
}

/// Browser GET when the customer returns from the pay page.
pub async fn redirect_callback_get(
    State(state): State<AppState>,
    Path(merchant_transaction_id): Path<String>,
    Query(query): Query<RedirectQuery>,
) -> Result<Json<Value>> {
    let code = query
        .code
        .ok_or_else(|| AppError::BadRequest("Missing status code".to_string()))?;

    state
        .callback_processor
        .process_redirect_get(&merchant_transaction_id, &code, query.checksum.as_deref())
        .await?;

    Ok(Json(json!({"success": true})))
}

#[derive(Deserialize)]
pub struct RedirectPostBody {
    pub response: String,
}

/// Gateway-issued POST variant of the redirect callback, carrying the
/// base64 response envelope plus an X-VERIFY checksum.
pub async fn redirect_callback_post(
    State(state): State<AppState>,
    Path(merchant_transaction_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RedirectPostBody>,
) -> Result<Json<Value>> {
    let x_verify = headers.get(X_VERIFY_HEADER).and_then(|v| v.to_str().ok());

    state
        .callback_processor
        .process_redirect_post(&merchant_transaction_id, &body.response, x_verify)
        .await?;

    Ok(Json(json!({"success": true})))
}
