use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::state::AppState,
    domain::{BookingDetails, PaymentStatus, Registration},
    error::{AppError, Result},
};

#[derive(Deserialize, Validate)]
pub struct CreateRegistrationRequest {
    pub user_id: Uuid,
    pub experience_id: Uuid,
    /// Client-computed total, re-derived server-side before anything
    /// else happens.
    #[validate(range(min = 1))]
    pub total_cents: i64,
    pub booking_details: BookingDetails,
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateRegistrationRequest>,
) -> Result<(StatusCode, Json<Registration>)> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let details = request.booking_details;
    if details.tickets.is_empty() || details.ticket_count() <= 0 {
        return Err(AppError::Validation(
            "A booking needs at least one ticket".to_string(),
        ));
    }

    let experience = state
        .experience_repo
        .find_by_id(request.experience_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Experience {} not found", request.experience_id))
        })?;

    // Unit prices come from the catalog, not the client.
    if details
        .tickets
        .iter()
        .any(|t| t.unit_price_cents != experience.ticket_price_cents)
    {
        return Err(AppError::Validation(
            "Ticket price does not match the experience".to_string(),
        ));
    }

    // The amount mismatch check runs before any capacity or payment
    // work: a disagreeing client never reaches the gateway.
    let server_total = details.total_cents();
    if server_total != request.total_cents {
        return Err(AppError::Validation(format!(
            "Total mismatch: submitted {} but line items sum to {}",
            request.total_cents, server_total
        )));
    }

    let ticket_count = details.ticket_count();
    let reserved = state
        .experience_repo
        .reserve_spots(experience.id, ticket_count)
        .await?;
    if !reserved {
        return Err(AppError::CapacityExhausted(format!(
            "Not enough spots left on {}",
            experience.title
        )));
    }

    let registration = Registration {
        id: Uuid::new_v4(),
        user_id: request.user_id,
        experience_id: experience.id,
        amount_cents: server_total,
        transaction_id: None,
        payment_status: PaymentStatus::Pending,
        payment_date: None,
        booking_details: details,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let created = match state.registration_repo.create(registration).await {
        Ok(r) => r,
        Err(e) => {
            // The seats were claimed above; hand them back before
            // surfacing the error.
            if let Err(release_err) = state
                .experience_repo
                .release_spots(experience.id, ticket_count)
                .await
            {
                tracing::error!(
                    experience_id = %experience.id,
                    ticket_count,
                    error = %release_err,
                    "Failed to release spots after registration insert error"
                );
            }
            return Err(e);
        }
    };

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Registration>> {
    let registration = state
        .registration_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Registration {} not found", id)))?;
    Ok(Json(registration))
}
