use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::Experience,
    error::{AppError, Result},
};

#[derive(Serialize)]
pub struct ExperienceResponse {
    #[serde(flatten)]
    experience: Experience,
    spots_left: i64,
}

impl From<Experience> for ExperienceResponse {
    fn from(experience: Experience) -> Self {
        let spots_left = experience.spots_left();
        Self {
            experience,
            spots_left,
        }
    }
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ExperienceResponse>>> {
    let experiences = state.experience_repo.list_open().await?;
    Ok(Json(experiences.into_iter().map(Into::into).collect()))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExperienceResponse>> {
    let experience = state
        .experience_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Experience {} not found", id)))?;
    Ok(Json(experience.into()))
}
