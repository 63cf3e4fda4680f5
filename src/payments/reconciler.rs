use std::sync::Arc;
use uuid::Uuid;

use crate::{error::Result, repository::ExperienceRepository};

/// Returns provisionally reserved seats to an experience's pool after
/// a payment failure. The decrement happens as one atomic statement in
/// the store; this type only decides when to call it.
pub struct CapacityReconciler {
    experience_repo: Arc<dyn ExperienceRepository>,
}

impl CapacityReconciler {
    pub fn new(experience_repo: Arc<dyn ExperienceRepository>) -> Self {
        Self { experience_repo }
    }

    pub async fn release_tickets(&self, experience_id: Uuid, ticket_count: i64) -> Result<()> {
        if ticket_count <= 0 {
            return Ok(());
        }

        self.experience_repo
            .release_spots(experience_id, ticket_count)
            .await?;

        tracing::info!(
            experience_id = %experience_id,
            ticket_count,
            "Released reserved tickets"
        );
        Ok(())
    }
}
