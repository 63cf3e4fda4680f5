use std::sync::Arc;

use crate::{
    config::Settings,
    payments::{CallbackProcessor, PaymentService},
    repository::{ExperienceRepository, RegistrationRepository, TransactionRepository},
};

#[derive(Clone)]
pub struct AppState {
    pub payment_service: Arc<PaymentService>,
    pub callback_processor: Arc<CallbackProcessor>,
    pub registration_repo: Arc<dyn RegistrationRepository>,
    pub transaction_repo: Arc<dyn TransactionRepository>,
    pub experience_repo: Arc<dyn ExperienceRepository>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        payment_service: Arc<PaymentService>,
        callback_processor: Arc<CallbackProcessor>,
        registration_repo: Arc<dyn RegistrationRepository>,
        transaction_repo: Arc<dyn TransactionRepository>,
        experience_repo: Arc<dyn ExperienceRepository>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            payment_service,
            callback_processor,
            registration_repo,
            transaction_repo,
            experience_repo,
            settings,
        }
    }
}
