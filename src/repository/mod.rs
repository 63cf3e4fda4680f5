use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::*;
use crate::error::Result;

pub mod experience_repository;
pub mod payment_event_repository;
pub mod registration_repository;
pub mod transaction_repository;

pub use experience_repository::SqliteExperienceRepository;
pub use payment_event_repository::SqlitePaymentEventRepository;
pub use registration_repository::SqliteRegistrationRepository;
pub use transaction_repository::SqliteTransactionRepository;

#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    async fn create(&self, registration: Registration) -> Result<Registration>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Registration>>;
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Registration>>;
    /// Points the registration at the current payment attempt.
    /// Conditional on the registration still being pending; attaching
    /// to a resolved registration is a conflict.
    async fn attach_transaction(&self, id: Uuid, merchant_transaction_id: &str) -> Result<()>;
    /// Records the final payment outcome. Conditional on the
    /// registration still being pending; returns whether a row
    /// actually changed.
    async fn mark_payment_result(
        &self,
        id: Uuid,
        status: PaymentStatus,
        payment_date: Option<DateTime<Utc>>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn create(&self, transaction: PaymentTransaction) -> Result<PaymentTransaction>;
    async fn find_by_merchant_id(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>>;
    async fn find_by_registration(&self, registration_id: Uuid) -> Result<Vec<PaymentTransaction>>;
    /// Applies a notification outcome. Conditional on the transaction
    /// still being pending — the idempotency primitive; returns whether
    /// a row actually changed.
    async fn mark_result(
        &self,
        merchant_transaction_id: &str,
        status: PaymentStatus,
        gateway_response: &serde_json::Value,
    ) -> Result<bool>;
    /// Rollback helper; only ever called for attempts that failed
    /// before the customer could reach the pay page.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait ExperienceRepository: Send + Sync {
    async fn create(&self, experience: Experience) -> Result<Experience>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Experience>>;
    async fn list_open(&self) -> Result<Vec<Experience>>;
    /// Atomically claims `count` seats; returns false (and changes
    /// nothing) when that would exceed capacity.
    async fn reserve_spots(&self, id: Uuid, count: i64) -> Result<bool>;
    /// Atomically returns `count` seats to the pool, floored at zero.
    /// One server-side statement, never read-then-write.
    async fn release_spots(&self, id: Uuid, count: i64) -> Result<()>;
}

#[async_trait]
pub trait PaymentEventRepository: Send + Sync {
    async fn append(
        &self,
        merchant_transaction_id: &str,
        kind: PaymentEventKind,
        detail: Option<serde_json::Value>,
    ) -> Result<()>;
    async fn list_for_transaction(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<Vec<PaymentEvent>>;
}
