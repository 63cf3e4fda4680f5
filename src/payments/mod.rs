pub mod callback;
pub mod checksum;
pub mod phonepe;
pub mod reconciler;
pub mod service;

pub use callback::CallbackProcessor;
pub use phonepe::{GatewayOutcome, InitiatePaymentRequest, PaymentGateway, PhonePeClient};
pub use reconciler::CapacityReconciler;
pub use service::{OrchestrationOutcome, PaymentService};

#[cfg(any(test, feature = "test-utils"))]
pub use phonepe::FakeGateway;
