pub mod experience;
pub mod payment_event;
pub mod registration;
pub mod transaction;

pub use experience::Experience;
pub use payment_event::{PaymentEvent, PaymentEventKind};
pub use registration::{
    BookingDetails, EmergencyContact, FoodLine, PaymentStatus, Registration, TicketLine,
};
pub use transaction::PaymentTransaction;
