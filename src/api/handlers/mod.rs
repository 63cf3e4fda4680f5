pub mod callbacks;
pub mod experiences;
pub mod payments;
pub mod registrations;
pub mod root;
