//! Business workflows. Handlers stay thin and call into these.
pub mod employees;
pub mod housing;
pub mod onboarding;
pub mod registration;
pub mod reports;
pub mod review;
pub mod uploads;
pub mod visa;

pub use review::{Decision, ReviewCoordinator, Reviewable};
