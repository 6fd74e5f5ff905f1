//! HTTP handlers.

pub mod audit;
pub mod credentials;
pub mod invites;
pub mod metrics;
pub mod policies;
pub mod portal;
pub mod registrations;
