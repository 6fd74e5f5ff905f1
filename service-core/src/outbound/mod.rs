//! Outbound HTTP helpers for calls to external collaborators.

pub mod retry;

pub use retry::{RetryConfig, failed_before_send, is_transient, retry_call};
