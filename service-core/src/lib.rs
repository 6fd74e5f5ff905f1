//! service-core: Shared infrastructure for the network access services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod outbound;

pub use async_trait;
pub use axum;
pub use reqwest;
pub use serde;
pub use serde_json;
pub use sqlx;
pub use tokio;
pub use tower;
pub use tower_http;
pub use tracing;
pub use validator;
