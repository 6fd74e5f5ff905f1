pub mod audit;
pub mod credential;
pub mod invite;
pub mod policy;
pub mod portal;
pub mod registration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body rendered by `AppError`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "credential 3f2c... not found")]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Parse an optional MAC string from a request body.
pub(crate) fn parse_mac(
    raw: Option<&str>,
) -> Result<Option<crate::models::MacAddress>, crate::services::ServiceError> {
    raw.map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|m| {
            m.parse()
                .map_err(|e: crate::models::mac::MacParseError| {
                    crate::services::ServiceError::Validation(e.to_string())
                })
        })
        .transpose()
}
