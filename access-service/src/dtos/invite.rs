use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::InviteCode;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateInviteRequest {
    /// Generated when omitted.
    #[schema(example = "WELCOME1")]
    pub code: Option<String>,

    #[validate(range(min = 1, max = 100000, message = "Max uses must be between 1 and 100000"))]
    #[schema(example = 25)]
    pub max_uses: i32,

    #[schema(value_type = Option<String>, format = "date-time")]
    pub expires_utc: Option<DateTime<Utc>>,

    #[validate(length(max = 256, message = "Note is too long"))]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InviteResponse {
    pub code: String,
    pub max_uses: i32,
    pub uses: i32,
    pub remaining_uses: i32,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub expires_utc: Option<DateTime<Utc>>,
    pub note: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_utc: DateTime<Utc>,
}

impl From<InviteCode> for InviteResponse {
    fn from(invite: InviteCode) -> Self {
        Self {
            remaining_uses: invite.remaining_uses(),
            code: invite.code,
            max_uses: invite.max_uses,
            uses: invite.uses,
            expires_utc: invite.expires_utc,
            note: invite.note,
            created_utc: invite.created_utc,
        }
    }
}
