use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::credential::CredentialResponse;
use super::registration::RegistrationStatus;
use crate::models::AuthMethod;
use crate::services::{GrantOutcome, PortalRequest, RegistrationRequest, RejectReason};

/// Captive-portal parameters forwarded by the controller, plus the
/// registration form. Accepted as a query string or a form body.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema, IntoParams)]
pub struct PortalParams {
    #[schema(example = "00%3A1a%3A2b%3A3c%3A4d%3A5e")]
    #[serde(alias = "client_mac")]
    pub mac: Option<String>,
    #[serde(alias = "login_uri")]
    pub login_url: Option<String>,
    #[serde(alias = "base_grant_url")]
    pub grant_url: Option<String>,
    #[serde(alias = "user_continue_url")]
    pub continue_url: Option<String>,

    #[validate(length(max = 128, message = "Name is too long"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    pub auth_method: Option<AuthMethod>,
    #[validate(length(max = 32, message = "Invite code is too long"))]
    pub invite_code: Option<String>,
    pub passphrase: Option<String>,
    pub certificate_password: Option<String>,
    #[validate(length(max = 64, message = "Area is too long"))]
    pub area: Option<String>,
    pub network_id: Option<String>,
}

impl PortalParams {
    pub fn into_request(self) -> PortalRequest {
        PortalRequest {
            mac: self.mac,
            login_url: self.login_url,
            grant_url: self.grant_url,
            continue_url: self.continue_url,
            registration: RegistrationRequest {
                name: self.name,
                email: self.email,
                mac: None,
                auth_method: self.auth_method,
                invite_code: self.invite_code,
                passphrase: self.passphrase,
                certificate_password: self.certificate_password,
                area: self.area,
                network_id: self.network_id,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PortalResponse {
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "date-time")]
    pub session_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// True when the client already held a credential.
    pub returning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<GrantOutcome> for PortalResponse {
    fn from(outcome: GrantOutcome) -> Self {
        let empty = Self {
            status: RegistrationStatus::Rejected,
            redirect_url: None,
            session_token: None,
            session_expires_at: None,
            credential: None,
            passphrase: None,
            returning: false,
            registration_id: None,
            reason: None,
            message: None,
        };
        match outcome {
            GrantOutcome::Granted(grant) => Self {
                status: RegistrationStatus::Admitted,
                redirect_url: Some(grant.redirect_url),
                session_token: Some(grant.session_token),
                session_expires_at: Some(grant.session_expires_at),
                credential: Some(CredentialResponse::from(&grant.credential)),
                passphrase: grant.passphrase,
                returning: grant.replayed,
                ..empty
            },
            GrantOutcome::Pending(pending) => Self {
                status: RegistrationStatus::Pending,
                registration_id: Some(pending.registration_id),
                message: Some("registration is awaiting operator approval".to_string()),
                ..empty
            },
            GrantOutcome::Rejected { reason, message } => Self {
                reason: Some(reason),
                message: Some(message),
                ..empty
            },
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidateSessionRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionStatusResponse {
    pub valid: bool,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub expires_at: Option<DateTime<Utc>>,
}
