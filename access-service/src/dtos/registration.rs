use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::credential::CredentialResponse;
use super::parse_mac;
use crate::models::{AuthMethod, PendingRegistration, PendingStatus};
use crate::services::{RegistrationOutcome, RegistrationRequest, RejectReason, ServiceError};

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(max = 128, message = "Name is too long"))]
    #[schema(example = "Ada Lovelace")]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "ada@example.com")]
    pub email: Option<String>,

    #[schema(example = "00:1a:2b:3c:4d:5e")]
    pub mac: Option<String>,

    pub auth_method: Option<AuthMethod>,

    #[validate(length(max = 32, message = "Invite code is too long"))]
    #[schema(example = "WELCOME1")]
    pub invite_code: Option<String>,

    /// Optional caller-chosen passphrase (8-63 printable ASCII characters).
    pub passphrase: Option<String>,

    /// Protects the exported certificate key.
    pub certificate_password: Option<String>,

    #[validate(length(max = 64, message = "Area is too long"))]
    #[schema(example = "unit-204")]
    pub area: Option<String>,

    pub network_id: Option<String>,
}

impl RegisterRequest {
    pub fn into_request(self) -> Result<RegistrationRequest, ServiceError> {
        Ok(RegistrationRequest {
            mac: parse_mac(self.mac.as_deref())?,
            name: self.name,
            email: self.email,
            auth_method: self.auth_method,
            invite_code: self.invite_code,
            passphrase: self.passphrase,
            certificate_password: self.certificate_password,
            area: self.area,
            network_id: self.network_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Admitted,
    Pending,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialResponse>,
    /// Shown once, at issuance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<RegistrationOutcome> for RegisterResponse {
    fn from(outcome: RegistrationOutcome) -> Self {
        match outcome {
            RegistrationOutcome::Admitted(issued) => Self {
                status: RegistrationStatus::Admitted,
                credential: Some(CredentialResponse::from(&issued.credential)),
                passphrase: issued.passphrase,
                registration_id: None,
                reason: None,
                message: None,
            },
            RegistrationOutcome::Pending(pending) => Self {
                status: RegistrationStatus::Pending,
                credential: None,
                passphrase: None,
                registration_id: Some(pending.registration_id),
                reason: None,
                message: Some("registration is awaiting operator approval".to_string()),
            },
            RegistrationOutcome::Rejected { reason, message } => Self {
                status: RegistrationStatus::Rejected,
                credential: None,
                passphrase: None,
                registration_id: None,
                reason: Some(reason),
                message: Some(message),
            },
        }
    }
}

/// A queued registration as operators see it. Secrets are never included.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PendingRegistrationResponse {
    pub registration_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub mac: Option<String>,
    pub auth_method: AuthMethod,
    pub area: Option<String>,
    pub network_id: String,
    pub status: PendingStatus,
    pub notes: Option<String>,
    pub decided_by: Option<String>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub decided_utc: Option<DateTime<Utc>>,
    pub credential_id: Option<Uuid>,
    #[schema(value_type = String, format = "date-time")]
    pub created_utc: DateTime<Utc>,
}

impl From<PendingRegistration> for PendingRegistrationResponse {
    fn from(p: PendingRegistration) -> Self {
        Self {
            registration_id: p.registration_id,
            name: p.name,
            email: p.email,
            mac: p.mac.map(|m| m.to_string()),
            auth_method: p.auth_method,
            area: p.area,
            network_id: p.network_id,
            status: p.status,
            notes: p.notes,
            decided_by: p.decided_by,
            decided_utc: p.decided_utc,
            credential_id: p.credential_id,
            created_utc: p.created_utc,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct PendingQuery {
    pub status: Option<PendingStatus>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct RejectRegistrationRequest {
    #[validate(length(max = 1024, message = "Notes are too long"))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApproveRegistrationResponse {
    pub credential: CredentialResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}
