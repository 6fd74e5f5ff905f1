use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Credential, CredentialKind, CredentialStatus};
use crate::services::CertificateFormat;

/// Credential metadata. Secret material is never part of this view.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CredentialResponse {
    pub credential_id: Uuid,
    pub kind: CredentialKind,
    /// `user:<email>`, `device:<mac>` or `area:<id>`.
    #[schema(example = "user:ada@example.com")]
    pub owner: String,
    pub network_id: String,
    pub area: Option<String>,
    pub status: CredentialStatus,
    pub bound_mac: Option<String>,
    pub correlation_id: Option<String>,
    pub serial: Option<String>,
    pub download_count: i32,
    pub auto_renew: bool,
    pub revoked_reason: Option<String>,
    pub replaced_by: Option<Uuid>,
    #[schema(value_type = String, format = "date-time")]
    pub created_utc: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub expires_utc: Option<DateTime<Utc>>,
}

impl From<&Credential> for CredentialResponse {
    fn from(c: &Credential) -> Self {
        Self {
            credential_id: c.credential_id,
            kind: c.kind,
            owner: c.owner.to_string(),
            network_id: c.network_id.clone(),
            area: c.area.clone(),
            status: c.status,
            bound_mac: c.bound_mac.map(|m| m.to_string()),
            correlation_id: c.correlation_id.clone(),
            serial: c.serial.clone(),
            download_count: c.download_count,
            auto_renew: c.auto_renew,
            revoked_reason: c.revoked_reason.clone(),
            replaced_by: c.replaced_by,
            created_utc: c.created_utc,
            expires_utc: c.expires_utc,
        }
    }
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct CredentialListQuery {
    pub status: Option<CredentialStatus>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevealResponse {
    pub credential_id: Uuid,
    pub passphrase: String,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct RevokeRequest {
    #[validate(length(min = 1, max = 256, message = "Reason must be 1-256 characters"))]
    #[schema(example = "device lost")]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RenewRequest {
    #[validate(length(min = 8, message = "Certificate password must be at least 8 characters"))]
    pub certificate_password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SweepResponse {
    pub expired: Vec<Uuid>,
    pub count: usize,
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct DownloadQuery {
    pub format: Option<CertificateFormat>,
}
