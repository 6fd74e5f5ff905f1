use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CredentialIssued,
    CredentialRevealed,
    CredentialRevoked,
    CredentialRenewed,
    CredentialDeleted,
    CredentialsExpired,
    CertificateDownloaded,
    InviteCreated,
    InviteDeleted,
    RegistrationQueued,
    RegistrationApproved,
    RegistrationRejected,
    PortalGranted,
    PolicyChanged,
    BindingChanged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CredentialIssued => "credential_issued",
            AuditAction::CredentialRevealed => "credential_revealed",
            AuditAction::CredentialRevoked => "credential_revoked",
            AuditAction::CredentialRenewed => "credential_renewed",
            AuditAction::CredentialDeleted => "credential_deleted",
            AuditAction::CredentialsExpired => "credentials_expired",
            AuditAction::CertificateDownloaded => "certificate_downloaded",
            AuditAction::InviteCreated => "invite_created",
            AuditAction::InviteDeleted => "invite_deleted",
            AuditAction::RegistrationQueued => "registration_queued",
            AuditAction::RegistrationApproved => "registration_approved",
            AuditAction::RegistrationRejected => "registration_rejected",
            AuditAction::PortalGranted => "portal_granted",
            AuditAction::PolicyChanged => "policy_changed",
            AuditAction::BindingChanged => "binding_changed",
        }
    }
}

impl FromStr for AuditAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [AuditAction; 15] = [
            AuditAction::CredentialIssued,
            AuditAction::CredentialRevealed,
            AuditAction::CredentialRevoked,
            AuditAction::CredentialRenewed,
            AuditAction::CredentialDeleted,
            AuditAction::CredentialsExpired,
            AuditAction::CertificateDownloaded,
            AuditAction::InviteCreated,
            AuditAction::InviteDeleted,
            AuditAction::RegistrationQueued,
            AuditAction::RegistrationApproved,
            AuditAction::RegistrationRejected,
            AuditAction::PortalGranted,
            AuditAction::PolicyChanged,
            AuditAction::BindingChanged,
        ];
        ALL.into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown audit action: {}", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub action: AuditAction,
    pub actor: String,
    pub target: Option<String>,
    pub details: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor: &str, target: Option<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            action,
            actor: actor.to_string(),
            target,
            details: None,
            created_utc: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
