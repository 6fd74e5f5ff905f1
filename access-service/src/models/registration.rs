use super::{CredentialKind, MacAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// How self-service registration is gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    Open,
    OpenWithApproval,
    AccountOnly,
    InvitePlusAccount,
    InviteOnly,
}

impl RegistrationMode {
    /// Reduce a configured set of modes to the single mode in force.
    /// Invite requirements beat approval, approval beats open, and an empty
    /// set means registration is closed (account-only).
    pub fn effective(modes: &[RegistrationMode]) -> RegistrationMode {
        const PRECEDENCE: [RegistrationMode; 5] = [
            RegistrationMode::InvitePlusAccount,
            RegistrationMode::InviteOnly,
            RegistrationMode::OpenWithApproval,
            RegistrationMode::Open,
            RegistrationMode::AccountOnly,
        ];
        PRECEDENCE
            .into_iter()
            .find(|mode| modes.contains(mode))
            .unwrap_or(RegistrationMode::AccountOnly)
    }

    pub fn requires_invite(&self) -> bool {
        matches!(
            self,
            RegistrationMode::InviteOnly | RegistrationMode::InvitePlusAccount
        )
    }
}

impl FromStr for RegistrationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(RegistrationMode::Open),
            "open_with_approval" => Ok(RegistrationMode::OpenWithApproval),
            "account_only" => Ok(RegistrationMode::AccountOnly),
            "invite_plus_account" => Ok(RegistrationMode::InvitePlusAccount),
            "invite_only" => Ok(RegistrationMode::InviteOnly),
            other => Err(anyhow::anyhow!("unknown registration mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Passphrase,
    Certificate,
}

impl AuthMethod {
    pub fn credential_kind(&self) -> CredentialKind {
        match self {
            AuthMethod::Passphrase => CredentialKind::SharedPassphrase,
            AuthMethod::Certificate => CredentialKind::Certificate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Passphrase => "passphrase",
            AuthMethod::Certificate => "certificate",
        }
    }
}

impl FromStr for AuthMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passphrase" => Ok(AuthMethod::Passphrase),
            "certificate" => Ok(AuthMethod::Certificate),
            other => Err(anyhow::anyhow!("unknown auth method: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Approved => "approved",
            PendingStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for PendingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "approved" => Ok(PendingStatus::Approved),
            "rejected" => Ok(PendingStatus::Rejected),
            other => Err(anyhow::anyhow!("unknown pending status: {}", other)),
        }
    }
}

/// A registration held for an operator decision. Requester-chosen secrets
/// are kept encrypted until approval issues the credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRegistration {
    pub registration_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub mac: Option<MacAddress>,
    pub auth_method: AuthMethod,
    pub area: Option<String>,
    pub network_id: String,
    pub secret_ciphertext: Option<String>,
    pub status: PendingStatus,
    pub notes: Option<String>,
    pub decided_by: Option<String>,
    pub decided_utc: Option<DateTime<Utc>>,
    pub credential_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl PendingRegistration {
    /// Same network and a shared email or MAC. Anonymous requests never match.
    pub fn same_requester(&self, other: &PendingRegistration) -> bool {
        let same_email = self.email.is_some() && self.email == other.email;
        let same_mac = self.mac.is_some() && self.mac == other.mac;
        self.network_id == other.network_id && (same_email || same_mac)
    }
}
