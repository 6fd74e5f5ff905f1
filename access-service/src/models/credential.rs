use super::MacAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    SharedPassphrase,
    Certificate,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::SharedPassphrase => "shared_passphrase",
            CredentialKind::Certificate => "certificate",
        }
    }
}

impl FromStr for CredentialKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared_passphrase" => Ok(CredentialKind::SharedPassphrase),
            "certificate" => Ok(CredentialKind::Certificate),
            other => Err(anyhow::anyhow!("unknown credential kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Expired,
    Revoked,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::Expired => "expired",
            CredentialStatus::Revoked => "revoked",
        }
    }

    /// Lifecycle edges: active→expired, active→revoked, expired→revoked.
    pub fn can_become(self, next: CredentialStatus) -> bool {
        matches!(
            (self, next),
            (CredentialStatus::Active, CredentialStatus::Expired)
                | (CredentialStatus::Active, CredentialStatus::Revoked)
                | (CredentialStatus::Expired, CredentialStatus::Revoked)
        )
    }
}

impl FromStr for CredentialStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CredentialStatus::Active),
            "expired" => Ok(CredentialStatus::Expired),
            "revoked" => Ok(CredentialStatus::Revoked),
            other => Err(anyhow::anyhow!("unknown credential status: {}", other)),
        }
    }
}

/// Who a credential belongs to. Exactly one of a user, a device or an area.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum OwnerRef {
    User(String),
    Device(MacAddress),
    Area(String),
}

impl OwnerRef {
    /// Users are keyed by lower-cased email so lookups are case-insensitive.
    pub fn user(email: &str) -> Self {
        OwnerRef::User(email.trim().to_lowercase())
    }

    pub fn kind_code(&self) -> &'static str {
        match self {
            OwnerRef::User(_) => "user",
            OwnerRef::Device(_) => "device",
            OwnerRef::Area(_) => "area",
        }
    }

    pub fn reference(&self) -> String {
        match self {
            OwnerRef::User(email) => email.clone(),
            OwnerRef::Device(mac) => mac.to_string(),
            OwnerRef::Area(area) => area.clone(),
        }
    }

    pub fn from_parts(kind: &str, reference: &str) -> anyhow::Result<Self> {
        match kind {
            "user" => Ok(OwnerRef::User(reference.to_string())),
            "device" => Ok(OwnerRef::Device(reference.parse()?)),
            "area" => Ok(OwnerRef::Area(reference.to_string())),
            other => Err(anyhow::anyhow!("unknown owner kind: {}", other)),
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_code(), self.reference())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: Uuid,
    pub kind: CredentialKind,
    pub owner: OwnerRef,
    pub network_id: String,
    /// Unit or area the owner registered under; becomes the certificate OU.
    pub area: Option<String>,
    pub status: CredentialStatus,
    pub bound_mac: Option<MacAddress>,
    /// base64(nonce || AES-256-GCM ciphertext); shared passphrases only.
    pub passphrase_ciphertext: Option<String>,
    /// Opaque identifier the controller sees as the sign-on username.
    pub correlation_id: Option<String>,
    pub serial: Option<String>,
    pub ca_ref: Option<String>,
    pub download_count: i32,
    pub auto_renew: bool,
    pub version: i64,
    pub revoked_reason: Option<String>,
    pub replaced_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: Option<DateTime<Utc>>,
    pub updated_utc: DateTime<Utc>,
}

impl Credential {
    fn base(
        kind: CredentialKind,
        owner: OwnerRef,
        network_id: &str,
        expires_utc: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            credential_id: Uuid::new_v4(),
            kind,
            owner,
            network_id: network_id.to_string(),
            area: None,
            status: CredentialStatus::Active,
            bound_mac: None,
            passphrase_ciphertext: None,
            correlation_id: None,
            serial: None,
            ca_ref: None,
            download_count: 0,
            auto_renew: false,
            version: 0,
            revoked_reason: None,
            replaced_by: None,
            created_utc: now,
            expires_utc,
            updated_utc: now,
        }
    }

    pub fn new_passphrase(
        owner: OwnerRef,
        network_id: &str,
        ciphertext: String,
        correlation_id: String,
        expires_utc: Option<DateTime<Utc>>,
    ) -> Self {
        let mut credential = Self::base(
            CredentialKind::SharedPassphrase,
            owner,
            network_id,
            expires_utc,
        );
        credential.passphrase_ciphertext = Some(ciphertext);
        credential.correlation_id = Some(correlation_id);
        credential
    }

    pub fn new_certificate(
        owner: OwnerRef,
        network_id: &str,
        serial: String,
        ca_ref: String,
        auto_renew: bool,
        expires_utc: Option<DateTime<Utc>>,
    ) -> Self {
        let mut credential =
            Self::base(CredentialKind::Certificate, owner, network_id, expires_utc);
        credential.correlation_id = Some(serial.clone());
        credential.serial = Some(serial);
        credential.ca_ref = Some(ca_ref);
        credential.auto_renew = auto_renew;
        credential
    }

    pub fn with_bound_mac(mut self, mac: Option<MacAddress>) -> Self {
        self.bound_mac = mac;
        self
    }

    pub fn with_area(mut self, area: Option<String>) -> Self {
        self.area = area;
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc.is_some_and(|at| at <= now)
    }

    /// Active status and not past its expiry, whether or not the sweeper ran.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CredentialStatus::Active && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn lifecycle_edges() {
        use CredentialStatus::*;
        assert!(Active.can_become(Expired));
        assert!(Active.can_become(Revoked));
        assert!(Expired.can_become(Revoked));
        assert!(!Revoked.can_become(Active));
        assert!(!Expired.can_become(Active));
        assert!(!Revoked.can_become(Expired));
    }

    #[test]
    fn past_expiry_is_not_usable_even_when_active() {
        let credential = Credential::new_passphrase(
            OwnerRef::user("A@Example.com"),
            "corp",
            "ct".to_string(),
            "corr".to_string(),
            Some(Utc::now() - Duration::minutes(1)),
        );
        assert_eq!(credential.status, CredentialStatus::Active);
        assert!(!credential.is_usable_at(Utc::now()));
        assert_eq!(credential.owner, OwnerRef::User("a@example.com".to_string()));
    }

    #[test]
    fn owner_round_trips_through_columns() {
        let owner = OwnerRef::Device("AA-BB-CC-DD-EE-FF".parse().unwrap());
        let restored = OwnerRef::from_parts(owner.kind_code(), &owner.reference()).unwrap();
        assert_eq!(owner, restored);
        assert_eq!(owner.to_string(), "device:aa:bb:cc:dd:ee:ff");
    }
}
