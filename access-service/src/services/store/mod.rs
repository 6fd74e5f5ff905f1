//! Persistence seams. Every conditional state change (invite redemption,
//! credential transitions, pending decisions) is a single atomic operation
//! on the backend so concurrent requests cannot over-redeem or double-issue.

mod database;
mod memory;

pub use database::Database;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuditEvent, AuthorizationPolicy, Credential, CredentialKind, CredentialStatus, InviteCode,
    MacAddress, MethodBinding, OwnerRef, PendingRegistration, PendingStatus, PolicyAttributes,
    PolicyConditions, PolicyType,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invite code unavailable")]
    InviteUnavailable,

    #[error("an active {kind} credential already exists for {owner} on {network_id}")]
    DuplicateActive {
        owner: String,
        network_id: String,
        kind: &'static str,
    },

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("{0} is still referenced")]
    InUse(String),

    #[error("store error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

/// How a new credential is written.
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// Refuse the insert when an active credential already exists for the
    /// same owner, network and kind.
    pub exclusive: bool,
    /// Redeem this invite code in the same transaction, after the insert.
    pub redeem_code: Option<String>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn insert_credential(
        &self,
        credential: &Credential,
        options: &InsertOptions,
    ) -> Result<(), StoreError>;

    async fn find_credential(&self, credential_id: Uuid) -> Result<Option<Credential>, StoreError>;

    /// Most recent active credential owned by `owner` on `network_id`.
    async fn find_active_for_owner(
        &self,
        owner: &OwnerRef,
        network_id: &str,
        kind: Option<CredentialKind>,
    ) -> Result<Option<Credential>, StoreError>;

    /// Most recent active credential bound to `mac` on `network_id`.
    async fn find_active_by_mac(
        &self,
        mac: &MacAddress,
        network_id: &str,
    ) -> Result<Option<Credential>, StoreError>;

    async fn list_credentials(
        &self,
        status: Option<CredentialStatus>,
    ) -> Result<Vec<Credential>, StoreError>;

    /// Compare-and-set status change. Returns `None` when the credential is
    /// missing, its version moved on, or its status is not in `from`.
    async fn transition_credential(
        &self,
        credential_id: Uuid,
        expected_version: i64,
        from: &[CredentialStatus],
        to: CredentialStatus,
        reason: Option<&str>,
    ) -> Result<Option<Credential>, StoreError>;

    /// Revoke `old_id` (at `expected_version`) pointing at `replacement`, and
    /// insert `replacement`, atomically. `false` when the revoke lost a race.
    async fn replace_credential(
        &self,
        old_id: Uuid,
        expected_version: i64,
        replacement: &Credential,
    ) -> Result<bool, StoreError>;

    /// Bump the download counter of an active credential.
    async fn record_download(&self, credential_id: Uuid) -> Result<Option<Credential>, StoreError>;

    /// Flip active credentials whose expiry has passed to expired.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    async fn delete_credential(&self, credential_id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait InviteLedger: Send + Sync {
    async fn create_invite(&self, invite: &InviteCode) -> Result<(), StoreError>;

    async fn find_invite(&self, code: &str) -> Result<Option<InviteCode>, StoreError>;

    async fn list_invites(&self) -> Result<Vec<InviteCode>, StoreError>;

    async fn delete_invite(&self, code: &str) -> Result<bool, StoreError>;

    /// Atomically consume one use. Fails with `InviteUnavailable` when the
    /// code is unknown, expired or exhausted.
    async fn redeem_invite(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<InviteCode, StoreError>;
}

/// Fields an operator supplies for a policy; the store assigns the id.
#[derive(Debug, Clone)]
pub struct PolicyDraft {
    pub name: String,
    pub policy_type: PolicyType,
    pub priority: i32,
    pub attributes: PolicyAttributes,
    pub conditions: PolicyConditions,
    pub active: bool,
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn insert_policy(&self, draft: &PolicyDraft) -> Result<AuthorizationPolicy, StoreError>;

    async fn update_policy(
        &self,
        policy_id: i64,
        draft: &PolicyDraft,
    ) -> Result<Option<AuthorizationPolicy>, StoreError>;

    async fn find_policy(&self, policy_id: i64) -> Result<Option<AuthorizationPolicy>, StoreError>;

    /// All policies ordered by priority, then id.
    async fn list_policies(&self) -> Result<Vec<AuthorizationPolicy>, StoreError>;

    /// Fails with `InUse` while any method binding references the policy.
    async fn delete_policy(&self, policy_id: i64) -> Result<bool, StoreError>;

    async fn save_binding(&self, binding: &MethodBinding) -> Result<(), StoreError>;

    async fn find_binding(&self, method_id: &str) -> Result<Option<MethodBinding>, StoreError>;

    async fn list_bindings(&self) -> Result<Vec<MethodBinding>, StoreError>;

    async fn delete_binding(&self, method_id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait RegistrationQueue: Send + Sync {
    /// Queue `pending` unless the same requester (email or MAC) already has
    /// a pending request on the network, in which case that one is returned.
    async fn enqueue_pending(
        &self,
        pending: &PendingRegistration,
    ) -> Result<PendingRegistration, StoreError>;

    async fn find_pending(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<PendingRegistration>, StoreError>;

    async fn list_pending(
        &self,
        status: Option<PendingStatus>,
    ) -> Result<Vec<PendingRegistration>, StoreError>;

    /// Compare-and-set on status. `None` when the row is missing or not in
    /// `from`.
    async fn decide_pending(
        &self,
        registration_id: Uuid,
        from: PendingStatus,
        to: PendingStatus,
        decided_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Option<PendingRegistration>, StoreError>;

    async fn attach_credential(
        &self,
        registration_id: Uuid,
        credential_id: Uuid,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_events(&self, limit: i64) -> Result<Vec<AuditEvent>, StoreError>;
}

/// The store handles shared by every service. Both backends implement all
/// traits; each field is the same backend viewed through one seam.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub invites: Arc<dyn InviteLedger>,
    pub policies: Arc<dyn PolicyStore>,
    pub registrations: Arc<dyn RegistrationQueue>,
    pub audit: Arc<dyn AuditLog>,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: CredentialStore + InviteLedger + PolicyStore + RegistrationQueue + AuditLog + 'static,
    {
        Self {
            credentials: backend.clone(),
            invites: backend.clone(),
            policies: backend.clone(),
            registrations: backend.clone(),
            audit: backend,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }
}
