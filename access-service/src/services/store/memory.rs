use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    AuditLog, CredentialStore, InsertOptions, InviteLedger, PolicyDraft, PolicyStore,
    RegistrationQueue, StoreError,
};
use crate::models::{
    AuditEvent, AuthorizationPolicy, Credential, CredentialKind, CredentialStatus, InviteCode,
    MacAddress, MethodBinding, OwnerRef, PendingRegistration, PendingStatus,
};

#[derive(Default)]
struct Inner {
    credentials: HashMap<Uuid, Credential>,
    invites: HashMap<String, InviteCode>,
    policies: HashMap<i64, AuthorizationPolicy>,
    next_policy_id: i64,
    bindings: HashMap<String, MethodBinding>,
    pending: HashMap<Uuid, PendingRegistration>,
    audit: Vec<AuditEvent>,
}

/// In-process store for development and tests. One mutex guards all state,
/// so every trait method is atomic with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
    }
}

fn redeem_locked(
    inner: &mut Inner,
    code: &str,
    now: DateTime<Utc>,
) -> Result<InviteCode, StoreError> {
    let invite = inner
        .invites
        .get_mut(&InviteCode::normalize(code))
        .ok_or(StoreError::InviteUnavailable)?;
    if !invite.is_redeemable_at(now) {
        return Err(StoreError::InviteUnavailable);
    }
    invite.uses += 1;
    Ok(invite.clone())
}

fn newest_active<'a>(
    credentials: impl Iterator<Item = &'a Credential>,
) -> Option<Credential> {
    credentials
        .filter(|c| c.status == CredentialStatus::Active)
        .max_by_key(|c| c.created_utc)
        .cloned()
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn insert_credential(
        &self,
        credential: &Credential,
        options: &InsertOptions,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;

        if options.exclusive {
            let now = Utc::now();
            let taken = inner.credentials.values().any(|c| {
                c.is_usable_at(now)
                    && c.owner == credential.owner
                    && c.network_id == credential.network_id
                    && c.kind == credential.kind
            });
            if taken {
                return Err(StoreError::DuplicateActive {
                    owner: credential.owner.to_string(),
                    network_id: credential.network_id.clone(),
                    kind: credential.kind.as_str(),
                });
            }
        }

        // Redeem before mutating so a failed redemption leaves nothing behind.
        if let Some(code) = options.redeem_code.as_deref() {
            redeem_locked(&mut inner, code, Utc::now())?;
        }
        inner
            .credentials
            .insert(credential.credential_id, credential.clone());
        Ok(())
    }

    async fn find_credential(&self, credential_id: Uuid) -> Result<Option<Credential>, StoreError> {
        Ok(self.lock()?.credentials.get(&credential_id).cloned())
    }

    async fn find_active_for_owner(
        &self,
        owner: &OwnerRef,
        network_id: &str,
        kind: Option<CredentialKind>,
    ) -> Result<Option<Credential>, StoreError> {
        let inner = self.lock()?;
        Ok(newest_active(inner.credentials.values().filter(|c| {
            &c.owner == owner
                && c.network_id == network_id
                && kind.is_none_or(|k| c.kind == k)
        })))
    }

    async fn find_active_by_mac(
        &self,
        mac: &MacAddress,
        network_id: &str,
    ) -> Result<Option<Credential>, StoreError> {
        let inner = self.lock()?;
        Ok(newest_active(inner.credentials.values().filter(|c| {
            c.bound_mac.as_ref() == Some(mac) && c.network_id == network_id
        })))
    }

    async fn list_credentials(
        &self,
        status: Option<CredentialStatus>,
    ) -> Result<Vec<Credential>, StoreError> {
        let inner = self.lock()?;
        let mut credentials: Vec<Credential> = inner
            .credentials
            .values()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        credentials.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(credentials)
    }

    async fn transition_credential(
        &self,
        credential_id: Uuid,
        expected_version: i64,
        from: &[CredentialStatus],
        to: CredentialStatus,
        reason: Option<&str>,
    ) -> Result<Option<Credential>, StoreError> {
        let mut inner = self.lock()?;
        let Some(credential) = inner.credentials.get_mut(&credential_id) else {
            return Ok(None);
        };
        if credential.version != expected_version || !from.contains(&credential.status) {
            return Ok(None);
        }
        credential.status = to;
        credential.version += 1;
        credential.updated_utc = Utc::now();
        if let Some(reason) = reason {
            credential.revoked_reason = Some(reason.to_string());
        }
        Ok(Some(credential.clone()))
    }

    async fn replace_credential(
        &self,
        old_id: Uuid,
        expected_version: i64,
        replacement: &Credential,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let Some(old) = inner.credentials.get_mut(&old_id) else {
            return Ok(false);
        };
        let renewable = matches!(
            old.status,
            CredentialStatus::Active | CredentialStatus::Expired
        );
        if old.version != expected_version || !renewable {
            return Ok(false);
        }
        old.status = CredentialStatus::Revoked;
        old.version += 1;
        old.revoked_reason = Some("renewed".to_string());
        old.replaced_by = Some(replacement.credential_id);
        old.updated_utc = Utc::now();
        inner
            .credentials
            .insert(replacement.credential_id, replacement.clone());
        Ok(true)
    }

    async fn record_download(&self, credential_id: Uuid) -> Result<Option<Credential>, StoreError> {
        let mut inner = self.lock()?;
        match inner.credentials.get_mut(&credential_id) {
            Some(c) if c.status == CredentialStatus::Active => {
                c.download_count += 1;
                c.updated_utc = Utc::now();
                Ok(Some(c.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut inner = self.lock()?;
        let mut expired = Vec::new();
        for credential in inner.credentials.values_mut() {
            if credential.status == CredentialStatus::Active && credential.is_expired_at(now) {
                credential.status = CredentialStatus::Expired;
                credential.version += 1;
                credential.updated_utc = now;
                expired.push(credential.credential_id);
            }
        }
        Ok(expired)
    }

    async fn delete_credential(&self, credential_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lock()?.credentials.remove(&credential_id).is_some())
    }
}

#[async_trait]
impl InviteLedger for MemoryStore {
    async fn create_invite(&self, invite: &InviteCode) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.invites.contains_key(&invite.code) {
            return Err(StoreError::Duplicate(format!("invite code {}", invite.code)));
        }
        inner.invites.insert(invite.code.clone(), invite.clone());
        Ok(())
    }

    async fn find_invite(&self, code: &str) -> Result<Option<InviteCode>, StoreError> {
        Ok(self
            .lock()?
            .invites
            .get(&InviteCode::normalize(code))
            .cloned())
    }

    async fn list_invites(&self) -> Result<Vec<InviteCode>, StoreError> {
        let mut invites: Vec<InviteCode> = self.lock()?.invites.values().cloned().collect();
        invites.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(invites)
    }

    async fn delete_invite(&self, code: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .invites
            .remove(&InviteCode::normalize(code))
            .is_some())
    }

    async fn redeem_invite(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<InviteCode, StoreError> {
        let mut inner = self.lock()?;
        redeem_locked(&mut inner, code, now)
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn insert_policy(&self, draft: &PolicyDraft) -> Result<AuthorizationPolicy, StoreError> {
        let mut inner = self.lock()?;
        if inner.policies.values().any(|p| p.name == draft.name) {
            return Err(StoreError::Duplicate(format!("policy {}", draft.name)));
        }
        inner.next_policy_id += 1;
        let now = Utc::now();
        let policy = AuthorizationPolicy {
            policy_id: inner.next_policy_id,
            name: draft.name.clone(),
            policy_type: draft.policy_type,
            priority: draft.priority,
            attributes: draft.attributes.clone(),
            conditions: draft.conditions.clone(),
            active: draft.active,
            created_utc: now,
            updated_utc: now,
        };
        inner.policies.insert(policy.policy_id, policy.clone());
        Ok(policy)
    }

    async fn update_policy(
        &self,
        policy_id: i64,
        draft: &PolicyDraft,
    ) -> Result<Option<AuthorizationPolicy>, StoreError> {
        let mut inner = self.lock()?;
        if inner
            .policies
            .values()
            .any(|p| p.name == draft.name && p.policy_id != policy_id)
        {
            return Err(StoreError::Duplicate(format!("policy {}", draft.name)));
        }
        let Some(policy) = inner.policies.get_mut(&policy_id) else {
            return Ok(None);
        };
        policy.name = draft.name.clone();
        policy.policy_type = draft.policy_type;
        policy.priority = draft.priority;
        policy.attributes = draft.attributes.clone();
        policy.conditions = draft.conditions.clone();
        policy.active = draft.active;
        policy.updated_utc = Utc::now();
        Ok(Some(policy.clone()))
    }

    async fn find_policy(&self, policy_id: i64) -> Result<Option<AuthorizationPolicy>, StoreError> {
        Ok(self.lock()?.policies.get(&policy_id).cloned())
    }

    async fn list_policies(&self) -> Result<Vec<AuthorizationPolicy>, StoreError> {
        let mut policies: Vec<AuthorizationPolicy> =
            self.lock()?.policies.values().cloned().collect();
        policies.sort_by_key(|p| p.rank());
        Ok(policies)
    }

    async fn delete_policy(&self, policy_id: i64) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        if inner.bindings.values().any(|b| b.references(policy_id)) {
            return Err(StoreError::InUse(format!("policy {}", policy_id)));
        }
        Ok(inner.policies.remove(&policy_id).is_some())
    }

    async fn save_binding(&self, binding: &MethodBinding) -> Result<(), StoreError> {
        self.lock()?
            .bindings
            .insert(binding.method_id.clone(), binding.clone());
        Ok(())
    }

    async fn find_binding(&self, method_id: &str) -> Result<Option<MethodBinding>, StoreError> {
        Ok(self.lock()?.bindings.get(method_id).cloned())
    }

    async fn list_bindings(&self) -> Result<Vec<MethodBinding>, StoreError> {
        let mut bindings: Vec<MethodBinding> = self.lock()?.bindings.values().cloned().collect();
        bindings.sort_by(|a, b| a.method_id.cmp(&b.method_id));
        Ok(bindings)
    }

    async fn delete_binding(&self, method_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.bindings.remove(method_id).is_some())
    }
}

#[async_trait]
impl RegistrationQueue for MemoryStore {
    async fn enqueue_pending(
        &self,
        pending: &PendingRegistration,
    ) -> Result<PendingRegistration, StoreError> {
        let mut inner = self.lock()?;
        let open = inner
            .pending
            .values()
            .filter(|p| p.status == PendingStatus::Pending && p.same_requester(pending))
            .min_by_key(|p| p.created_utc)
            .cloned();
        if let Some(open) = open {
            return Ok(open);
        }
        inner
            .pending
            .insert(pending.registration_id, pending.clone());
        Ok(pending.clone())
    }

    async fn find_pending(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<PendingRegistration>, StoreError> {
        Ok(self.lock()?.pending.get(&registration_id).cloned())
    }

    async fn list_pending(
        &self,
        status: Option<PendingStatus>,
    ) -> Result<Vec<PendingRegistration>, StoreError> {
        let mut pending: Vec<PendingRegistration> = self
            .lock()?
            .pending
            .values()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_utc.cmp(&b.created_utc));
        Ok(pending)
    }

    async fn decide_pending(
        &self,
        registration_id: Uuid,
        from: PendingStatus,
        to: PendingStatus,
        decided_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Option<PendingRegistration>, StoreError> {
        let mut inner = self.lock()?;
        match inner.pending.get_mut(&registration_id) {
            Some(p) if p.status == from => {
                p.status = to;
                p.decided_by = decided_by.map(str::to_string);
                p.decided_utc = decided_by.map(|_| Utc::now());
                if notes.is_some() {
                    p.notes = notes.map(str::to_string);
                }
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn attach_credential(
        &self,
        registration_id: Uuid,
        credential_id: Uuid,
    ) -> Result<(), StoreError> {
        if let Some(p) = self.lock()?.pending.get_mut(&registration_id) {
            p.credential_id = Some(credential_id);
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn record(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.lock()?.audit.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, limit: i64) -> Result<Vec<AuditEvent>, StoreError> {
        let inner = self.lock()?;
        let limit = usize::try_from(limit.max(0)).unwrap_or(0);
        Ok(inner.audit.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn passphrase(owner: &str) -> Credential {
        Credential::new_passphrase(
            OwnerRef::user(owner),
            "corp",
            "ct".to_string(),
            "corr".to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn failed_redemption_leaves_no_credential() {
        let store = MemoryStore::new();
        let credential = passphrase("a@example.com");
        let options = InsertOptions {
            exclusive: false,
            redeem_code: Some("MISSING".to_string()),
        };

        let result = store.insert_credential(&credential, &options).await;
        assert!(matches!(result, Err(StoreError::InviteUnavailable)));
        assert!(store
            .find_credential(credential.credential_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn exclusive_insert_rejects_second_active() {
        let store = MemoryStore::new();
        let options = InsertOptions {
            exclusive: true,
            redeem_code: None,
        };
        store
            .insert_credential(&passphrase("a@example.com"), &options)
            .await
            .unwrap();
        let second = store
            .insert_credential(&passphrase("A@example.com"), &options)
            .await;
        assert!(matches!(second, Err(StoreError::DuplicateActive { .. })));
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let credential = passphrase("a@example.com");
        store
            .insert_credential(&credential, &InsertOptions::default())
            .await
            .unwrap();

        let revoked = store
            .transition_credential(
                credential.credential_id,
                0,
                &[CredentialStatus::Active],
                CredentialStatus::Revoked,
                Some("lost"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(revoked.version, 1);

        let stale = store
            .transition_credential(
                credential.credential_id,
                0,
                &[CredentialStatus::Active],
                CredentialStatus::Expired,
                None,
            )
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn expire_due_is_idempotent() {
        let store = MemoryStore::new();
        let mut credential = passphrase("a@example.com");
        credential.expires_utc = Some(Utc::now() - Duration::minutes(5));
        store
            .insert_credential(&credential, &InsertOptions::default())
            .await
            .unwrap();

        assert_eq!(store.expire_due(Utc::now()).await.unwrap().len(), 1);
        assert!(store.expire_due(Utc::now()).await.unwrap().is_empty());
    }
}
