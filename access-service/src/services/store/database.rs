//! PostgreSQL store.
//!
//! Rows are read into private `*Row` structs and mapped onto the domain
//! models; enum columns are stored as their snake_case codes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{
    AuditLog, CredentialStore, InsertOptions, InviteLedger, PolicyDraft, PolicyStore,
    RegistrationQueue, StoreError,
};
use crate::models::{
    AuditEvent, AuthorizationPolicy, Credential, CredentialKind, CredentialStatus, InviteCode,
    MacAddress, MethodBinding, OwnerRef, PendingRegistration, PendingStatus, PolicyAttributes,
    PolicyConditions,
};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn has_code(err: &sqlx::Error, code: &str) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|c| c == code)
}

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ==================== Row mapping ====================

#[derive(sqlx::FromRow)]
struct CredentialRow {
    credential_id: Uuid,
    kind_code: String,
    owner_kind: String,
    owner_ref: String,
    network_id: String,
    area: Option<String>,
    status_code: String,
    bound_mac: Option<String>,
    passphrase_ciphertext: Option<String>,
    correlation_id: Option<String>,
    serial: Option<String>,
    ca_ref: Option<String>,
    download_count: i32,
    auto_renew: bool,
    version: i64,
    revoked_reason: Option<String>,
    replaced_by: Option<Uuid>,
    created_utc: DateTime<Utc>,
    expires_utc: Option<DateTime<Utc>>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = StoreError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(Credential {
            credential_id: row.credential_id,
            kind: row.kind_code.parse()?,
            owner: OwnerRef::from_parts(&row.owner_kind, &row.owner_ref)?,
            network_id: row.network_id,
            area: row.area,
            status: row.status_code.parse()?,
            bound_mac: row
                .bound_mac
                .map(|m| m.parse::<MacAddress>())
                .transpose()
                .map_err(anyhow::Error::new)?,
            passphrase_ciphertext: row.passphrase_ciphertext,
            correlation_id: row.correlation_id,
            serial: row.serial,
            ca_ref: row.ca_ref,
            download_count: row.download_count,
            auto_renew: row.auto_renew,
            version: row.version,
            revoked_reason: row.revoked_reason,
            replaced_by: row.replaced_by,
            created_utc: row.created_utc,
            expires_utc: row.expires_utc,
            updated_utc: row.updated_utc,
        })
    }
}

fn credentials_from(rows: Vec<CredentialRow>) -> Result<Vec<Credential>, StoreError> {
    rows.into_iter().map(Credential::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct InviteRow {
    code: String,
    max_uses: i32,
    uses: i32,
    expires_utc: Option<DateTime<Utc>>,
    note: Option<String>,
    created_utc: DateTime<Utc>,
}

impl From<InviteRow> for InviteCode {
    fn from(row: InviteRow) -> Self {
        InviteCode {
            code: row.code,
            max_uses: row.max_uses,
            uses: row.uses,
            expires_utc: row.expires_utc,
            note: row.note,
            created_utc: row.created_utc,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    policy_id: i64,
    name: String,
    policy_type_code: String,
    priority: i32,
    attributes: Json<PolicyAttributes>,
    conditions: Json<PolicyConditions>,
    active: bool,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<PolicyRow> for AuthorizationPolicy {
    type Error = StoreError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        Ok(AuthorizationPolicy {
            policy_id: row.policy_id,
            name: row.name,
            policy_type: row.policy_type_code.parse()?,
            priority: row.priority,
            attributes: row.attributes.0,
            conditions: row.conditions.0,
            active: row.active,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BindingRow {
    method_id: String,
    method_kind_code: String,
    success_policy_id: Option<i64>,
    failure_policy_id: Option<i64>,
    registered_policy_id: Option<i64>,
    unregistered_policy_id: Option<i64>,
    conditional_policy_ids: Vec<i64>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<BindingRow> for MethodBinding {
    type Error = StoreError;

    fn try_from(row: BindingRow) -> Result<Self, Self::Error> {
        Ok(MethodBinding {
            method_id: row.method_id,
            method_kind: row.method_kind_code.parse()?,
            success_policy_id: row.success_policy_id,
            failure_policy_id: row.failure_policy_id,
            registered_policy_id: row.registered_policy_id,
            unregistered_policy_id: row.unregistered_policy_id,
            conditional_policy_ids: row.conditional_policy_ids,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    registration_id: Uuid,
    name: Option<String>,
    email: Option<String>,
    mac: Option<String>,
    auth_method_code: String,
    area: Option<String>,
    network_id: String,
    secret_ciphertext: Option<String>,
    status_code: String,
    notes: Option<String>,
    decided_by: Option<String>,
    decided_utc: Option<DateTime<Utc>>,
    credential_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<PendingRow> for PendingRegistration {
    type Error = StoreError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        Ok(PendingRegistration {
            registration_id: row.registration_id,
            name: row.name,
            email: row.email,
            mac: row
                .mac
                .map(|m| m.parse::<MacAddress>())
                .transpose()
                .map_err(anyhow::Error::new)?,
            auth_method: row.auth_method_code.parse()?,
            area: row.area,
            network_id: row.network_id,
            secret_ciphertext: row.secret_ciphertext,
            status: row.status_code.parse()?,
            notes: row.notes,
            decided_by: row.decided_by,
            decided_utc: row.decided_utc,
            credential_id: row.credential_id,
            created_utc: row.created_utc,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    event_id: Uuid,
    action_code: String,
    actor: String,
    target: Option<String>,
    details: Option<String>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEvent {
            event_id: row.event_id,
            action: row.action_code.parse()?,
            actor: row.actor,
            target: row.target,
            details: row.details,
            created_utc: row.created_utc,
        })
    }
}

// ==================== Credential Operations ====================

const INSERT_CREDENTIAL: &str = r#"
    INSERT INTO credentials (
        credential_id, kind_code, owner_kind, owner_ref, network_id, area, status_code,
        bound_mac, passphrase_ciphertext, correlation_id, serial, ca_ref, download_count,
        auto_renew, version, revoked_reason, replaced_by, created_utc, expires_utc, updated_utc
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
"#;

async fn insert_credential_row(
    conn: &mut sqlx::PgConnection,
    credential: &Credential,
) -> Result<(), sqlx::Error> {
    sqlx::query(INSERT_CREDENTIAL)
        .bind(credential.credential_id)
        .bind(credential.kind.as_str())
        .bind(credential.owner.kind_code())
        .bind(credential.owner.reference())
        .bind(&credential.network_id)
        .bind(&credential.area)
        .bind(credential.status.as_str())
        .bind(credential.bound_mac.map(|m| m.to_string()))
        .bind(&credential.passphrase_ciphertext)
        .bind(&credential.correlation_id)
        .bind(&credential.serial)
        .bind(&credential.ca_ref)
        .bind(credential.download_count)
        .bind(credential.auto_renew)
        .bind(credential.version)
        .bind(&credential.revoked_reason)
        .bind(credential.replaced_by)
        .bind(credential.created_utc)
        .bind(credential.expires_utc)
        .bind(credential.updated_utc)
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl CredentialStore for Database {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            StoreError::from(e)
        })?;
        Ok(())
    }

    async fn insert_credential(
        &self,
        credential: &Credential,
        options: &InsertOptions,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        if options.exclusive {
            // Serialise issuers for the same (owner, network, kind) until commit.
            let lock_key = format!(
                "{}|{}|{}",
                credential.owner,
                credential.network_id,
                credential.kind.as_str()
            );
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(&lock_key)
                .execute(&mut *tx)
                .await?;

            let taken: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM credentials
                    WHERE owner_kind = $1 AND owner_ref = $2 AND network_id = $3
                      AND kind_code = $4 AND status_code = 'active'
                      AND (expires_utc IS NULL OR expires_utc > now())
                )
                "#,
            )
            .bind(credential.owner.kind_code())
            .bind(credential.owner.reference())
            .bind(&credential.network_id)
            .bind(credential.kind.as_str())
            .fetch_one(&mut *tx)
            .await?;

            if taken {
                return Err(StoreError::DuplicateActive {
                    owner: credential.owner.to_string(),
                    network_id: credential.network_id.clone(),
                    kind: credential.kind.as_str(),
                });
            }
        }

        insert_credential_row(&mut tx, credential).await?;

        if let Some(code) = options.redeem_code.as_deref() {
            let redeemed = sqlx::query(
                r#"
                UPDATE invite_codes SET uses = uses + 1
                WHERE code = $1 AND uses < max_uses
                  AND (expires_utc IS NULL OR expires_utc > $2)
                "#,
            )
            .bind(InviteCode::normalize(code))
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            if redeemed.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(StoreError::InviteUnavailable);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_credential(&self, credential_id: Uuid) -> Result<Option<Credential>, StoreError> {
        sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE credential_id = $1")
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Credential::try_from)
            .transpose()
    }

    async fn find_active_for_owner(
        &self,
        owner: &OwnerRef,
        network_id: &str,
        kind: Option<CredentialKind>,
    ) -> Result<Option<Credential>, StoreError> {
        sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT * FROM credentials
            WHERE owner_kind = $1 AND owner_ref = $2 AND network_id = $3
              AND ($4::TEXT IS NULL OR kind_code = $4)
              AND status_code = 'active'
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(owner.kind_code())
        .bind(owner.reference())
        .bind(network_id)
        .bind(kind.map(|k| k.as_str()))
        .fetch_optional(&self.pool)
        .await?
        .map(Credential::try_from)
        .transpose()
    }

    async fn find_active_by_mac(
        &self,
        mac: &MacAddress,
        network_id: &str,
    ) -> Result<Option<Credential>, StoreError> {
        sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT * FROM credentials
            WHERE bound_mac = $1 AND network_id = $2 AND status_code = 'active'
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(mac.to_string())
        .bind(network_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Credential::try_from)
        .transpose()
    }

    async fn list_credentials(
        &self,
        status: Option<CredentialStatus>,
    ) -> Result<Vec<Credential>, StoreError> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT * FROM credentials
            WHERE ($1::TEXT IS NULL OR status_code = $1)
            ORDER BY created_utc DESC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        credentials_from(rows)
    }

    async fn transition_credential(
        &self,
        credential_id: Uuid,
        expected_version: i64,
        from: &[CredentialStatus],
        to: CredentialStatus,
        reason: Option<&str>,
    ) -> Result<Option<Credential>, StoreError> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        sqlx::query_as::<_, CredentialRow>(
            r#"
            UPDATE credentials
            SET status_code = $1,
                version = version + 1,
                revoked_reason = COALESCE($2, revoked_reason),
                updated_utc = NOW()
            WHERE credential_id = $3 AND version = $4 AND status_code = ANY($5)
            RETURNING *
            "#,
        )
        .bind(to.as_str())
        .bind(reason)
        .bind(credential_id)
        .bind(expected_version)
        .bind(&from)
        .fetch_optional(&self.pool)
        .await?
        .map(Credential::try_from)
        .transpose()
    }

    async fn replace_credential(
        &self,
        old_id: Uuid,
        expected_version: i64,
        replacement: &Credential,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        insert_credential_row(&mut tx, replacement).await?;

        let revoked = sqlx::query(
            r#"
            UPDATE credentials
            SET status_code = 'revoked',
                version = version + 1,
                revoked_reason = 'renewed',
                replaced_by = $1,
                updated_utc = NOW()
            WHERE credential_id = $2 AND version = $3
              AND status_code IN ('active', 'expired')
            "#,
        )
        .bind(replacement.credential_id)
        .bind(old_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn record_download(&self, credential_id: Uuid) -> Result<Option<Credential>, StoreError> {
        sqlx::query_as::<_, CredentialRow>(
            r#"
            UPDATE credentials
            SET download_count = download_count + 1, updated_utc = NOW()
            WHERE credential_id = $1 AND status_code = 'active'
            RETURNING *
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Credential::try_from)
        .transpose()
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE credentials
            SET status_code = 'expired', version = version + 1, updated_utc = $1
            WHERE status_code = 'active' AND expires_utc IS NOT NULL AND expires_utc <= $1
            RETURNING credential_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn delete_credential(&self, credential_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM credentials WHERE credential_id = $1")
            .bind(credential_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ==================== Invite Operations ====================

#[async_trait]
impl InviteLedger for Database {
    async fn create_invite(&self, invite: &InviteCode) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO invite_codes (code, max_uses, uses, expires_utc, note, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&invite.code)
        .bind(invite.max_uses)
        .bind(invite.uses)
        .bind(invite.expires_utc)
        .bind(&invite.note)
        .bind(invite.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if has_code(&e, UNIQUE_VIOLATION) {
                StoreError::Duplicate(format!("invite code {}", invite.code))
            } else {
                StoreError::from(e)
            }
        })?;
        Ok(())
    }

    async fn find_invite(&self, code: &str) -> Result<Option<InviteCode>, StoreError> {
        let row = sqlx::query_as::<_, InviteRow>("SELECT * FROM invite_codes WHERE code = $1")
            .bind(InviteCode::normalize(code))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(InviteCode::from))
    }

    async fn list_invites(&self) -> Result<Vec<InviteCode>, StoreError> {
        let rows =
            sqlx::query_as::<_, InviteRow>("SELECT * FROM invite_codes ORDER BY created_utc DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(InviteCode::from).collect())
    }

    async fn delete_invite(&self, code: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM invite_codes WHERE code = $1")
            .bind(InviteCode::normalize(code))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn redeem_invite(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<InviteCode, StoreError> {
        sqlx::query_as::<_, InviteRow>(
            r#"
            UPDATE invite_codes SET uses = uses + 1
            WHERE code = $1 AND uses < max_uses
              AND (expires_utc IS NULL OR expires_utc > $2)
            RETURNING *
            "#,
        )
        .bind(InviteCode::normalize(code))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .map(InviteCode::from)
        .ok_or(StoreError::InviteUnavailable)
    }
}

// ==================== Policy Operations ====================

#[async_trait]
impl PolicyStore for Database {
    async fn insert_policy(&self, draft: &PolicyDraft) -> Result<AuthorizationPolicy, StoreError> {
        sqlx::query_as::<_, PolicyRow>(
            r#"
            INSERT INTO authorization_policies
                (name, policy_type_code, priority, attributes, conditions, active, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(&draft.name)
        .bind(draft.policy_type.as_str())
        .bind(draft.priority)
        .bind(Json(&draft.attributes))
        .bind(Json(&draft.conditions))
        .bind(draft.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if has_code(&e, UNIQUE_VIOLATION) {
                StoreError::Duplicate(format!("policy {}", draft.name))
            } else {
                StoreError::from(e)
            }
        })?
        .try_into()
    }

    async fn update_policy(
        &self,
        policy_id: i64,
        draft: &PolicyDraft,
    ) -> Result<Option<AuthorizationPolicy>, StoreError> {
        sqlx::query_as::<_, PolicyRow>(
            r#"
            UPDATE authorization_policies
            SET name = $1, policy_type_code = $2, priority = $3, attributes = $4,
                conditions = $5, active = $6, updated_utc = NOW()
            WHERE policy_id = $7
            RETURNING *
            "#,
        )
        .bind(&draft.name)
        .bind(draft.policy_type.as_str())
        .bind(draft.priority)
        .bind(Json(&draft.attributes))
        .bind(Json(&draft.conditions))
        .bind(draft.active)
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if has_code(&e, UNIQUE_VIOLATION) {
                StoreError::Duplicate(format!("policy {}", draft.name))
            } else {
                StoreError::from(e)
            }
        })?
        .map(AuthorizationPolicy::try_from)
        .transpose()
    }

    async fn find_policy(&self, policy_id: i64) -> Result<Option<AuthorizationPolicy>, StoreError> {
        sqlx::query_as::<_, PolicyRow>("SELECT * FROM authorization_policies WHERE policy_id = $1")
            .bind(policy_id)
            .fetch_optional(&self.pool)
            .await?
            .map(AuthorizationPolicy::try_from)
            .transpose()
    }

    async fn list_policies(&self) -> Result<Vec<AuthorizationPolicy>, StoreError> {
        sqlx::query_as::<_, PolicyRow>(
            "SELECT * FROM authorization_policies ORDER BY priority ASC, policy_id ASC",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AuthorizationPolicy::try_from)
        .collect()
    }

    async fn delete_policy(&self, policy_id: i64) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Conditional lists are arrays, so the foreign keys do not cover them.
        sqlx::query("LOCK TABLE method_bindings IN SHARE MODE")
            .execute(&mut *tx)
            .await?;
        let listed: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM method_bindings WHERE $1 = ANY(conditional_policy_ids))",
        )
        .bind(policy_id)
        .fetch_one(&mut *tx)
        .await?;
        if listed {
            return Err(StoreError::InUse(format!("policy {}", policy_id)));
        }

        let result = sqlx::query("DELETE FROM authorization_policies WHERE policy_id = $1")
            .bind(policy_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if has_code(&e, FOREIGN_KEY_VIOLATION) {
                    StoreError::InUse(format!("policy {}", policy_id))
                } else {
                    StoreError::from(e)
                }
            })?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_binding(&self, binding: &MethodBinding) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO method_bindings (
                method_id, method_kind_code, success_policy_id, failure_policy_id,
                registered_policy_id, unregistered_policy_id, conditional_policy_ids,
                updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (method_id) DO UPDATE SET
                method_kind_code = EXCLUDED.method_kind_code,
                success_policy_id = EXCLUDED.success_policy_id,
                failure_policy_id = EXCLUDED.failure_policy_id,
                registered_policy_id = EXCLUDED.registered_policy_id,
                unregistered_policy_id = EXCLUDED.unregistered_policy_id,
                conditional_policy_ids = EXCLUDED.conditional_policy_ids,
                updated_utc = EXCLUDED.updated_utc
            "#,
        )
        .bind(&binding.method_id)
        .bind(binding.method_kind.as_str())
        .bind(binding.success_policy_id)
        .bind(binding.failure_policy_id)
        .bind(binding.registered_policy_id)
        .bind(binding.unregistered_policy_id)
        .bind(&binding.conditional_policy_ids)
        .bind(binding.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_binding(&self, method_id: &str) -> Result<Option<MethodBinding>, StoreError> {
        sqlx::query_as::<_, BindingRow>("SELECT * FROM method_bindings WHERE method_id = $1")
            .bind(method_id)
            .fetch_optional(&self.pool)
            .await?
            .map(MethodBinding::try_from)
            .transpose()
    }

    async fn list_bindings(&self) -> Result<Vec<MethodBinding>, StoreError> {
        sqlx::query_as::<_, BindingRow>("SELECT * FROM method_bindings ORDER BY method_id")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(MethodBinding::try_from)
            .collect()
    }

    async fn delete_binding(&self, method_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM method_bindings WHERE method_id = $1")
            .bind(method_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ==================== Registration Queue Operations ====================

#[async_trait]
impl RegistrationQueue for Database {
    async fn enqueue_pending(
        &self,
        pending: &PendingRegistration,
    ) -> Result<PendingRegistration, StoreError> {
        let email = pending.email.as_deref();
        let mac = pending.mac.map(|m| m.to_string());
        let mut tx = self.pool.begin().await?;

        if email.is_some() || mac.is_some() {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(format!("pending|{}", pending.network_id))
                .execute(&mut *tx)
                .await?;

            let open = sqlx::query_as::<_, PendingRow>(
                r#"
                SELECT * FROM pending_registrations
                WHERE network_id = $1 AND status_code = 'pending'
                  AND (($2::TEXT IS NOT NULL AND email = $2)
                       OR ($3::TEXT IS NOT NULL AND mac = $3))
                ORDER BY created_utc ASC
                LIMIT 1
                "#,
            )
            .bind(&pending.network_id)
            .bind(email)
            .bind(&mac)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(open) = open {
                tx.commit().await?;
                return PendingRegistration::try_from(open);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO pending_registrations (
                registration_id, name, email, mac, auth_method_code, area, network_id,
                secret_ciphertext, status_code, notes, decided_by, decided_utc,
                credential_id, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(pending.registration_id)
        .bind(&pending.name)
        .bind(&pending.email)
        .bind(pending.mac.map(|m| m.to_string()))
        .bind(pending.auth_method.as_str())
        .bind(&pending.area)
        .bind(&pending.network_id)
        .bind(&pending.secret_ciphertext)
        .bind(pending.status.as_str())
        .bind(&pending.notes)
        .bind(&pending.decided_by)
        .bind(pending.decided_utc)
        .bind(pending.credential_id)
        .bind(pending.created_utc)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(pending.clone())
    }

    async fn find_pending(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<PendingRegistration>, StoreError> {
        sqlx::query_as::<_, PendingRow>(
            "SELECT * FROM pending_registrations WHERE registration_id = $1",
        )
        .bind(registration_id)
        .fetch_optional(&self.pool)
        .await?
        .map(PendingRegistration::try_from)
        .transpose()
    }

    async fn list_pending(
        &self,
        status: Option<PendingStatus>,
    ) -> Result<Vec<PendingRegistration>, StoreError> {
        sqlx::query_as::<_, PendingRow>(
            r#"
            SELECT * FROM pending_registrations
            WHERE ($1::TEXT IS NULL OR status_code = $1)
            ORDER BY created_utc ASC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PendingRegistration::try_from)
        .collect()
    }

    async fn decide_pending(
        &self,
        registration_id: Uuid,
        from: PendingStatus,
        to: PendingStatus,
        decided_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Option<PendingRegistration>, StoreError> {
        sqlx::query_as::<_, PendingRow>(
            r#"
            UPDATE pending_registrations
            SET status_code = $1,
                decided_by = $2,
                decided_utc = CASE WHEN $2::TEXT IS NULL THEN NULL ELSE NOW() END,
                notes = COALESCE($3, notes)
            WHERE registration_id = $4 AND status_code = $5
            RETURNING *
            "#,
        )
        .bind(to.as_str())
        .bind(decided_by)
        .bind(notes)
        .bind(registration_id)
        .bind(from.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(PendingRegistration::try_from)
        .transpose()
    }

    async fn attach_credential(
        &self,
        registration_id: Uuid,
        credential_id: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE pending_registrations SET credential_id = $1 WHERE registration_id = $2",
        )
        .bind(credential_id)
        .bind(registration_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ==================== Audit Operations ====================

#[async_trait]
impl AuditLog for Database {
    async fn record(&self, event: &AuditEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (event_id, action_code, actor, target, details, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.event_id)
        .bind(event.action.as_str())
        .bind(&event.actor)
        .bind(&event.target)
        .bind(&event.details)
        .bind(event.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_events(&self, limit: i64) -> Result<Vec<AuditEvent>, StoreError> {
        sqlx::query_as::<_, AuditRow>(
            "SELECT * FROM audit_events ORDER BY created_utc DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AuditEvent::try_from)
        .collect()
    }
}
