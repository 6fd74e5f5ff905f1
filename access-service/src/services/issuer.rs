//! Credential lifecycle: issue, reveal, revoke, renew, download, delete and
//! expiry sweeps.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::audit::AuditService;
use super::certificate_authority::{subject_dn, CertificateAuthority, CertificateFormat};
use super::metrics;
use super::passphrase::{
    generate_correlation_id, generate_passphrase, validate_passphrase, PassphraseCipher,
};
use super::store::{CredentialStore, InsertOptions};
use super::ServiceError;
use crate::models::{
    AuditAction, AuditEvent, AuthMethod, Credential, CredentialKind, CredentialStatus,
    MacAddress, OwnerRef,
};

pub const MIN_CERTIFICATE_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub network_id: String,
    pub passphrase_length: usize,
    /// Zero issues credentials without an expiry.
    pub validity_days: u32,
    pub allow_multiple_credentials: bool,
    pub organization: Option<String>,
    pub certificate_validity_days: u32,
}

/// Per-request issuance inputs.
#[derive(Debug, Clone, Default)]
pub struct IssueOptions {
    pub network_id: Option<String>,
    /// Caller-chosen passphrase; generated when absent.
    pub passphrase: Option<String>,
    /// Protects the exported certificate key; required for certificates.
    pub certificate_password: Option<String>,
    pub area: Option<String>,
    pub bound_mac: Option<MacAddress>,
    /// Redeemed atomically with the credential insert.
    pub redeem_code: Option<String>,
    pub auto_renew: bool,
}

/// A freshly issued credential. `passphrase` carries the plaintext exactly
/// once; it is never stored unencrypted.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub credential: Credential,
    pub passphrase: Option<String>,
}

#[derive(Clone)]
pub struct CredentialIssuer {
    credentials: Arc<dyn CredentialStore>,
    ca: Arc<dyn CertificateAuthority>,
    cipher: PassphraseCipher,
    audit: AuditService,
    settings: IssuerSettings,
}

fn validate_certificate_password(password: Option<&str>) -> Result<&str, ServiceError> {
    match password {
        Some(p) if p.chars().count() >= MIN_CERTIFICATE_PASSWORD_LEN => Ok(p),
        Some(_) => Err(ServiceError::Validation(format!(
            "certificate password must be at least {} characters",
            MIN_CERTIFICATE_PASSWORD_LEN
        ))),
        None => Err(ServiceError::Validation(
            "certificate password is required".to_string(),
        )),
    }
}

impl CredentialIssuer {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        ca: Arc<dyn CertificateAuthority>,
        cipher: PassphraseCipher,
        audit: AuditService,
        settings: IssuerSettings,
    ) -> Self {
        Self {
            credentials,
            ca,
            cipher,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &IssuerSettings {
        &self.settings
    }

    pub fn cipher(&self) -> &PassphraseCipher {
        &self.cipher
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.settings.validity_days > 0)
            .then(|| now + Duration::days(i64::from(self.settings.validity_days)))
    }

    fn subject_for(&self, owner: &OwnerRef, area: Option<&str>) -> String {
        subject_dn(
            &owner.reference(),
            area,
            self.settings.organization.as_deref(),
        )
    }

    async fn load(&self, credential_id: Uuid) -> Result<Credential, ServiceError> {
        self.credentials
            .find_credential(credential_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("credential {}", credential_id)))
    }

    pub async fn get(&self, credential_id: Uuid) -> Result<Credential, ServiceError> {
        self.load(credential_id).await
    }

    pub async fn list(
        &self,
        status: Option<CredentialStatus>,
    ) -> Result<Vec<Credential>, ServiceError> {
        Ok(self.credentials.list_credentials(status).await?)
    }

    #[instrument(skip(self, owner, method, options), fields(owner = %owner, method = method.as_str()))]
    pub async fn issue(
        &self,
        owner: OwnerRef,
        method: AuthMethod,
        options: IssueOptions,
        actor: &str,
    ) -> Result<IssuedCredential, ServiceError> {
        let network_id = options
            .network_id
            .clone()
            .unwrap_or_else(|| self.settings.network_id.clone());
        let insert = InsertOptions {
            exclusive: !self.settings.allow_multiple_credentials,
            redeem_code: options.redeem_code.clone(),
        };

        let issued = match method {
            AuthMethod::Passphrase => {
                self.issue_passphrase(owner, &network_id, &options, &insert)
                    .await?
            }
            AuthMethod::Certificate => {
                self.issue_certificate(owner, &network_id, &options, &insert)
                    .await?
            }
        };

        metrics::record_credential_issued(issued.credential.kind.as_str());
        if insert.redeem_code.is_some() {
            metrics::record_invite_redemption();
        }
        self.audit.log_async(
            AuditEvent::new(
                AuditAction::CredentialIssued,
                actor,
                Some(issued.credential.credential_id.to_string()),
            )
            .with_details(format!(
                "{} for {}",
                issued.credential.kind.as_str(),
                issued.credential.owner
            )),
        );
        tracing::info!(
            credential_id = %issued.credential.credential_id,
            kind = issued.credential.kind.as_str(),
            "Credential issued"
        );

        Ok(issued)
    }

    async fn issue_passphrase(
        &self,
        owner: OwnerRef,
        network_id: &str,
        options: &IssueOptions,
        insert: &InsertOptions,
    ) -> Result<IssuedCredential, ServiceError> {
        let passphrase = match options.passphrase.as_deref() {
            Some(p) => {
                validate_passphrase(p).map_err(ServiceError::Validation)?;
                p.to_string()
            }
            None => generate_passphrase(self.settings.passphrase_length),
        };

        let ciphertext = self.cipher.encrypt(&passphrase)?;
        let credential = Credential::new_passphrase(
            owner,
            network_id,
            ciphertext,
            generate_correlation_id(),
            self.expiry_from(Utc::now()),
        )
        .with_bound_mac(options.bound_mac)
        .with_area(options.area.clone());

        self.credentials.insert_credential(&credential, insert).await?;

        Ok(IssuedCredential {
            credential,
            passphrase: Some(passphrase),
        })
    }

    async fn issue_certificate(
        &self,
        owner: OwnerRef,
        network_id: &str,
        options: &IssueOptions,
        insert: &InsertOptions,
    ) -> Result<IssuedCredential, ServiceError> {
        let password = validate_certificate_password(options.certificate_password.as_deref())?;

        // Cheap pre-check so an obvious duplicate never reaches the CA. The
        // insert below still enforces exclusivity under concurrency.
        if insert.exclusive
            && self
                .credentials
                .find_active_for_owner(&owner, network_id, Some(CredentialKind::Certificate))
                .await?
                .is_some_and(|c| c.is_usable_at(Utc::now()))
        {
            return Err(ServiceError::Conflict(format!(
                "an active certificate already exists for {}",
                owner
            )));
        }

        let dn = self.subject_for(&owner, options.area.as_deref());
        let signed = self
            .ca
            .issue(&dn, password, self.settings.certificate_validity_days)
            .await?;

        let expires_utc = signed.not_after.or_else(|| self.expiry_from(Utc::now()));
        let credential = Credential::new_certificate(
            owner,
            network_id,
            signed.serial.clone(),
            signed.ca_ref,
            options.auto_renew,
            expires_utc,
        )
        .with_bound_mac(options.bound_mac)
        .with_area(options.area.clone());

        if let Err(e) = self.credentials.insert_credential(&credential, insert).await {
            self.revoke_orphan(&signed.serial, "issuance aborted").await;
            return Err(e.into());
        }

        Ok(IssuedCredential {
            credential,
            passphrase: None,
        })
    }

    /// Revoke a serial the CA signed but this service never recorded.
    async fn revoke_orphan(&self, serial: &str, reason: &str) {
        if let Err(e) = self.ca.revoke(serial, reason).await {
            tracing::error!(serial = %serial, error = %e, "Failed to revoke orphaned certificate");
        } else {
            tracing::warn!(serial = %serial, "Revoked orphaned certificate");
        }
    }

    /// Decrypt a shared passphrase. The audit record is written before the
    /// plaintext is returned; if auditing fails, nothing is revealed.
    #[instrument(skip(self))]
    pub async fn reveal(&self, credential_id: Uuid, actor: &str) -> Result<String, ServiceError> {
        let credential = self.load(credential_id).await?;

        if credential.kind != CredentialKind::SharedPassphrase {
            return Err(ServiceError::InvalidState(
                "only shared passphrases can be revealed".to_string(),
            ));
        }
        if !credential.is_usable_at(Utc::now()) {
            return Err(ServiceError::InvalidState(format!(
                "credential is {}",
                if credential.status == CredentialStatus::Active {
                    "expired"
                } else {
                    credential.status.as_str()
                }
            )));
        }

        let ciphertext = credential.passphrase_ciphertext.as_deref().ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!("passphrase credential has no ciphertext"))
        })?;
        let plaintext = self.cipher.decrypt(ciphertext)?;

        self.audit
            .log(AuditEvent::new(
                AuditAction::CredentialRevealed,
                actor,
                Some(credential_id.to_string()),
            ))
            .await?;

        Ok(plaintext)
    }

    #[instrument(skip(self))]
    pub async fn revoke(
        &self,
        credential_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<Credential, ServiceError> {
        let credential = self.load(credential_id).await?;
        if !credential.status.can_become(CredentialStatus::Revoked) {
            return Err(ServiceError::InvalidState(format!(
                "credential is {}",
                credential.status.as_str()
            )));
        }

        if let Some(serial) = credential.serial.as_deref() {
            self.ca.revoke(serial, reason).await?;
        }

        let revoked = self
            .credentials
            .transition_credential(
                credential_id,
                credential.version,
                &[CredentialStatus::Active, CredentialStatus::Expired],
                CredentialStatus::Revoked,
                Some(reason),
            )
            .await?
            .ok_or_else(|| {
                ServiceError::Conflict("credential was modified concurrently".to_string())
            })?;

        self.audit.log_async(
            AuditEvent::new(
                AuditAction::CredentialRevoked,
                actor,
                Some(credential_id.to_string()),
            )
            .with_details(reason.to_string()),
        );
        tracing::info!(credential_id = %credential_id, "Credential revoked");
        Ok(revoked)
    }

    /// Replace a certificate with a newly signed one. The old record is
    /// revoked and points at its replacement.
    #[instrument(skip(self, new_password))]
    pub async fn renew(
        &self,
        credential_id: Uuid,
        new_password: Option<&str>,
        actor: &str,
    ) -> Result<IssuedCredential, ServiceError> {
        let current = self.load(credential_id).await?;

        if current.kind != CredentialKind::Certificate {
            return Err(ServiceError::InvalidState(
                "only certificates can be renewed".to_string(),
            ));
        }
        if current.status == CredentialStatus::Revoked {
            return Err(ServiceError::InvalidState("credential is revoked".to_string()));
        }
        let password = validate_certificate_password(new_password)?;

        let dn = self.subject_for(&current.owner, current.area.as_deref());
        let signed = self
            .ca
            .issue(&dn, password, self.settings.certificate_validity_days)
            .await?;

        let expires_utc = signed.not_after.or_else(|| self.expiry_from(Utc::now()));
        let replacement = Credential::new_certificate(
            current.owner.clone(),
            &current.network_id,
            signed.serial.clone(),
            signed.ca_ref,
            current.auto_renew,
            expires_utc,
        )
        .with_bound_mac(current.bound_mac)
        .with_area(current.area.clone());

        let replaced = match self
            .credentials
            .replace_credential(credential_id, current.version, &replacement)
            .await
        {
            Ok(replaced) => replaced,
            Err(e) => {
                self.revoke_orphan(&signed.serial, "renewal aborted").await;
                return Err(e.into());
            }
        };
        if !replaced {
            self.revoke_orphan(&signed.serial, "renewal lost race").await;
            return Err(ServiceError::Conflict(
                "credential was modified concurrently".to_string(),
            ));
        }

        if let Some(old_serial) = current.serial.as_deref() {
            if let Err(e) = self.ca.revoke(old_serial, "superseded").await {
                tracing::error!(serial = %old_serial, error = %e, "Failed to revoke superseded certificate");
            }
        }

        metrics::record_credential_issued(replacement.kind.as_str());
        self.audit.log_async(
            AuditEvent::new(
                AuditAction::CredentialRenewed,
                actor,
                Some(credential_id.to_string()),
            )
            .with_details(format!("replaced by {}", replacement.credential_id)),
        );
        tracing::info!(
            credential_id = %credential_id,
            replacement_id = %replacement.credential_id,
            "Certificate renewed"
        );

        Ok(IssuedCredential {
            credential: replacement,
            passphrase: None,
        })
    }

    /// Export an active certificate from the CA and count the download.
    #[instrument(skip(self))]
    pub async fn download(
        &self,
        credential_id: Uuid,
        format: CertificateFormat,
        actor: &str,
    ) -> Result<(Vec<u8>, Credential), ServiceError> {
        let credential = self.load(credential_id).await?;

        if credential.kind != CredentialKind::Certificate {
            return Err(ServiceError::InvalidState(
                "credential is not a certificate".to_string(),
            ));
        }
        if !credential.is_usable_at(Utc::now()) {
            return Err(ServiceError::InvalidState(
                "certificate is not active".to_string(),
            ));
        }
        let serial = credential.serial.as_deref().ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!("certificate credential has no serial"))
        })?;

        let bytes = self.ca.export(serial, format).await?;

        let updated = self
            .credentials
            .record_download(credential_id)
            .await?
            .ok_or_else(|| ServiceError::InvalidState("certificate is not active".to_string()))?;

        self.audit.log_async(
            AuditEvent::new(
                AuditAction::CertificateDownloaded,
                actor,
                Some(credential_id.to_string()),
            )
            .with_details(format.as_str().to_string()),
        );

        Ok((bytes, updated))
    }

    /// Remove a credential record. Active certificates are revoked at the
    /// CA first so no usable certificate outlives its record.
    #[instrument(skip(self))]
    pub async fn delete(&self, credential_id: Uuid, actor: &str) -> Result<(), ServiceError> {
        let credential = self.load(credential_id).await?;

        if credential.status == CredentialStatus::Active {
            if let Some(serial) = credential.serial.as_deref() {
                self.ca.revoke(serial, "deleted").await?;
            }
        }

        if !self.credentials.delete_credential(credential_id).await? {
            return Err(ServiceError::NotFound(format!("credential {}", credential_id)));
        }

        self.audit.log_async(AuditEvent::new(
            AuditAction::CredentialDeleted,
            actor,
            Some(credential_id.to_string()),
        ));
        tracing::info!(credential_id = %credential_id, "Credential deleted");
        Ok(())
    }

    /// Mark every active credential past its expiry as expired. Safe to run
    /// concurrently and repeatedly.
    pub async fn sweep_expired(&self) -> Result<Vec<Uuid>, ServiceError> {
        let expired = self.credentials.expire_due(Utc::now()).await?;

        if !expired.is_empty() {
            metrics::record_credentials_expired(expired.len());
            self.audit.log_async(
                AuditEvent::new(AuditAction::CredentialsExpired, "sweeper", None)
                    .with_details(format!("{} credentials", expired.len())),
            );
            tracing::info!(count = expired.len(), "Expired credentials swept");
        }

        Ok(expired)
    }
}
