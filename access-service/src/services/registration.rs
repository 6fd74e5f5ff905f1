//! Registration Evaluator: gates self-service onboarding by the configured
//! registration mode and hands admitted requests to the issuer.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::audit::AuditService;
use super::issuer::{CredentialIssuer, IssueOptions, IssuedCredential, MIN_CERTIFICATE_PASSWORD_LEN};
use super::metrics;
use super::passphrase::validate_passphrase;
use super::store::{InviteLedger, RegistrationQueue};
use super::ServiceError;
use crate::models::{
    AuditAction, AuditEvent, AuthMethod, MacAddress, OwnerRef, PendingRegistration, PendingStatus,
    RegistrationMode,
};

#[derive(Debug, Clone, Default)]
pub struct RegistrationRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub mac: Option<MacAddress>,
    pub auth_method: Option<AuthMethod>,
    pub invite_code: Option<String>,
    pub passphrase: Option<String>,
    pub certificate_password: Option<String>,
    pub area: Option<String>,
    pub network_id: Option<String>,
}

impl RegistrationRequest {
    fn method(&self) -> AuthMethod {
        self.auth_method.unwrap_or(AuthMethod::Passphrase)
    }

    /// Email wins over device MAC, which wins over area.
    pub fn owner(&self) -> Option<OwnerRef> {
        if let Some(email) = self.email.as_deref().filter(|e| !e.trim().is_empty()) {
            return Some(OwnerRef::user(email));
        }
        if let Some(mac) = self.mac {
            return Some(OwnerRef::Device(mac));
        }
        self.area
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .map(|a| OwnerRef::Area(a.trim().to_string()))
    }

    fn has_account(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    fn validate(&self) -> Result<(), String> {
        if self.owner().is_none() {
            return Err("an email, device MAC or area is required".to_string());
        }
        match self.method() {
            AuthMethod::Passphrase => {
                if let Some(passphrase) = self.passphrase.as_deref() {
                    validate_passphrase(passphrase)?;
                }
            }
            AuthMethod::Certificate => {
                let long_enough = self
                    .certificate_password
                    .as_deref()
                    .is_some_and(|p| p.chars().count() >= MIN_CERTIFICATE_PASSWORD_LEN);
                if !long_enough {
                    return Err(format!(
                        "certificate password of at least {} characters is required",
                        MIN_CERTIFICATE_PASSWORD_LEN
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidCode,
    RegistrationClosed,
    AccountRequired,
    Validation,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidCode => "invalid_code",
            RejectReason::RegistrationClosed => "registration_closed",
            RejectReason::AccountRequired => "account_required",
            RejectReason::Validation => "validation",
        }
    }
}

/// The gate decision, before any side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Pending,
    Rejected(RejectReason),
}

#[derive(Debug, Clone)]
pub enum RegistrationOutcome {
    Admitted(IssuedCredential),
    Pending(PendingRegistration),
    Rejected {
        reason: RejectReason,
        message: String,
    },
}

#[derive(Clone)]
pub struct RegistrationEvaluator {
    mode: RegistrationMode,
    invites: Arc<dyn InviteLedger>,
    queue: Arc<dyn RegistrationQueue>,
    issuer: CredentialIssuer,
    audit: AuditService,
}

impl RegistrationEvaluator {
    pub fn new(
        modes: &[RegistrationMode],
        invites: Arc<dyn InviteLedger>,
        queue: Arc<dyn RegistrationQueue>,
        issuer: CredentialIssuer,
        audit: AuditService,
    ) -> Self {
        let mode = RegistrationMode::effective(modes);
        tracing::info!(mode = ?mode, "Registration mode in force");
        Self {
            mode,
            invites,
            queue,
            issuer,
            audit,
        }
    }

    pub fn mode(&self) -> RegistrationMode {
        self.mode
    }

    /// Decide admission without side effects.
    pub async fn evaluate(&self, request: &RegistrationRequest) -> Result<Admission, ServiceError> {
        match self.mode {
            RegistrationMode::InviteOnly | RegistrationMode::InvitePlusAccount => {
                if self.mode == RegistrationMode::InvitePlusAccount && !request.has_account() {
                    return Ok(Admission::Rejected(RejectReason::AccountRequired));
                }
                let Some(code) = request.invite_code.as_deref().filter(|c| !c.trim().is_empty())
                else {
                    return Ok(Admission::Rejected(RejectReason::InvalidCode));
                };
                let redeemable = self
                    .invites
                    .find_invite(code)
                    .await?
                    .is_some_and(|invite| invite.is_redeemable_at(Utc::now()));
                if redeemable {
                    Ok(Admission::Admit)
                } else {
                    Ok(Admission::Rejected(RejectReason::InvalidCode))
                }
            }
            RegistrationMode::OpenWithApproval => Ok(Admission::Pending),
            RegistrationMode::Open => Ok(Admission::Admit),
            RegistrationMode::AccountOnly => {
                Ok(Admission::Rejected(RejectReason::RegistrationClosed))
            }
        }
    }

    fn rejected(reason: RejectReason, message: impl Into<String>) -> RegistrationOutcome {
        metrics::record_registration("rejected");
        let message = message.into();
        tracing::info!(reason = reason.as_str(), message = %message, "Registration rejected");
        RegistrationOutcome::Rejected { reason, message }
    }

    #[instrument(skip(self, request), fields(method = request.method().as_str()))]
    pub async fn register(
        &self,
        request: RegistrationRequest,
        actor: &str,
    ) -> Result<RegistrationOutcome, ServiceError> {
        if let Err(message) = request.validate() {
            return Ok(Self::rejected(RejectReason::Validation, message));
        }
        let Some(owner) = request.owner() else {
            return Ok(Self::rejected(RejectReason::Validation, "no owner"));
        };

        match self.evaluate(&request).await? {
            Admission::Rejected(reason) => {
                let message = match reason {
                    RejectReason::InvalidCode => "invite code is invalid, expired or exhausted",
                    RejectReason::RegistrationClosed => "self-service registration is closed",
                    RejectReason::AccountRequired => "an account email is required",
                    RejectReason::Validation => "request is invalid",
                };
                Ok(Self::rejected(reason, message))
            }
            Admission::Pending => {
                let pending = self.enqueue(&request).await?;
                metrics::record_registration("pending");
                self.audit.log_async(AuditEvent::new(
                    AuditAction::RegistrationQueued,
                    actor,
                    Some(pending.registration_id.to_string()),
                ));
                tracing::info!(registration_id = %pending.registration_id, "Registration queued for approval");
                Ok(RegistrationOutcome::Pending(pending))
            }
            Admission::Admit => {
                let options = IssueOptions {
                    network_id: request.network_id.clone(),
                    passphrase: request.passphrase.clone(),
                    certificate_password: request.certificate_password.clone(),
                    area: request.area.clone(),
                    bound_mac: request.mac,
                    redeem_code: if self.mode.requires_invite() {
                        request.invite_code.clone()
                    } else {
                        None
                    },
                    auto_renew: false,
                };
                match self
                    .issuer
                    .issue(owner, request.method(), options, actor)
                    .await
                {
                    Ok(issued) => {
                        metrics::record_registration("admitted");
                        Ok(RegistrationOutcome::Admitted(issued))
                    }
                    // Another request took the last use between check and insert.
                    Err(ServiceError::InviteUnavailable) => Ok(Self::rejected(
                        RejectReason::InvalidCode,
                        "invite code is invalid, expired or exhausted",
                    )),
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn enqueue(
        &self,
        request: &RegistrationRequest,
    ) -> Result<PendingRegistration, ServiceError> {
        let method = request.method();
        let secret = match method {
            AuthMethod::Passphrase => request.passphrase.as_deref(),
            AuthMethod::Certificate => request.certificate_password.as_deref(),
        };
        let secret_ciphertext = secret
            .map(|s| self.issuer.cipher().encrypt(s))
            .transpose()?;

        let pending = PendingRegistration {
            registration_id: Uuid::new_v4(),
            name: request.name.clone(),
            email: request.email.as_deref().map(|e| e.trim().to_lowercase()),
            mac: request.mac,
            auth_method: method,
            area: request.area.clone(),
            network_id: request
                .network_id
                .clone()
                .unwrap_or_else(|| self.issuer.settings().network_id.clone()),
            secret_ciphertext,
            status: PendingStatus::Pending,
            notes: None,
            decided_by: None,
            decided_utc: None,
            credential_id: None,
            created_utc: Utc::now(),
        };
        let queued = self.queue.enqueue_pending(&pending).await?;
        if queued.registration_id != pending.registration_id {
            tracing::info!(registration_id = %queued.registration_id, "Request already awaiting approval");
        }
        Ok(queued)
    }

    pub async fn list_pending(
        &self,
        status: Option<PendingStatus>,
    ) -> Result<Vec<PendingRegistration>, ServiceError> {
        Ok(self.queue.list_pending(status).await?)
    }

    async fn already_decided(&self, registration_id: Uuid) -> ServiceError {
        match self.queue.find_pending(registration_id).await {
            Ok(Some(p)) => {
                ServiceError::InvalidState(format!("registration is {}", p.status.as_str()))
            }
            Ok(None) => ServiceError::NotFound(format!("registration {}", registration_id)),
            Err(e) => e.into(),
        }
    }

    /// Operator approval. Claiming the row first means two concurrent
    /// approvals cannot both issue.
    #[instrument(skip(self))]
    pub async fn approve(
        &self,
        registration_id: Uuid,
        actor: &str,
    ) -> Result<IssuedCredential, ServiceError> {
        let Some(claimed) = self
            .queue
            .decide_pending(
                registration_id,
                PendingStatus::Pending,
                PendingStatus::Approved,
                Some(actor),
                None,
            )
            .await?
        else {
            return Err(self.already_decided(registration_id).await);
        };

        match self.issue_for(&claimed, actor).await {
            Ok(issued) => {
                self.queue
                    .attach_credential(registration_id, issued.credential.credential_id)
                    .await?;
                metrics::record_registration("approved");
                self.audit.log_async(
                    AuditEvent::new(
                        AuditAction::RegistrationApproved,
                        actor,
                        Some(registration_id.to_string()),
                    )
                    .with_details(format!("credential {}", issued.credential.credential_id)),
                );
                Ok(issued)
            }
            Err(e) => {
                // Put it back so the operator can retry.
                if let Err(reopen) = self
                    .queue
                    .decide_pending(
                        registration_id,
                        PendingStatus::Approved,
                        PendingStatus::Pending,
                        None,
                        None,
                    )
                    .await
                {
                    tracing::error!(error = %reopen, "Failed to reopen registration after failed issuance");
                }
                Err(e)
            }
        }
    }

    async fn issue_for(
        &self,
        pending: &PendingRegistration,
        actor: &str,
    ) -> Result<IssuedCredential, ServiceError> {
        let request = RegistrationRequest {
            name: pending.name.clone(),
            email: pending.email.clone(),
            mac: pending.mac,
            auth_method: Some(pending.auth_method),
            area: pending.area.clone(),
            ..Default::default()
        };
        let owner = request
            .owner()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("pending registration has no owner")))?;

        let secret = pending
            .secret_ciphertext
            .as_deref()
            .map(|c| self.issuer.cipher().decrypt(c))
            .transpose()?;
        let (passphrase, certificate_password) = match pending.auth_method {
            AuthMethod::Passphrase => (secret, None),
            AuthMethod::Certificate => (None, secret),
        };

        let options = IssueOptions {
            network_id: Some(pending.network_id.clone()),
            passphrase,
            certificate_password,
            area: pending.area.clone(),
            bound_mac: pending.mac,
            redeem_code: None,
            auto_renew: false,
        };
        self.issuer
            .issue(owner, pending.auth_method, options, actor)
            .await
    }

    #[instrument(skip(self, notes))]
    pub async fn reject(
        &self,
        registration_id: Uuid,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<PendingRegistration, ServiceError> {
        let Some(rejected) = self
            .queue
            .decide_pending(
                registration_id,
                PendingStatus::Pending,
                PendingStatus::Rejected,
                Some(actor),
                notes,
            )
            .await?
        else {
            return Err(self.already_decided(registration_id).await);
        };

        metrics::record_registration("rejected");
        self.audit.log_async(AuditEvent::new(
            AuditAction::RegistrationRejected,
            actor,
            Some(registration_id.to_string()),
        ));
        Ok(rejected)
    }
}
