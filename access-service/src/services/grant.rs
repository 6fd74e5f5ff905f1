//! Grant Handshake Mediator: the captive-portal flow that registers a
//! client (or recognises a returning one) and tells the wireless controller
//! to open its connection.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::sync::Arc;
use tracing::instrument;

use super::audit::AuditService;
use super::issuer::CredentialIssuer;
use super::metrics;
use super::registration::{RegistrationEvaluator, RegistrationOutcome, RegistrationRequest, RejectReason};
use super::session::SessionService;
use super::splash::{SignOn, SplashController};
use super::store::CredentialStore;
use super::ServiceError;
use crate::models::{AuditAction, AuditEvent, Credential, MacAddress, PendingRegistration};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct GrantSettings {
    pub portal_token_secret: Secret<String>,
    pub grant_duration_secs: u64,
    /// Where the client lands when the controller sent no continue URL.
    pub connected_url: String,
    /// Controller hosts the portal will call back to. Empty allows any.
    pub allowed_hosts: Vec<String>,
}

/// Portal parameters as received from the controller redirect, plus the
/// registration form. URL parameters may still be percent-encoded.
#[derive(Debug, Clone, Default)]
pub struct PortalRequest {
    pub mac: Option<String>,
    pub login_url: Option<String>,
    pub grant_url: Option<String>,
    pub continue_url: Option<String>,
    pub registration: RegistrationRequest,
}

#[derive(Debug, Clone)]
pub struct PortalGrant {
    pub credential: Credential,
    /// Plaintext passphrase for a credential issued by this call.
    pub passphrase: Option<String>,
    pub redirect_url: String,
    pub session_token: String,
    pub session_expires_at: DateTime<Utc>,
    /// The client already held an active credential; nothing was issued.
    pub replayed: bool,
}

#[derive(Debug, Clone)]
pub enum GrantOutcome {
    Granted(PortalGrant),
    Pending(PendingRegistration),
    Rejected { reason: RejectReason, message: String },
}

/// Where the controller should be told to open the client.
enum Handshake {
    Login(reqwest::Url),
    Grant(reqwest::Url),
    None,
}

/// Decode a portal parameter. Controllers percent-encode nested URLs, and
/// some proxies encode them twice, so decode until stable.
pub fn decode_param(raw: &str) -> Result<String, ServiceError> {
    let mut value = raw.trim().to_string();
    for _ in 0..2 {
        if !value.contains('%') {
            break;
        }
        let decoded = urlencoding::decode(&value)
            .map_err(|e| ServiceError::Validation(format!("malformed portal parameter: {}", e)))?
            .into_owned();
        if decoded == value {
            break;
        }
        value = decoded;
    }
    Ok(value)
}

/// HMAC-SHA256 of the sign-on username, hex encoded. The controller relays
/// it to RADIUS, which recomputes it to authenticate the portal session.
pub fn portal_token(secret: &Secret<String>, username: &str) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("invalid portal token key: {}", e)))?;
    mac.update(username.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Clone)]
pub struct GrantMediator {
    credentials: Arc<dyn CredentialStore>,
    evaluator: RegistrationEvaluator,
    issuer: CredentialIssuer,
    controller: Arc<dyn SplashController>,
    sessions: SessionService,
    audit: AuditService,
    settings: GrantSettings,
}

impl GrantMediator {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        evaluator: RegistrationEvaluator,
        issuer: CredentialIssuer,
        controller: Arc<dyn SplashController>,
        sessions: SessionService,
        audit: AuditService,
        settings: GrantSettings,
    ) -> Self {
        Self {
            credentials,
            evaluator,
            issuer,
            controller,
            sessions,
            audit,
            settings,
        }
    }

    fn controller_url(&self, raw: &str) -> Result<reqwest::Url, ServiceError> {
        let decoded = decode_param(raw)?;
        let url = reqwest::Url::parse(&decoded)
            .map_err(|e| ServiceError::Validation(format!("invalid controller URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ServiceError::Validation(
                "controller URL must be http or https".to_string(),
            ));
        }
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let allowed = self.settings.allowed_hosts.is_empty()
            || self.settings.allowed_hosts.iter().any(|allowed| {
                let allowed = allowed.to_ascii_lowercase();
                host == allowed || host.ends_with(&format!(".{}", allowed))
            });
        if !allowed {
            tracing::warn!(host = %host, "Portal request named an unknown controller");
            return Err(ServiceError::Validation(format!(
                "controller host {} is not allowed",
                host
            )));
        }
        Ok(url)
    }

    fn handshake(&self, request: &PortalRequest) -> Result<Handshake, ServiceError> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        };
        if let Some(login_url) = present(&request.login_url) {
            return Ok(Handshake::Login(self.controller_url(&login_url)?));
        }
        if let Some(grant_url) = present(&request.grant_url) {
            return Ok(Handshake::Grant(self.controller_url(&grant_url)?));
        }
        Ok(Handshake::None)
    }

    /// An active credential already bound to this device on the network.
    /// Only the MAC identifies a returning client: the form's email is
    /// unverified and must go through registration.
    async fn existing_credential(
        &self,
        mac: Option<&MacAddress>,
        network_id: &str,
    ) -> Result<Option<Credential>, ServiceError> {
        let Some(mac) = mac else {
            return Ok(None);
        };
        let found = self.credentials.find_active_by_mac(mac, network_id).await?;
        Ok(found.filter(|c| c.is_usable_at(Utc::now())))
    }

    #[instrument(skip(self, request), fields(mac = ?request.mac))]
    pub async fn grant(
        &self,
        request: PortalRequest,
        actor: &str,
    ) -> Result<GrantOutcome, ServiceError> {
        let mac = match request.mac.as_deref().filter(|m| !m.trim().is_empty()) {
            Some(raw) => Some(
                decode_param(raw)?
                    .parse::<MacAddress>()
                    .map_err(|e| ServiceError::Validation(e.to_string()))?,
            ),
            None => None,
        };
        let continue_url = request
            .continue_url
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(decode_param)
            .transpose()?;
        let handshake = self.handshake(&request)?;

        let mut registration = request.registration.clone();
        if registration.mac.is_none() {
            registration.mac = mac;
        }
        let network_id = registration
            .network_id
            .clone()
            .unwrap_or_else(|| self.issuer.settings().network_id.clone());

        let (credential, passphrase, replayed) = match self
            .existing_credential(mac.as_ref(), &network_id)
            .await?
        {
            Some(existing) => {
                tracing::info!(credential_id = %existing.credential_id, "Returning client; skipping registration");
                (existing, None, true)
            }
            None => match self.evaluator.register(registration, actor).await? {
                RegistrationOutcome::Admitted(issued) => {
                    (issued.credential, issued.passphrase, false)
                }
                RegistrationOutcome::Pending(pending) => {
                    metrics::record_portal_grant("pending");
                    return Ok(GrantOutcome::Pending(pending));
                }
                RegistrationOutcome::Rejected { reason, message } => {
                    metrics::record_portal_grant("rejected");
                    return Ok(GrantOutcome::Rejected { reason, message });
                }
            },
        };

        if mac.is_none() {
            tracing::info!(credential_id = %credential.credential_id, "No client MAC supplied; device binding skipped");
        }

        self.open_connection(&handshake, &credential, continue_url.as_deref())
            .await
            .inspect_err(|e| {
                metrics::record_portal_grant("failed");
                tracing::warn!(error = %e, credential_id = %credential.credential_id, "Controller handshake failed");
            })?;

        let redirect_url = continue_url.unwrap_or_else(|| self.settings.connected_url.clone());
        let (session_token, session_expires_at) = self
            .sessions
            .issue(credential.credential_id, mac.map(|m| m.to_string()))?;

        metrics::record_portal_grant(if replayed { "replayed" } else { "granted" });
        self.audit.log_async(
            AuditEvent::new(
                AuditAction::PortalGranted,
                actor,
                Some(credential.credential_id.to_string()),
            )
            .with_details(match mac {
                Some(mac) => format!("mac {}", mac),
                None => "no mac".to_string(),
            }),
        );

        Ok(GrantOutcome::Granted(PortalGrant {
            credential,
            passphrase,
            redirect_url,
            session_token,
            session_expires_at,
            replayed,
        }))
    }

    async fn open_connection(
        &self,
        handshake: &Handshake,
        credential: &Credential,
        continue_url: Option<&str>,
    ) -> Result<(), ServiceError> {
        match handshake {
            Handshake::Login(login_url) => {
                let username = credential
                    .correlation_id
                    .clone()
                    .unwrap_or_else(|| credential.credential_id.to_string());
                let password = portal_token(&self.settings.portal_token_secret, &username)?;
                let sign_on = SignOn {
                    username,
                    password,
                    success_url: continue_url.map(str::to_string),
                };
                self.controller.login(login_url, &sign_on).await
            }
            Handshake::Grant(grant_url) => {
                self.controller
                    .grant(grant_url, continue_url, self.settings.grant_duration_secs)
                    .await
            }
            Handshake::None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_nested_encoding() {
        assert_eq!(
            decode_param("https%253A%252F%252Fexample.com%252Fx").unwrap(),
            "https://example.com/x"
        );
        assert_eq!(
            decode_param("https%3A%2F%2Fexample.com").unwrap(),
            "https://example.com"
        );
        assert_eq!(decode_param("plain").unwrap(), "plain");
    }

    #[test]
    fn portal_token_is_keyed() {
        let a = portal_token(&Secret::new("k1".to_string()), "user").unwrap();
        let b = portal_token(&Secret::new("k2".to_string()), "user").unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, portal_token(&Secret::new("k1".to_string()), "user").unwrap());
    }
}
