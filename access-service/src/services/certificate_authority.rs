//! Client for the certificate authority that signs EAP-TLS client
//! certificates. Key generation and signing stay with the CA; this service
//! only requests, revokes and exports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::observability::PropagateTraceExt;
use service_core::outbound::{failed_before_send, is_transient, retry_call, RetryConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::instrument;
use utoipa::ToSchema;

use super::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CertificateFormat {
    #[default]
    Pkcs12,
    Pem,
}

impl CertificateFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateFormat::Pkcs12 => "pkcs12",
            CertificateFormat::Pem => "pem",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            CertificateFormat::Pkcs12 => "application/x-pkcs12",
            CertificateFormat::Pem => "application/x-pem-file",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            CertificateFormat::Pkcs12 => "p12",
            CertificateFormat::Pem => "pem",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub serial: String,
    pub ca_ref: String,
    pub not_after: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Sign a new client certificate; `password` protects the exported key.
    async fn issue(
        &self,
        subject_dn: &str,
        password: &str,
        validity_days: u32,
    ) -> Result<IssuedCertificate, ServiceError>;

    async fn revoke(&self, serial: &str, reason: &str) -> Result<(), ServiceError>;

    async fn export(&self, serial: &str, format: CertificateFormat)
        -> Result<Vec<u8>, ServiceError>;
}

/// Escape one RFC 4514 attribute value.
pub fn escape_dn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let needs_escape = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (i == 0 && (c == ' ' || c == '#'))
            || (i == last && c == ' ');
        if c == '\0' {
            escaped.push_str("\\00");
            continue;
        }
        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Subject DN for a credential owner: `CN=<owner>[,OU=<area>][,O=<org>]`.
pub fn subject_dn(common_name: &str, area: Option<&str>, organization: Option<&str>) -> String {
    let mut dn = format!("CN={}", escape_dn_value(common_name));
    if let Some(area) = area.filter(|a| !a.is_empty()) {
        dn.push_str(&format!(",OU={}", escape_dn_value(area)));
    }
    if let Some(org) = organization.filter(|o| !o.is_empty()) {
        dn.push_str(&format!(",O={}", escape_dn_value(org)));
    }
    dn
}

#[derive(Debug, Serialize)]
struct IssueRequest<'a> {
    subject_dn: &'a str,
    password: &'a str,
    validity_days: u32,
}

#[derive(Debug, Serialize)]
struct RevokeRequest<'a> {
    reason: &'a str,
}

/// REST client for the CA.
#[derive(Clone)]
pub struct HttpCertificateAuthority {
    client: reqwest::Client,
    base_url: reqwest::Url,
    api_token: String,
    timeout: Duration,
}

impl HttpCertificateAuthority {
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> Result<Self, anyhow::Error> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid CA base URL {}: {}", base_url, e))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build CA HTTP client: {}", e))?;

        tracing::info!(base_url = %base_url, "Certificate authority client configured");

        Ok(Self {
            client,
            base_url,
            api_token: api_token.to_string(),
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url, ServiceError> {
        self.base_url
            .join(path)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Invalid CA path {}: {}", path, e)))
    }
}

fn dependency(operation: &str, err: reqwest::Error) -> ServiceError {
    tracing::error!(operation = operation, error = %err, "Certificate authority call failed");
    ServiceError::Dependency(format!("certificate authority {} failed: {}", operation, err))
}

#[async_trait]
impl CertificateAuthority for HttpCertificateAuthority {
    #[instrument(skip(self, password), fields(subject_dn = %subject_dn))]
    async fn issue(
        &self,
        subject_dn: &str,
        password: &str,
        validity_days: u32,
    ) -> Result<IssuedCertificate, ServiceError> {
        let url = self.endpoint("certificates")?;
        let body = IssueRequest {
            subject_dn,
            password,
            validity_days,
        };

        // Issuance is not idempotent: retry only if the CA never saw it.
        let response = retry_call(
            &RetryConfig::default(),
            "ca_issue",
            failed_before_send,
            || async {
                self.client
                    .post(url.clone())
                    .bearer_auth(&self.api_token)
                    .timeout(self.timeout)
                    .json(&body)
                    .with_trace_context()
                    .send()
                    .await?
                    .error_for_status()
            },
        )
        .await
        .map_err(|e| dependency("issue", e))?;

        let issued: IssuedCertificate = response
            .json()
            .await
            .map_err(|e| dependency("issue", e))?;

        tracing::info!(serial = %issued.serial, "Certificate issued by CA");
        Ok(issued)
    }

    #[instrument(skip(self))]
    async fn revoke(&self, serial: &str, reason: &str) -> Result<(), ServiceError> {
        let url = self.endpoint(&format!("certificates/{}/revoke", serial))?;
        let body = RevokeRequest { reason };

        retry_call(&RetryConfig::default(), "ca_revoke", is_transient, || async {
            self.client
                .post(url.clone())
                .bearer_auth(&self.api_token)
                .timeout(self.timeout)
                .json(&body)
                .with_trace_context()
                .send()
                .await?
                .error_for_status()
        })
        .await
        .map_err(|e| dependency("revoke", e))?;

        tracing::info!(serial = %serial, "Certificate revoked at CA");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn export(
        &self,
        serial: &str,
        format: CertificateFormat,
    ) -> Result<Vec<u8>, ServiceError> {
        let url = self.endpoint(&format!("certificates/{}/export", serial))?;

        let response = retry_call(&RetryConfig::default(), "ca_export", is_transient, || async {
            self.client
                .get(url.clone())
                .bearer_auth(&self.api_token)
                .timeout(self.timeout)
                .query(&[("format", format.as_str())])
                .with_trace_context()
                .send()
                .await?
                .error_for_status()
        })
        .await
        .map_err(|e| dependency("export", e))?;

        let bytes = response.bytes().await.map_err(|e| dependency("export", e))?;
        Ok(bytes.to_vec())
    }
}

/// In-process CA for development and tests.
pub struct MockCertificateAuthority {
    next_serial: AtomicU64,
    unavailable: AtomicBool,
    pub issued: Mutex<Vec<(String, String)>>,
    pub revoked: Mutex<Vec<String>>,
}

impl Default for MockCertificateAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCertificateAuthority {
    pub fn new() -> Self {
        Self {
            next_serial: AtomicU64::new(0x1000),
            unavailable: AtomicBool::new(false),
            issued: Mutex::new(Vec::new()),
            revoked: Mutex::new(Vec::new()),
        }
    }

    /// Make every subsequent call fail as if the CA were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn revoked_serials(&self) -> Vec<String> {
        self.revoked.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn issued_subjects(&self) -> Vec<String> {
        self.issued
            .lock()
            .map(|i| i.iter().map(|(_, dn)| dn.clone()).collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Dependency(
                "certificate authority unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateAuthority for MockCertificateAuthority {
    async fn issue(
        &self,
        subject_dn: &str,
        _password: &str,
        validity_days: u32,
    ) -> Result<IssuedCertificate, ServiceError> {
        self.check_available()?;
        let serial = format!("{:x}", self.next_serial.fetch_add(1, Ordering::SeqCst));
        self.issued
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock CA mutex poisoned: {}", e))?
            .push((serial.clone(), subject_dn.to_string()));
        Ok(IssuedCertificate {
            serial,
            ca_ref: "mock-ca".to_string(),
            not_after: Some(Utc::now() + chrono::Duration::days(i64::from(validity_days))),
        })
    }

    async fn revoke(&self, serial: &str, _reason: &str) -> Result<(), ServiceError> {
        self.check_available()?;
        self.revoked
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock CA mutex poisoned: {}", e))?
            .push(serial.to_string());
        Ok(())
    }

    async fn export(
        &self,
        serial: &str,
        format: CertificateFormat,
    ) -> Result<Vec<u8>, ServiceError> {
        self.check_available()?;
        Ok(format!("{}:{}", format.as_str(), serial).into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn escapes_rfc4514_specials() {
        assert_eq!(escape_dn_value("Doe, John"), "Doe\\, John");
        assert_eq!(escape_dn_value("#tag"), "\\#tag");
        assert_eq!(escape_dn_value(" padded "), "\\ padded\\ ");
        assert_eq!(escape_dn_value("a+b=c"), "a\\+b\\=c");
    }

    #[test]
    fn builds_subject_with_area_and_organization() {
        assert_eq!(
            subject_dn("alice@example.com", Some("Unit 4"), Some("Acme, Inc")),
            "CN=alice@example.com,OU=Unit 4,O=Acme\\, Inc"
        );
        assert_eq!(subject_dn("x", None, Some("")), "CN=x");
    }

    #[tokio::test]
    async fn issue_posts_subject_and_parses_serial() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/certificates"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "serial": "0a1b",
                "ca_ref": "issuing-ca-1",
                "not_after": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ca = HttpCertificateAuthority::new(
            &format!("{}/", server.uri()),
            "token",
            Duration::from_secs(2),
        )
        .unwrap();
        let issued = ca.issue("CN=alice", "password1", 365).await.unwrap();
        assert_eq!(issued.serial, "0a1b");
        assert_eq!(issued.ca_ref, "issuing-ca-1");
    }

    #[tokio::test]
    async fn issue_is_not_retried_after_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/certificates"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let ca = HttpCertificateAuthority::new(
            &format!("{}/", server.uri()),
            "token",
            Duration::from_secs(2),
        )
        .unwrap();
        let err = ca.issue("CN=alice", "password1", 365).await.unwrap_err();
        assert!(matches!(err, ServiceError::Dependency(_)));
    }

    #[tokio::test]
    async fn export_retries_once_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/certificates/0a1b/export"))
            .and(query_param("format", "pem"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/certificates/0a1b/export"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"-----BEGIN".to_vec()))
            .mount(&server)
            .await;

        let ca = HttpCertificateAuthority::new(
            &format!("{}/", server.uri()),
            "token",
            Duration::from_secs(2),
        )
        .unwrap();
        let bytes = ca.export("0a1b", CertificateFormat::Pem).await.unwrap();
        assert_eq!(bytes, b"-----BEGIN".to_vec());
    }
}
