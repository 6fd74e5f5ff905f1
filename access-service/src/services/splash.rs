//! Wireless controller captive-portal ("splash page") protocol.
//!
//! Controllers hand the portal either a `login_url`, which expects a form
//! POST carrying the client's sign-on credentials, or a `grant_url`, which is
//! fetched with the continue URL and session duration to open the client.

use async_trait::async_trait;
use service_core::observability::PropagateTraceExt;
use service_core::outbound::{failed_before_send, is_transient, retry_call, RetryConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::instrument;

use super::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOn {
    pub username: String,
    pub password: String,
    pub success_url: Option<String>,
}

#[async_trait]
pub trait SplashController: Send + Sync {
    async fn login(&self, login_url: &reqwest::Url, sign_on: &SignOn) -> Result<(), ServiceError>;

    async fn grant(
        &self,
        grant_url: &reqwest::Url,
        continue_url: Option<&str>,
        duration_secs: u64,
    ) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct HttpSplashController {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpSplashController {
    pub fn new(timeout: Duration) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build controller HTTP client: {}", e))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl SplashController for HttpSplashController {
    #[instrument(skip(self, sign_on), fields(host = ?login_url.host_str()))]
    async fn login(&self, login_url: &reqwest::Url, sign_on: &SignOn) -> Result<(), ServiceError> {
        let mut form = vec![
            ("username", sign_on.username.as_str()),
            ("password", sign_on.password.as_str()),
        ];
        if let Some(success_url) = sign_on.success_url.as_deref() {
            form.push(("success_url", success_url));
        }

        // The controller may have acted on a POST it answered late, so only
        // resend when the connection was never made.
        let result = retry_call(
            &RetryConfig::default(),
            "controller_login",
            failed_before_send,
            || async {
                self.client
                    .post(login_url.clone())
                    .timeout(self.timeout)
                    .form(&form)
                    .with_trace_context()
                    .send()
                    .await?
                    .error_for_status()
            },
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.status().is_some() => {
                tracing::warn!(error = %e, "Controller rejected sign-on");
                Err(ServiceError::Dependency(format!(
                    "controller rejected sign-on: {}",
                    e
                )))
            }
            Err(e) if failed_before_send(&e) => Err(ServiceError::Dependency(format!(
                "controller unreachable: {}",
                e
            ))),
            Err(e) => {
                tracing::warn!(error = %e, "Controller sign-on outcome unknown");
                Err(ServiceError::RetryLater(
                    "controller sign-on outcome unknown".to_string(),
                ))
            }
        }
    }

    #[instrument(skip(self), fields(host = ?grant_url.host_str()))]
    async fn grant(
        &self,
        grant_url: &reqwest::Url,
        continue_url: Option<&str>,
        duration_secs: u64,
    ) -> Result<(), ServiceError> {
        let duration = duration_secs.to_string();
        let mut query = vec![("duration", duration.as_str())];
        if let Some(continue_url) = continue_url {
            query.push(("continue_url", continue_url));
        }

        retry_call(
            &RetryConfig::default(),
            "controller_grant",
            is_transient,
            || async {
                self.client
                    .get(grant_url.clone())
                    .timeout(self.timeout)
                    .query(&query)
                    .with_trace_context()
                    .send()
                    .await?
                    .error_for_status()
            },
        )
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Controller grant failed");
            ServiceError::Dependency(format!("controller grant failed: {}", e))
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplashCall {
    Login { url: String, sign_on: SignOn },
    Grant { url: String, continue_url: Option<String>, duration_secs: u64 },
}

/// Records calls instead of contacting a controller.
#[derive(Default)]
pub struct MockSplashController {
    pub calls: Mutex<Vec<SplashCall>>,
    fail: AtomicBool,
}

impl MockSplashController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn recorded(&self) -> Vec<SplashCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, call: SplashCall) -> Result<(), ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Dependency("controller unreachable".to_string()));
        }
        self.calls
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock controller mutex poisoned: {}", e))?
            .push(call);
        Ok(())
    }
}

#[async_trait]
impl SplashController for MockSplashController {
    async fn login(&self, login_url: &reqwest::Url, sign_on: &SignOn) -> Result<(), ServiceError> {
        self.push(SplashCall::Login {
            url: login_url.to_string(),
            sign_on: sign_on.clone(),
        })
    }

    async fn grant(
        &self,
        grant_url: &reqwest::Url,
        continue_url: Option<&str>,
        duration_secs: u64,
    ) -> Result<(), ServiceError> {
        self.push(SplashCall::Grant {
            url: grant_url.to_string(),
            continue_url: continue_url.map(str::to_string),
            duration_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sign_on() -> SignOn {
        SignOn {
            username: "corr-1".to_string(),
            password: "token".to_string(),
            success_url: Some("https://example.com/welcome".to_string()),
        }
    }

    #[tokio::test]
    async fn login_posts_form_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("username=corr-1"))
            .and(body_string_contains("success_url=https%3A%2F%2Fexample.com%2Fwelcome"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let controller = HttpSplashController::new(Duration::from_secs(2)).unwrap();
        let url = reqwest::Url::parse(&format!("{}/login", server.uri())).unwrap();
        controller.login(&url, &sign_on()).await.unwrap();
    }

    #[tokio::test]
    async fn login_timeout_surfaces_retry_later() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(1)
            .mount(&server)
            .await;

        let controller = HttpSplashController::new(Duration::from_millis(100)).unwrap();
        let url = reqwest::Url::parse(&format!("{}/login", server.uri())).unwrap();
        let err = controller.login(&url, &sign_on()).await.unwrap_err();
        assert!(matches!(err, ServiceError::RetryLater(_)));
    }

    #[tokio::test]
    async fn grant_passes_continue_url_and_duration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/grant"))
            .and(query_param("duration", "3600"))
            .and(query_param("continue_url", "https://example.com/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let controller = HttpSplashController::new(Duration::from_secs(2)).unwrap();
        let url = reqwest::Url::parse(&format!("{}/grant", server.uri())).unwrap();
        controller
            .grant(&url, Some("https://example.com/"), 3600)
            .await
            .unwrap();
    }
}
