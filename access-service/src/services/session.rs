use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims of the session token handed to a client after a portal grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Credential id.
    pub sub: String,
    pub mac: Option<String>,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub valid: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Issues and checks HS256 session tokens. Validation is stateless.
#[derive(Clone)]
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_minutes: i64,
}

impl SessionService {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_minutes,
        }
    }

    pub fn issue(
        &self,
        credential_id: Uuid,
        mac: Option<String>,
    ) -> Result<(String, DateTime<Utc>), anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.ttl_minutes);

        let claims = SessionClaims {
            sub: credential_id.to_string(),
            mac,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode session token: {}", e))?;

        Ok((token, exp))
    }

    pub fn validate(&self, token: &str) -> SessionStatus {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        match decode::<SessionClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => SessionStatus {
                valid: true,
                expires_at: Utc.timestamp_opt(data.claims.exp, 0).single(),
            },
            Err(e) => {
                tracing::debug!(error = %e, "Session token rejected");
                SessionStatus {
                    valid: false,
                    expires_at: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_validates() {
        let service = SessionService::new("test-session-secret", 30);
        let (token, expires) = service
            .issue(Uuid::new_v4(), Some("aa:bb:cc:dd:ee:ff".to_string()))
            .unwrap();

        let status = service.validate(&token);
        assert!(status.valid);
        assert_eq!(status.expires_at.map(|e| e.timestamp()), Some(expires.timestamp()));
    }

    #[test]
    fn foreign_or_expired_tokens_are_invalid() {
        let service = SessionService::new("secret-a", 30);
        let (token, _) = SessionService::new("secret-b", 30)
            .issue(Uuid::new_v4(), None)
            .unwrap();
        assert!(!service.validate(&token).valid);

        let (expired, _) = SessionService::new("secret-a", -5)
            .issue(Uuid::new_v4(), None)
            .unwrap();
        assert!(!service.validate(&expired).valid);
        assert!(!service.validate("not-a-token").valid);
    }
}
