use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::models::RegistrationMode;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub registration: RegistrationConfig,
    pub certificate_authority: CertificateAuthorityConfig,
    pub controller: ControllerConfig,
    pub sweeper: SweeperConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub admin_api_key: Secret<String>,
    /// Base64 AES-256 key sealing stored passphrases.
    pub passphrase_key: Secret<String>,
    pub session_secret: Secret<String>,
    pub session_ttl_minutes: i64,
    /// HMAC key deriving the password a client presents to the controller.
    pub portal_token_secret: Secret<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    pub modes: Vec<RegistrationMode>,
    /// Permit more than one active credential per owner, network and kind.
    pub allow_multiple_credentials: bool,
    pub network_id: String,
    pub passphrase_length: usize,
    /// Zero means credentials never expire.
    pub credential_validity_days: u32,
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateAuthorityConfig {
    /// Unset runs against the in-process mock CA (dev only).
    pub base_url: Option<String>,
    pub api_token: Secret<String>,
    pub timeout_secs: u64,
    pub validity_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub timeout_secs: u64,
    pub grant_duration_secs: u64,
    /// Where clients land when the controller supplied no continue URL.
    pub connected_url: String,
    /// Hosts the portal may call back to; empty allows any.
    pub allowed_hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Authenticated,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

fn config_error(key: &str, e: impl std::fmt::Display) -> AppError {
    AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e))
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?
        .parse()
        .map_err(|e| config_error(key, e))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let modes = split_list(&get_env("REGISTRATION_MODES", Some("open"), false)?)
            .iter()
            .map(|m| m.parse::<RegistrationMode>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| config_error("REGISTRATION_MODES", e))?;

        let config = AccessConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("access-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                backend: get_env("STORE_BACKEND", Some("postgres"), false)?
                    .parse()
                    .map_err(|e: String| config_error("STORE_BACKEND", e))?,
                url: get_env(
                    "DATABASE_URL",
                    Some("postgres://localhost/access"),
                    is_prod,
                )?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
                admin_api_key: Secret::new(get_env("ADMIN_API_KEY", None, true)?),
                passphrase_key: Secret::new(get_env("PASSPHRASE_KEY", None, true)?),
                session_secret: Secret::new(get_env("SESSION_SECRET", None, true)?),
                session_ttl_minutes: parse_env("SESSION_TTL_MINUTES", "60")?,
                portal_token_secret: Secret::new(get_env("PORTAL_TOKEN_SECRET", None, true)?),
            },
            registration: RegistrationConfig {
                modes,
                allow_multiple_credentials: parse_env("ALLOW_MULTIPLE_CREDENTIALS", "false")?,
                network_id: get_env("NETWORK_ID", Some("default"), false)?,
                passphrase_length: parse_env("PASSPHRASE_LENGTH", "16")?,
                credential_validity_days: parse_env("CREDENTIAL_VALIDITY_DAYS", "0")?,
                organization: env::var("CERT_ORGANIZATION").ok().filter(|s| !s.is_empty()),
            },
            certificate_authority: CertificateAuthorityConfig {
                base_url: env::var("CA_BASE_URL").ok().filter(|s| !s.is_empty()),
                api_token: Secret::new(get_env("CA_API_TOKEN", Some(""), false)?),
                timeout_secs: parse_env("CA_TIMEOUT_SECS", "10")?,
                validity_days: parse_env("CA_VALIDITY_DAYS", "365")?,
            },
            controller: ControllerConfig {
                timeout_secs: parse_env("CONTROLLER_TIMEOUT_SECS", "5")?,
                grant_duration_secs: parse_env("CONTROLLER_GRANT_DURATION_SECS", "86400")?,
                connected_url: get_env(
                    "PORTAL_CONNECTED_URL",
                    Some("http://localhost:8080/portal/connected"),
                    is_prod,
                )?,
                allowed_hosts: split_list(&get_env("CONTROLLER_ALLOWED_HOSTS", Some(""), false)?),
            },
            sweeper: SweeperConfig {
                interval_secs: parse_env("SWEEPER_INTERVAL_SECS", "300")?,
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                register_attempts: parse_env("RATE_LIMIT_REGISTER_ATTEMPTS", "10")?,
                register_window_seconds: parse_env("RATE_LIMIT_REGISTER_WINDOW_SECONDS", "60")?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100")?,
                global_ip_window_seconds: parse_env("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", "60")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        let passphrase_length = self.registration.passphrase_length;
        if !(8..=63).contains(&passphrase_length) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASSPHRASE_LENGTH must be between 8 and 63"
            )));
        }

        if self.security.session_ttl_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_TTL_MINUTES must be positive"
            )));
        }

        if self.sweeper.interval_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SWEEPER_INTERVAL_SECS must be positive"
            )));
        }

        if self.security.admin_api_key.expose_secret().len() < 16 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ADMIN_API_KEY must be at least 16 characters"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.database.backend == StoreBackend::Memory {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STORE_BACKEND=memory is not allowed in production"
                )));
            }

            if self.certificate_authority.base_url.is_none() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "CA_BASE_URL is required in production"
                )));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::error!("Swagger is publicly accessible in production - consider using 'authenticated' or 'disabled'");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl std::str::FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "authenticated" => Ok(SwaggerMode::Authenticated),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_enums_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("Memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("mongo".parse::<StoreBackend>().is_err());
        assert_eq!(
            "authenticated".parse::<SwaggerMode>().unwrap(),
            SwaggerMode::Authenticated
        );
    }

    #[test]
    fn splits_comma_lists() {
        assert_eq!(
            split_list(" open , invite_only ,,"),
            vec!["open".to_string(), "invite_only".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
