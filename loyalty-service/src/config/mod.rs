use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

/// Values shipped in sample env files. Treated as "not configured".
const PLACEHOLDER_ACCESS_TOKEN: &str = "your-square-access-token";
const PLACEHOLDER_LOCATION_ID: &str = "your-square-location-id";
const PLACEHOLDER_JWT_SECRET: &str = "your-secret-key";

#[derive(Debug, Clone, Deserialize)]
pub struct LoyaltyConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub jwt: JwtConfig,
    pub square: SquareConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub expiry_hours: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SquareEnvironment {
    Sandbox,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SquareConfig {
    pub access_token: Secret<String>,
    pub location_id: String,
    pub environment: SquareEnvironment,
    /// Overrides the environment's API host. Used against local stand-ins.
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
    pub retry_max_elapsed_seconds: u64,
}

impl SquareConfig {
    /// Credentials are present and not the sample placeholders.
    pub fn is_configured(&self) -> bool {
        let token = self.access_token.expose_secret();
        !token.is_empty()
            && token != PLACEHOLDER_ACCESS_TOKEN
            && !self.location_id.is_empty()
            && self.location_id != PLACEHOLDER_LOCATION_ID
    }

    pub fn base_url(&self) -> &str {
        match (&self.base_url, &self.environment) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, SquareEnvironment::Production) => "https://connect.squareup.com",
            (None, SquareEnvironment::Sandbox) => "https://connect.squareupsandbox.com",
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_max_elapsed(&self) -> Duration {
        Duration::from_secs(self.retry_max_elapsed_seconds)
    }
}

impl LoyaltyConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = LoyaltyConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("loyalty-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            jwt: JwtConfig {
                secret: Secret::new(get_env("JWT_SECRET", Some(PLACEHOLDER_JWT_SECRET), is_prod)?),
                expiry_hours: parse_env("JWT_EXPIRY_HOURS", "24", is_prod)?,
            },
            // Square is optional in every environment: without credentials
            // the service runs on the in-process ledger.
            square: SquareConfig {
                access_token: Secret::new(env::var("SQUARE_ACCESS_TOKEN").unwrap_or_default()),
                location_id: env::var("SQUARE_LOCATION_ID").unwrap_or_default(),
                environment: env::var("SQUARE_ENVIRONMENT")
                    .unwrap_or_else(|_| "sandbox".to_string())
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                base_url: env::var("SQUARE_BASE_URL").ok().filter(|s| !s.is_empty()),
                timeout_seconds: parse_env("SQUARE_TIMEOUT_SECONDS", "10", false)?,
                retry_max_elapsed_seconds: parse_env("SQUARE_RETRY_MAX_ELAPSED_SECONDS", "5", false)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.expiry_hours <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_EXPIRY_HOURS must be positive"
            )));
        }

        if self.square.timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SQUARE_TIMEOUT_SECONDS must be positive"
            )));
        }

        let jwt_secret = self.jwt.secret.expose_secret();
        if self.environment == Environment::Prod {
            if jwt_secret.is_empty() || jwt_secret == PLACEHOLDER_JWT_SECRET {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET must be set to a real secret in production"
                )));
            }
        } else if jwt_secret == PLACEHOLDER_JWT_SECRET {
            tracing::warn!("JWT_SECRET is using the development placeholder");
        }

        if !self.square.is_configured() {
            tracing::warn!("Square credentials not configured, in-process ledger will be used");
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

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
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

impl std::str::FromStr for SquareEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" => Ok(SquareEnvironment::Sandbox),
            "production" => Ok(SquareEnvironment::Production),
            _ => Err(format!("Invalid Square environment: {}", s)),
        }
    }
}
