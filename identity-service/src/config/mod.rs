use rand::{distributions::Alphanumeric, Rng};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::services::signer::MIN_SIGNING_KEY_BYTES;

/// Longest accepted access token lifetime (one week).
const MAX_ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 7 * 24 * 60;

/// Longest accepted refresh token lifetime (ten years).
const MAX_REFRESH_TOKEN_EXPIRY_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub token: TokenConfig,
    pub registry: RegistryConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheBackend {
    Redis,
    Memory,
    None,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database: Option<DatabaseConfig>,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    pub ttl_seconds: u64,
}

#[derive(Clone)]
pub struct TokenConfig {
    pub signing_key: String,
    pub signing_key_id: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub namespace_url: Option<String>,
    pub policy_url: Option<String>,
    pub static_namespaces: Vec<String>,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct SecurityConfig {
    pub admin_api_key: String,
}

// Secrets stay out of Debug output so the config can be logged.

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"***")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .finish()
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("signing_key", &"***")
            .field("signing_key_id", &self.signing_key_id)
            .field("access_token_expiry_minutes", &self.access_token_expiry_minutes)
            .field("refresh_token_expiry_days", &self.refresh_token_expiry_days)
            .finish()
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("admin_api_key", &"***")
            .finish()
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let store_backend: StoreBackend = parse_env("STORE_BACKEND", Some("memory"), is_prod)?;
        let database = match store_backend {
            StoreBackend::Postgres => Some(DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            }),
            StoreBackend::Memory => None,
        };

        let cache_backend: CacheBackend = parse_env("CACHE_BACKEND", Some("memory"), is_prod)?;
        let redis_url = match cache_backend {
            CacheBackend::Redis => Some(get_env("REDIS_URL", None, is_prod)?),
            CacheBackend::Memory | CacheBackend::None => None,
        };

        let signing_key = match get_optional_env("TOKEN_SIGNING_KEY") {
            Some(key) => key,
            None if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "TOKEN_SIGNING_KEY is required in production but not set"
                )))
            }
            None => {
                tracing::warn!(
                    "TOKEN_SIGNING_KEY not set, using a random key; tokens will not survive a restart"
                );
                random_signing_key()
            }
        };

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            store: StoreConfig {
                backend: store_backend,
                database,
            },
            cache: CacheConfig {
                backend: cache_backend,
                redis_url,
                ttl_seconds: parse_env("CACHE_TTL_SECONDS", Some("300"), is_prod)?,
            },
            token: TokenConfig {
                signing_key,
                signing_key_id: get_env("TOKEN_SIGNING_KEY_ID", Some("primary"), is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("30"),
                    is_prod,
                )?,
            },
            registry: RegistryConfig {
                namespace_url: get_optional_env("NAMESPACE_REGISTRY_URL"),
                policy_url: get_optional_env("POLICY_REGISTRY_URL"),
                static_namespaces: get_optional_env("STATIC_NAMESPACES")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_default(),
                timeout: Duration::from_secs(parse_env(
                    "REGISTRY_TIMEOUT_SECONDS",
                    Some("5"),
                    is_prod,
                )?),
            },
            security: SecurityConfig {
                admin_api_key: get_env("ADMIN_API_KEY", None, true)?,
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

        if !(1..=MAX_ACCESS_TOKEN_EXPIRY_MINUTES).contains(&self.token.access_token_expiry_minutes)
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_TOKEN_EXPIRY_MINUTES must be between 1 and {}",
                MAX_ACCESS_TOKEN_EXPIRY_MINUTES
            )));
        }

        if !(1..=MAX_REFRESH_TOKEN_EXPIRY_DAYS).contains(&self.token.refresh_token_expiry_days) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REFRESH_TOKEN_EXPIRY_DAYS must be between 1 and {}",
                MAX_REFRESH_TOKEN_EXPIRY_DAYS
            )));
        }

        if self.token.signing_key.len() < MIN_SIGNING_KEY_BYTES {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_SIGNING_KEY must be at least {} bytes",
                MIN_SIGNING_KEY_BYTES
            )));
        }

        if self.security.admin_api_key.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ADMIN_API_KEY must not be empty"
            )));
        }

        if let Some(database) = &self.store.database {
            if database.min_connections > database.max_connections {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
                )));
            }
        }

        if self.environment == Environment::Prod {
            if self.store.backend == StoreBackend::Memory {
                tracing::error!("In-memory store in production - all records are lost on restart");
            }
            if self.registry.namespace_url.is_none() {
                tracing::warn!("No namespace registry configured - using STATIC_NAMESPACES only");
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

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    get_env(key, default, is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

/// Unset and blank both mean "not configured".
fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.trim().is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn random_signing_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" => Ok(StoreBackend::Postgres),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            "none" => Ok(CacheBackend::None),
            _ => Err(format!("Invalid cache backend: {}", s)),
        }
    }
}
