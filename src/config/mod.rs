pub mod declared;

pub use declared::{DeclaredConfig, GrantEntry, ProviderEntry, UserEntry};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Complete server configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// Desired-state document applied at startup.
    #[serde(default)]
    pub declared_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "warden.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    /// Env var holding the base64 32-byte key for provider client secrets
    #[serde(default = "default_encryption_key_env")]
    pub encryption_key_env: String,
}

fn default_encryption_key_env() -> String {
    "WARDEN_ENCRYPTION_KEY".to_string()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            encryption_key_env: default_encryption_key_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    #[serde(default = "default_access_key_ttl_hours")]
    pub access_key_ttl_hours: i64,
}

fn default_session_ttl_hours() -> i64 {
    24
}

fn default_access_key_ttl_hours() -> i64 {
    720
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            access_key_ttl_hours: default_access_key_ttl_hours(),
        }
    }
}

impl TokenConfig {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }

    pub fn access_key_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.access_key_ttl_hours)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Bound on every call to an external identity provider
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Directory sync period; 0 disables the background loop
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
}

fn default_request_timeout() -> u64 {
    10
}

fn default_sync_interval() -> u64 {
    300
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            sync_interval_seconds: default_sync_interval(),
        }
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl ServerConfig {
    /// Applies `WARDEN_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup; the environment in production.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WARDEN_DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = lookup("WARDEN_BIND") {
            self.api.bind = v;
        }
        if let Some(v) = lookup("WARDEN_DECLARED_CONFIG") {
            self.declared_config = Some(PathBuf::from(v));
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<ServerConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path))?;
    let config: ServerConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
