//! Configuration loader and validator for the ticketing client.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub identity: Identity,
    pub services: Services,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Window during which a repeated payment-return is ignored.
    #[serde(default = "default_cooldown_ms")]
    pub processing_cooldown_ms: u64,
    /// Public origin used to build checkout return URLs.
    pub origin: String,
}

fn default_cooldown_ms() -> u64 {
    5_000
}

/// OAuth2 identity provider (Cognito user pool domain) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub authority: String,
    pub client_id: String,
    pub client_secret: String,
    /// Client id sent in the form body. Defaults to `client_id` when empty.
    #[serde(default)]
    pub app_client_id: String,
    pub redirect_uri: String,
}

impl Identity {
    pub fn form_client_id(&self) -> &str {
        if self.app_client_id.trim().is_empty() {
            &self.client_id
        } else {
            &self.app_client_id
        }
    }
}

/// Base URLs of the backend services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Services {
    /// API gateway fronting the event, booking, and billing services.
    pub gateway_url: String,
    /// Web front end hosting the checkout and upload routes.
    pub frontend_url: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL for client storage, honouring `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/client.db", self.app.data_dir))
    }

    pub fn processing_cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.app.processing_cooldown_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn is_http_url(s: &str) -> bool {
    url::Url::parse(s.trim())
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if !is_http_url(&cfg.app.origin) {
        return Err(ConfigError::Invalid("app.origin must be an http(s) URL"));
    }
    // processing_cooldown_ms of 0 disables the guard window; allowed.

    if !is_http_url(&cfg.identity.authority) {
        return Err(ConfigError::Invalid("identity.authority must be an http(s) URL"));
    }
    if cfg.identity.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("identity.client_id must be non-empty"));
    }
    if cfg.identity.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("identity.client_secret must be non-empty"));
    }
    if !is_http_url(&cfg.identity.redirect_uri) {
        return Err(ConfigError::Invalid("identity.redirect_uri must be an http(s) URL"));
    }

    if !is_http_url(&cfg.services.gateway_url) {
        return Err(ConfigError::Invalid("services.gateway_url must be an http(s) URL"));
    }
    if !is_http_url(&cfg.services.frontend_url) {
        return Err(ConfigError::Invalid("services.frontend_url must be an http(s) URL"));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  processing_cooldown_ms: 5000
  origin: "http://localhost:3000"

identity:
  authority: "https://mulan.auth.ap-southeast-1.amazoncognito.com"
  client_id: "YOUR_COGNITO_CLIENT_ID"
  client_secret: "YOUR_COGNITO_CLIENT_SECRET"
  app_client_id: ""
  redirect_uri: "http://localhost:3000/api/auth/callback/cognito"

services:
  gateway_url: "http://localhost:8100"
  frontend_url: "http://localhost:3000"
"#
}
