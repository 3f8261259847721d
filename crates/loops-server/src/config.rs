use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use loops_client::{DEFAULT_BASE_URL, LoopsClientConfig};
use loops_controller::{ControllerConfig, ManagerConfig};
use loops_core::ResourceRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fallback for `loops.api_key`.
pub const API_KEY_ENV: &str = "LOOPS_API_KEY";
/// Fallback for `webhook.signing_secret`.
pub const SIGNING_SECRET_ENV: &str = "LOOPS_SIGNING_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] config::ConfigError),

    #[error("{0}")]
    Invalid(String),

    #[error("{0} is required but not set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub loops: LoopsConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub newsletter: NewsletterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.server.port == 0 {
            return invalid("server.port must be > 0");
        }
        if self.server.host.parse::<IpAddr>().is_err() {
            return invalid("server.host must be an IP address");
        }
        if self.server.body_limit_bytes == 0 {
            return invalid("server.body_limit_bytes must be > 0");
        }
        if url::Url::parse(&self.loops.base_url).is_err() {
            return invalid("loops.base_url must be an absolute URL");
        }
        if self.loops.timeout_ms == 0 {
            return invalid("loops.timeout_ms must be > 0");
        }
        if self.controller.workers == 0 {
            return invalid("controller.workers must be > 0");
        }
        if self.controller.backoff_base_ms == 0 {
            return invalid("controller.backoff_base_ms must be > 0");
        }
        if self.controller.backoff_max_ms < self.controller.backoff_base_ms {
            return invalid("controller.backoff_max_ms must be >= controller.backoff_base_ms");
        }
        if !self.newsletter.group_name.is_empty() && self.newsletter.group_namespace.is_empty() {
            return invalid("newsletter.group_namespace is required when newsletter.group_name is set");
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::from((host, self.server.port))
    }

    /// Client settings; fails without an API key.
    pub fn client_config(&self) -> Result<LoopsClientConfig, ConfigError> {
        if self.loops.api_key.is_empty() {
            return Err(ConfigError::Missing(API_KEY_ENV));
        }
        Ok(LoopsClientConfig::new(&self.loops.api_key)
            .with_base_url(&self.loops.base_url)
            .with_request_timeout(Duration::from_millis(self.loops.timeout_ms)))
    }

    /// Webhook signing secret; fails when unset.
    pub fn signing_secret(&self) -> Result<&str, ConfigError> {
        if self.webhook.signing_secret.is_empty() {
            return Err(ConfigError::Missing(SIGNING_SECRET_ENV));
        }
        Ok(&self.webhook.signing_secret)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            controller: ControllerConfig {
                workers: self.controller.workers,
                backoff_base: Duration::from_millis(self.controller.backoff_base_ms),
                backoff_max: Duration::from_millis(self.controller.backoff_max_ms),
            },
            newsletter_group: self.newsletter.group_ref(),
        }
    }

    /// Fill secrets left empty by the file and `LOOPS__*` variables from the
    /// well-known environment variables.
    fn apply_env_fallbacks(&mut self) {
        if self.loops.api_key.is_empty() {
            self.loops.api_key = std::env::var(API_KEY_ENV).unwrap_or_default();
        }
        if self.webhook.signing_secret.is_empty() {
            self.webhook.signing_secret = std::env::var(SIGNING_SECRET_ENV).unwrap_or_default();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    9443
}
fn default_body_limit() -> usize {
    loops_webhook::DEFAULT_BODY_LIMIT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LoopsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for LoopsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl std::fmt::Debug for LoopsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopsConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub signing_secret: String,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("signing_secret", &redact(&self.signing_secret))
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<unset>" } else { "<redacted>" }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_workers() -> usize {
    2
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    300_000
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Group that `newsletter-` contacts are enrolled in. Disabled when `group_name` is empty.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewsletterConfig {
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub group_namespace: String,
}

impl NewsletterConfig {
    pub fn group_ref(&self) -> Option<ResourceRef> {
        if self.group_name.is_empty() {
            return None;
        }
        Some(ResourceRef::new(&self.group_name, &self.group_namespace))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// JSON file of records loaded into the store at startup.
    #[serde(default)]
    pub seed_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "loops.toml";

    /// Load the optional TOML file, overlay `LOOPS__SECTION__KEY` variables,
    /// then the secret fallbacks, and validate.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        let mut builder = Config::builder();
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // e.g. LOOPS__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("LOOPS")
                .try_parsing(true)
                .separator("__"),
        );
        let mut merged: AppConfig = builder.build()?.try_deserialize()?;
        merged.apply_env_fallbacks();
        merged.validate()?;
        Ok(merged)
    }
}
