//! Configuration module for the OIDC gate
//!
//! Handles loading of the gate configuration, either from the process
//! environment or from a YAML file with environment variable expansion.
//! The resulting [`Config`] is built once at startup and never mutated.

use crate::dispatch::BackendRoute;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Path appended to the provider root URL to reach the introspection endpoint.
/// `{realm}` is replaced by the configured realm name.
const INTROSPECTION_PATH: &str = "/auth/realms/{realm}/protocol/openid-connect/token/introspect";

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Interpret a switch value the way operators write them in env files.
///
/// `1`, `true`, `yes` and `on` (any case) are true. `0`, `false`, `no`, `off`
/// and the empty string are false. Any other value is a validation error.
pub fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::ValidationError(format!(
            "'{}' is not a recognised boolean value",
            value
        ))),
    }
}

/// Accept either a YAML boolean or a string such as an expanded `${OIDC_ACTIVE}`.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => parse_flag(&s).map_err(serde::de::Error::custom),
    }
}

/// Optional strings where an empty value means "not configured".
fn deserialize_non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oidc: OidcConfig,
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Build configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        ConfigLoader::from_env()
    }

    /// Validate the configuration
    ///
    /// An incomplete OIDC section is not rejected here; the gate starts and
    /// answers every protected request with a configuration error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Server address cannot be empty".into(),
            ));
        }

        if self.routes.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one route must be configured".into(),
            ));
        }

        for route in &self.routes {
            if !route.path_prefix.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "Route '{}' path_prefix must start with '/'",
                    route.backend
                )));
            }

            if !is_valid_http_url(&route.upstream) {
                return Err(ConfigError::ValidationError(format!(
                    "Route '{}' upstream must start with http:// or https://",
                    route.backend
                )));
            }
        }

        if self.oidc.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "OIDC timeout_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
        }
    }
}

fn default_server_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Identity provider settings.
///
/// # Example
///
/// ```yaml
/// oidc:
///   active: ${OIDC_ACTIVE:-false}
///   root_url: "${OIDC_ROOT_URL}"
///   realm: "${REALM_NAME}"
///   client_id: "${CLIENT_ID}"
///   client_secret: "${CLIENT_SECRET}"
///   host_header: "${KEYCLOAK_HOST_HEADER:-}"
///   guard_role: "app:admin"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Master switch. When false every protected request is forwarded unchecked.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub active: bool,

    #[serde(default)]
    pub root_url: String,

    #[serde(default)]
    pub realm: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Host header sent to the provider instead of the one derived from `root_url`
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub host_header: Option<String>,

    /// Single `client:role` string every allowed request must hold
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub guard_role: Option<String>,

    /// Introspection call timeout in seconds. Default: 10
    #[serde(default = "default_oidc_timeout")]
    pub timeout_seconds: u64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            active: false,
            root_url: String::new(),
            realm: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            host_header: None,
            guard_role: None,
            timeout_seconds: default_oidc_timeout(),
        }
    }
}

impl OidcConfig {
    /// Full token introspection endpoint for the configured realm
    pub fn introspection_url(&self) -> String {
        format!(
            "{}{}",
            self.root_url,
            INTROSPECTION_PATH.replace("{realm}", &self.realm)
        )
    }

    /// True when every setting the introspection call needs is present
    pub fn is_complete(&self) -> bool {
        !self.root_url.is_empty()
            && !self.realm.is_empty()
            && !self.client_id.is_empty()
            && !self.client_secret.is_empty()
    }
}

fn default_oidc_timeout() -> u64 {
    10
}

/// A protected backend reachable under a path prefix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub backend: BackendRoute,
    pub path_prefix: String,
    /// Base URL requests are forwarded to once allowed
    pub upstream: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}
