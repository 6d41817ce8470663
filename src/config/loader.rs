//! Configuration loader with environment variable expansion

use super::{
    parse_flag, Config, ConfigError, MetricsConfig, OidcConfig, RouteConfig, ServerConfig,
};
use crate::dispatch::BackendRoute;
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` placeholders first
    pub fn from_yaml(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment
    pub fn from_env() -> Result<Config, ConfigError> {
        let oidc = OidcConfig {
            active: parse_flag(&env_string("OIDC_ACTIVE"))?,
            root_url: env_string("OIDC_ROOT_URL"),
            realm: env_string("REALM_NAME"),
            client_id: env_string("CLIENT_ID"),
            client_secret: env_string("CLIENT_SECRET"),
            host_header: env_optional("KEYCLOAK_HOST_HEADER"),
            guard_role: env_optional("GUARD_ROLE"),
            timeout_seconds: env_parsed("OIDC_TIMEOUT_SECONDS")?
                .unwrap_or(OidcConfig::default().timeout_seconds),
        };

        let mut routes = Vec::new();
        if let Some(upstream) = env_optional("ODPAPI_UPSTREAM") {
            routes.push(RouteConfig {
                backend: BackendRoute::Odpapi,
                path_prefix: env_optional("ODPAPI_PATH_PREFIX")
                    .unwrap_or_else(|| BackendRoute::Odpapi.default_path_prefix().to_string()),
                upstream,
            });
        }
        if let Some(upstream) = env_optional("DOWNLOAD_UPSTREAM") {
            routes.push(RouteConfig {
                backend: BackendRoute::Download,
                path_prefix: env_optional("DOWNLOAD_PATH_PREFIX")
                    .unwrap_or_else(|| BackendRoute::Download.default_path_prefix().to_string()),
                upstream,
            });
        }

        let defaults = MetricsConfig::default();
        let metrics = MetricsConfig {
            enabled: match env_optional("METRICS_ENABLED") {
                Some(v) => parse_flag(&v)?,
                None => defaults.enabled,
            },
            port: env_parsed("METRICS_PORT")?.unwrap_or(defaults.port),
        };

        let server = match env_optional("GATE_ADDRESS") {
            Some(address) => ServerConfig { address },
            None => ServerConfig::default(),
        };

        let config = Config {
            server,
            oidc,
            routes,
            metrics,
        };
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR_NAME}` or
    /// `${VAR_NAME:-default}`.
    ///
    /// A variable that is unset and has no default expands to the empty string,
    /// so a missing secret reads as missing rather than as placeholder text.
    fn expand_env_vars(content: &str) -> String {
        let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("placeholder pattern is valid");
        let mut result = String::with_capacity(content.len());
        let mut last_match = 0;

        for cap in re.captures_iter(content) {
            let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };

            result.push_str(&content[last_match..full_match.start()]);

            let value = std::env::var(var_name.as_str())
                .ok()
                .or_else(|| cap.get(2).map(|d| d.as_str().to_string()))
                .unwrap_or_default();
            result.push_str(&value);

            last_match = full_match.end();
        }

        result.push_str(&content[last_match..]);
        result
    }
}

fn env_string(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env_optional(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ValidationError(format!("{} is not a valid value", key))),
        None => Ok(None),
    }
}
