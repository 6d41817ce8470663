//! HTTP server module
//!
//! Runs the gateway listener and, when enabled, the metrics listener.

use crate::config::Config;
use crate::metrics::server::MetricsServer;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;

pub mod forward;
pub mod gateway;

pub use forward::{ForwardError, GatewayBody, UpstreamForwarder};
pub use gateway::GatewayServer;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// Top-level server: gateway plus optional metrics endpoint
pub struct Server {
    config: Config,
    addr: SocketAddr,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("{}", e)))?;

        Ok(Self { config, addr })
    }

    /// Run until the process receives Ctrl-C
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Starting server on {}", self.addr);
        info!(
            "OIDC authorization: {}",
            if self.config.oidc.active {
                "enabled"
            } else {
                "disabled"
            }
        );

        let mut metrics_server = if self.config.metrics.enabled {
            let mut server = MetricsServer::new(format!("0.0.0.0:{}", self.config.metrics.port));
            let metrics_addr = server
                .start()
                .await
                .map_err(|e| ServerError::BindError(e.to_string()))?;
            info!("Metrics available on http://{}/metrics", metrics_addr);
            Some(server)
        } else {
            None
        };

        let gateway = GatewayServer::new(self.config).await?;

        let result = tokio::select! {
            result = gateway.run() => result,
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|e| ServerError::RuntimeError(e.to_string()))
            }
        };

        if let Some(ref mut server) = metrics_server {
            server.shutdown().await;
        }

        info!("Shutting down server");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetricsConfig, OidcConfig, RouteConfig, ServerConfig};
    use crate::dispatch::BackendRoute;

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                address: "127.0.0.1:0".into(),
            },
            oidc: OidcConfig::default(),
            routes: vec![RouteConfig {
                backend: BackendRoute::Odpapi,
                path_prefix: "/odata".into(),
                upstream: "http://127.0.0.1:9".into(),
            }],
            metrics: MetricsConfig::default(),
        }
    }

    #[test]
    fn test_server_new() {
        let server = Server::new(test_config());
        assert!(server.is_ok());
    }

    #[test]
    fn test_server_invalid_address() {
        let mut config = test_config();
        config.server.address = "invalid".into();
        let server = Server::new(config);
        assert!(server.is_err());
    }
}
