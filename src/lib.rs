//! OIDC Gate Library
//!
//! Token-introspection gatekeeper in front of protected HTTP backends.
//!
//! # Features
//!
//! - **Introspection**: bearer tokens checked against a Keycloak-style
//!   OAuth2 introspection endpoint
//! - **Client roles**: `resource_access` grants flattened to `client:role`
//!   strings and forwarded as `X-Roles`
//! - **Guard role**: optional single role required for every request
//! - **Bypass switch**: authorization can be turned off for environments
//!   without an identity provider
//!
//! # Example
//!
//! ```no_run
//! use oidc_gate::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = Server::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod gate;
pub mod metrics;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{BackendRoute, DispatchOutcome, Dispatcher};
pub use gate::{Authorizer, Decision, Denial};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
