//! Authorization decision engine
//!
//! Decides, per inbound request, whether the caller may reach a protected
//! backend. The bearer credential is checked against the identity provider's
//! token introspection endpoint and the provider's client-role grants are
//! flattened into a [`RoleSet`].
//!
//! Every failure mode is a [`Denial`] variant carrying its own HTTP status, so
//! callers can match on the exact reason a request was turned away.

use hyper::StatusCode;
use std::collections::HashMap;
use thiserror::Error;

pub mod engine;
pub mod introspection;
pub mod roles;

pub use engine::Authorizer;
pub use introspection::{
    HttpIntrospector, IntrospectionError, IntrospectionRequest, IntrospectionResponse,
    Introspector,
};
pub use roles::RoleSet;

/// Header carrying the inbound `Host` value to the backend
pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";

/// Header carrying the authenticated subject to the backend
pub const X_USERNAME: &str = "X-Username";

/// Header carrying the comma-joined `client:role` grants to the backend
pub const X_ROLES: &str = "X-Roles";

/// Message returned when the provider settings are incomplete
pub const CONFIGURATION_MESSAGE: &str =
    "Cannot properly configure OIDC connection. Check required environment variables.";

/// Reasons a request is denied
#[derive(Error, Debug)]
pub enum Denial {
    #[error("{}", CONFIGURATION_MESSAGE)]
    Configuration,

    #[error("No Authorization header found")]
    MissingCredential,

    #[error("Cannot authenticate on {endpoint} (status {status})")]
    ProviderRejected { endpoint: String, status: StatusCode },

    #[error("Session not found")]
    SessionInactive { status: StatusCode },

    #[error("User must have role '{0}' to access this resource.")]
    InsufficientRole(String),

    #[error("Cannot authenticate: {0}")]
    Introspection(#[from] IntrospectionError),
}

impl Denial {
    /// Status code the request is terminated with
    pub fn status(&self) -> StatusCode {
        match self {
            Denial::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            Denial::MissingCredential | Denial::SessionInactive { .. } => StatusCode::UNAUTHORIZED,
            Denial::ProviderRejected { status, .. } => *status,
            Denial::InsufficientRole(_) => StatusCode::FORBIDDEN,
            Denial::Introspection(e) => e.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Body the request is terminated with, if any
    pub fn body(&self) -> Option<String> {
        match self {
            Denial::ProviderRejected { .. } | Denial::Introspection(_) => None,
            other => Some(other.to_string()),
        }
    }

    /// Short label used for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::Configuration => "configuration",
            Denial::MissingCredential => "missing_credential",
            Denial::ProviderRejected { .. } => "provider_rejected",
            Denial::SessionInactive { .. } => "session_inactive",
            Denial::InsufficientRole(_) => "insufficient_role",
            Denial::Introspection(_) => "introspection_failed",
        }
    }
}

/// Identity established for an allowed request
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    /// `sub` claim reported by the provider
    pub subject: Option<String>,
    pub roles: RoleSet,
    /// Provider's introspection status, or 200 when it reported none
    pub status: StatusCode,
}

/// Outcome of one authorization attempt
#[derive(Debug)]
pub enum Decision {
    Allow(Grant),
    Deny(Denial),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Read-only view of the inbound request
///
/// Header names are stored lowercase, lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct GateRequest {
    pub headers: HashMap<String, String>,
}

impl GateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, returning the request for chaining
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header("authorization")
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }
}

/// Response state written by the engine
///
/// Holds the outbound headers (kept on allow and deny), the status, and the
/// body of a terminated request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateResponse {
    pub status: Option<StatusCode>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl GateResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous value with the same name
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Finish the request with a status and optional body
    pub fn terminate(&mut self, status: StatusCode, body: Option<String>) {
        self.status = Some(status);
        self.body = body;
    }
}
