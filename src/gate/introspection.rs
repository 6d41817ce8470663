//! OAuth2 token introspection client
//!
//! Posts the bearer token to the provider's introspection endpoint as an
//! `application/x-www-form-urlencoded` body and hands back the provider's
//! status together with its JSON body.
//!
//! # Example
//!
//! ```no_run
//! use oidc_gate::config::OidcConfig;
//! use oidc_gate::gate::{HttpIntrospector, Introspector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OidcConfig {
//!     active: true,
//!     root_url: "https://keycloak.example.com".into(),
//!     realm: "esa".into(),
//!     client_id: "gate".into(),
//!     client_secret: "s3cret".into(),
//!     ..Default::default()
//! };
//! let introspector = HttpIntrospector::new(&config)?;
//! let response = introspector.introspect("eyJhbGciOi...").await?;
//! println!("active: {}", response.is_active()?);
//! # Ok(())
//! # }
//! ```

use super::RoleSet;
use crate::config::OidcConfig;
use async_trait::async_trait;
use hyper::StatusCode;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{CONTENT_TYPE, HOST};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Characters `encodeURIComponent` leaves untouched besides alphanumerics
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Introspection failures
#[derive(Error, Debug)]
pub enum IntrospectionError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid JSON in introspection response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected introspection response: {0}")]
    Malformed(String),
}

impl IntrospectionError {
    /// HTTP status attached to the failure, if the failure carries one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            IntrospectionError::Transport(e) => e.status(),
            _ => None,
        }
    }
}

/// Form fields sent to the introspection endpoint
#[derive(Debug, Clone)]
pub struct IntrospectionRequest<'a> {
    pub client_secret: &'a str,
    pub client_id: &'a str,
    pub token: &'a str,
}

impl IntrospectionRequest<'_> {
    /// Encode as `client_secret=..&client_id=..&token=..`
    ///
    /// Keys and values are percent-encoded independently with
    /// `encodeURIComponent` rules, so spaces become `%20` rather than `+`.
    pub fn form_body(&self) -> String {
        [
            ("client_secret", self.client_secret),
            ("client_id", self.client_id),
            ("token", self.token),
        ]
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, COMPONENT),
                utf8_percent_encode(value, COMPONENT)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
    }
}

/// Provider reply: status plus parsed JSON body
#[derive(Debug, Clone)]
pub struct IntrospectionResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl IntrospectionResponse {
    /// Whether the provider considers the token live.
    ///
    /// Absent, `null`, `false`, `0` and `""` all count as inactive. A body that
    /// is not a JSON object is malformed.
    pub fn is_active(&self) -> Result<bool, IntrospectionError> {
        let claims = self.body.as_object().ok_or_else(|| {
            IntrospectionError::Malformed("introspection body is not a JSON object".into())
        })?;

        Ok(match claims.get("active") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        })
    }

    /// `sub` claim; non-string values are rendered as their JSON text
    pub fn subject(&self) -> Option<String> {
        match self.body.get("sub")? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Roles granted through `resource_access`
    pub fn roles(&self) -> Result<RoleSet, IntrospectionError> {
        RoleSet::from_resource_access(self.body.get("resource_access"))
    }

    /// Body rendered for the provider-response log line
    pub fn pretty_body(&self) -> String {
        serde_json::to_string_pretty(&self.body).unwrap_or_else(|_| self.body.to_string())
    }
}

/// Token introspection backend
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Ask the provider about `token`
    async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, IntrospectionError>;
}

/// Introspector talking HTTP to a Keycloak-style endpoint
pub struct HttpIntrospector {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
    host_header: Option<String>,
}

impl HttpIntrospector {
    /// Create an introspector from provider settings
    ///
    /// The configured timeout bounds the whole exchange, body included.
    /// Provider redirects are returned as-is, not followed.
    pub fn new(config: &OidcConfig) -> Result<Self, IntrospectionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            endpoint: config.introspection_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            host_header: config.host_header.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Introspector for HttpIntrospector {
    async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, IntrospectionError> {
        let form = IntrospectionRequest {
            client_secret: &self.client_secret,
            client_id: &self.client_id,
            token,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(form.form_body());

        if let Some(ref host) = self.host_header {
            request = request.header(HOST, host);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let body: Value = serde_json::from_slice(&bytes)?;

        Ok(IntrospectionResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(body: Value) -> IntrospectionResponse {
        IntrospectionResponse {
            status: StatusCode::OK,
            body,
        }
    }

    #[test]
    fn test_form_body_field_order() {
        let form = IntrospectionRequest {
            client_secret: "secret",
            client_id: "gate",
            token: "abc",
        };
        assert_eq!(form.form_body(), "client_secret=secret&client_id=gate&token=abc");
    }

    #[test]
    fn test_form_body_encodes_like_uri_component() {
        let form = IntrospectionRequest {
            client_secret: "a b&c=d",
            client_id: "gate-1_x.y~z",
            token: "tok/+=!*'()",
        };
        assert_eq!(
            form.form_body(),
            "client_secret=a%20b%26c%3Dd&client_id=gate-1_x.y~z&token=tok%2F%2B%3D!*'()"
        );
    }

    #[test]
    fn test_is_active_truthiness() {
        assert!(response(json!({"active": true})).is_active().unwrap());
        assert!(response(json!({"active": 1})).is_active().unwrap());
        assert!(response(json!({"active": "yes"})).is_active().unwrap());
        assert!(!response(json!({"active": false})).is_active().unwrap());
        assert!(!response(json!({"active": null})).is_active().unwrap());
        assert!(!response(json!({"active": 0})).is_active().unwrap());
        assert!(!response(json!({"active": ""})).is_active().unwrap());
        assert!(!response(json!({})).is_active().unwrap());
    }

    #[test]
    fn test_is_active_requires_object_body() {
        for body in [json!(null), json!("not an object"), json!([true]), json!(1)] {
            assert!(matches!(
                response(body).is_active(),
                Err(IntrospectionError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_subject() {
        assert_eq!(
            response(json!({"sub": "u1"})).subject().as_deref(),
            Some("u1")
        );
        assert_eq!(response(json!({})).subject(), None);
        assert_eq!(response(json!({"sub": null})).subject(), None);
    }

    #[test]
    fn test_subject_non_string_rendered() {
        assert_eq!(
            response(json!({"sub": 42})).subject().as_deref(),
            Some("42")
        );
        assert_eq!(
            response(json!({"sub": true})).subject().as_deref(),
            Some("true")
        );
    }

    #[test]
    fn test_endpoint_from_config() {
        let config = OidcConfig {
            root_url: "http://kc:8080".into(),
            realm: "esa".into(),
            ..Default::default()
        };
        let introspector = HttpIntrospector::new(&config).unwrap();
        assert_eq!(
            introspector.endpoint(),
            "http://kc:8080/auth/realms/esa/protocol/openid-connect/token/introspect"
        );
    }
}
