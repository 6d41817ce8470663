//! Decision procedure
//!
//! One call to [`Authorizer::authorize`] runs the full check for a request:
//! configuration sanity, credential extraction, the introspection round trip,
//! provider status and session checks, role aggregation and the guard role.

use super::{
    Decision, Denial, GateRequest, GateResponse, Grant, HttpIntrospector, IntrospectionError,
    Introspector, X_FORWARDED_FOR, X_ROLES, X_USERNAME,
};
use crate::config::OidcConfig;
use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const BEARER_PREFIX: &str = "Bearer ";

/// Authorization decision engine
///
/// Cheap to clone; clones share the provider settings and HTTP client.
#[derive(Clone)]
pub struct Authorizer {
    config: Arc<OidcConfig>,
    introspector: Arc<dyn Introspector>,
}

impl Authorizer {
    /// Create an engine that introspects over HTTP
    pub fn new(config: OidcConfig) -> Result<Self, IntrospectionError> {
        let introspector = HttpIntrospector::new(&config)?;
        Ok(Self::with_introspector(config, Arc::new(introspector)))
    }

    /// Create an engine backed by a custom introspector
    pub fn with_introspector(config: OidcConfig, introspector: Arc<dyn Introspector>) -> Self {
        Self {
            config: Arc::new(config),
            introspector,
        }
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Decide whether `request` may proceed.
    ///
    /// On deny, `response` holds the terminal status and body. On allow it holds
    /// the identity headers for the backend and the provider's status.
    /// `X-Forwarded-For` is written in both cases once the configuration check
    /// has passed.
    pub async fn authorize(&self, request: &GateRequest, response: &mut GateResponse) -> Decision {
        match self.evaluate(request, response).await {
            Ok(grant) => {
                if let Some(ref subject) = grant.subject {
                    response.set_header(X_USERNAME, subject);
                }
                response.set_header(X_ROLES, &grant.roles.join(","));
                response.status = Some(grant.status);
                Decision::Allow(grant)
            }
            Err(denial) => {
                response.terminate(denial.status(), denial.body());
                Decision::Deny(denial)
            }
        }
    }

    async fn evaluate(
        &self,
        request: &GateRequest,
        response: &mut GateResponse,
    ) -> Result<Grant, Denial> {
        if self.config.active && !self.config.is_complete() {
            error!("{}", Denial::Configuration);
            return Err(Denial::Configuration);
        }

        if let Some(host) = request.host() {
            response.set_header(X_FORWARDED_FOR, host);
        }

        let credential = request.authorization().ok_or(Denial::MissingCredential)?;
        let token = strip_bearer(credential);

        let started = Instant::now();
        let result = self.introspector.introspect(token).await;
        metrics::record_introspection_duration(started.elapsed().as_secs_f64());
        let reply = result.map_err(introspection_failed)?;

        info!("{}", reply.pretty_body());

        if reply.status.is_client_error() {
            let denial = Denial::ProviderRejected {
                endpoint: self.config.introspection_url(),
                status: reply.status,
            };
            warn!("{}", denial);
            return Err(denial);
        }

        if !reply.is_active().map_err(introspection_failed)? {
            warn!("Session not found: {}", reply.status.as_u16());
            return Err(Denial::SessionInactive {
                status: reply.status,
            });
        }

        let roles = reply.roles().map_err(introspection_failed)?;
        info!("Roles: {}", roles.join(", "));

        if let Some(ref guard) = self.config.guard_role {
            if !roles.contains(guard) {
                return Err(Denial::InsufficientRole(guard.clone()));
            }
        }

        Ok(Grant {
            subject: reply.subject(),
            roles,
            status: reply.status,
        })
    }
}

/// Remove a leading `Bearer ` if present; the rest is used verbatim.
fn strip_bearer(credential: &str) -> &str {
    credential.strip_prefix(BEARER_PREFIX).unwrap_or(credential)
}

fn introspection_failed(e: IntrospectionError) -> Denial {
    let denial = Denial::Introspection(e);
    warn!("{}", denial);
    denial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::IntrospectionResponse;
    use async_trait::async_trait;
    use hyper::StatusCode;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Introspector returning a canned reply and recording the tokens it saw
    struct StubIntrospector {
        status: StatusCode,
        body: Value,
        seen: Mutex<Vec<String>>,
    }

    impl StubIntrospector {
        fn new(status: StatusCode, body: Value) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Introspector for StubIntrospector {
        async fn introspect(
            &self,
            token: &str,
        ) -> Result<IntrospectionResponse, IntrospectionError> {
            self.seen.lock().unwrap().push(token.to_string());
            Ok(IntrospectionResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    fn active_config() -> OidcConfig {
        OidcConfig {
            active: true,
            root_url: "http://kc".into(),
            realm: "esa".into(),
            client_id: "gate".into(),
            client_secret: "secret".into(),
            ..Default::default()
        }
    }

    fn valid_body() -> Value {
        json!({
            "active": true,
            "sub": "u1",
            "resource_access": { "app": { "roles": ["admin"] } }
        })
    }

    fn bearer_request(token: &str) -> GateRequest {
        GateRequest::new()
            .with_header("Host", "gate.example.com")
            .with_header("Authorization", &format!("Bearer {}", token))
    }

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer xyz"), "xyz");
        assert_eq!(strip_bearer("xyz"), "xyz");
        assert_eq!(strip_bearer("Bearer  xyz "), " xyz ");
        assert_eq!(strip_bearer("Basic abc"), "Basic abc");
    }

    #[tokio::test]
    async fn test_allow_sets_identity_headers() {
        let stub = StubIntrospector::new(StatusCode::OK, valid_body());
        let authorizer = Authorizer::with_introspector(active_config(), stub.clone());
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&bearer_request("xyz"), &mut response).await;

        assert!(decision.is_allow());
        assert_eq!(stub.seen.lock().unwrap().as_slice(), ["xyz"]);
        assert_eq!(response.header(X_USERNAME), Some("u1"));
        assert_eq!(response.header(X_ROLES), Some("app:admin"));
        assert_eq!(response.header(X_FORWARDED_FOR), Some("gate.example.com"));
        assert_eq!(response.status, Some(StatusCode::OK));
        assert_eq!(response.body, None);
    }

    #[tokio::test]
    async fn test_missing_authorization() {
        let stub = StubIntrospector::new(StatusCode::OK, valid_body());
        let authorizer = Authorizer::with_introspector(active_config(), stub.clone());
        let request = GateRequest::new().with_header("Host", "gate.example.com");
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&request, &mut response).await;

        assert!(matches!(decision, Decision::Deny(Denial::MissingCredential)));
        assert_eq!(response.status, Some(StatusCode::UNAUTHORIZED));
        assert_eq!(response.body.as_deref(), Some("No Authorization header found"));
        assert_eq!(response.header(X_FORWARDED_FOR), Some("gate.example.com"));
        assert!(stub.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_config_denies_before_anything_else() {
        let stub = StubIntrospector::new(StatusCode::OK, valid_body());
        let config = OidcConfig {
            client_secret: String::new(),
            ..active_config()
        };
        let authorizer = Authorizer::with_introspector(config, stub.clone());
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&bearer_request("xyz"), &mut response).await;

        assert!(matches!(decision, Decision::Deny(Denial::Configuration)));
        assert_eq!(response.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(
            response.body.as_deref(),
            Some(crate::gate::CONFIGURATION_MESSAGE)
        );
        assert_eq!(response.header(X_FORWARDED_FOR), None);
        assert!(stub.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_session_ignores_roles() {
        let stub = StubIntrospector::new(
            StatusCode::OK,
            json!({
                "active": false,
                "resource_access": { "app": { "roles": ["admin"] } }
            }),
        );
        let authorizer = Authorizer::with_introspector(active_config(), stub);
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&bearer_request("xyz"), &mut response).await;

        assert!(matches!(
            decision,
            Decision::Deny(Denial::SessionInactive { .. })
        ));
        assert_eq!(response.status, Some(StatusCode::UNAUTHORIZED));
        assert_eq!(response.body.as_deref(), Some("Session not found"));
        assert_eq!(response.header(X_ROLES), None);
    }

    #[tokio::test]
    async fn test_provider_client_error_passes_through() {
        let stub = StubIntrospector::new(StatusCode::NOT_FOUND, json!({"error": "not found"}));
        let authorizer = Authorizer::with_introspector(active_config(), stub);
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&bearer_request("xyz"), &mut response).await;

        assert!(matches!(
            decision,
            Decision::Deny(Denial::ProviderRejected { .. })
        ));
        assert_eq!(response.status, Some(StatusCode::NOT_FOUND));
        assert_eq!(response.body, None);
        assert_eq!(response.header(X_USERNAME), None);
        assert_eq!(response.header(X_ROLES), None);
    }

    #[tokio::test]
    async fn test_provider_server_error_does_not_deny_by_itself() {
        let stub = StubIntrospector::new(StatusCode::SERVICE_UNAVAILABLE, valid_body());
        let authorizer = Authorizer::with_introspector(active_config(), stub);
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&bearer_request("xyz"), &mut response).await;

        assert!(decision.is_allow());
        assert_eq!(response.status, Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_guard_role_missing() {
        let stub = StubIntrospector::new(
            StatusCode::OK,
            json!({
                "active": true,
                "sub": "u1",
                "resource_access": { "app": { "roles": ["user"] } }
            }),
        );
        let config = OidcConfig {
            guard_role: Some("app:admin".into()),
            ..active_config()
        };
        let authorizer = Authorizer::with_introspector(config, stub);
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&bearer_request("xyz"), &mut response).await;

        assert!(matches!(decision, Decision::Deny(Denial::InsufficientRole(_))));
        assert_eq!(response.status, Some(StatusCode::FORBIDDEN));
        assert!(response.body.as_deref().unwrap().contains("app:admin"));
        assert_eq!(response.header(X_USERNAME), None);
    }

    #[tokio::test]
    async fn test_guard_role_present() {
        let stub = StubIntrospector::new(StatusCode::OK, valid_body());
        let config = OidcConfig {
            guard_role: Some("app:admin".into()),
            ..active_config()
        };
        let authorizer = Authorizer::with_introspector(config, stub);
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&bearer_request("xyz"), &mut response).await;

        match decision {
            Decision::Allow(grant) => {
                assert_eq!(grant.subject.as_deref(), Some("u1"));
                assert_eq!(grant.roles.as_slice(), ["app:admin"]);
            }
            other => panic!("expected allow, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_null_body_is_server_error() {
        let stub = StubIntrospector::new(StatusCode::OK, Value::Null);
        let authorizer = Authorizer::with_introspector(active_config(), stub);
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&bearer_request("xyz"), &mut response).await;

        assert!(matches!(decision, Decision::Deny(Denial::Introspection(_))));
        assert_eq!(response.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(response.body, None);
    }

    #[tokio::test]
    async fn test_numeric_subject_forwarded() {
        let stub = StubIntrospector::new(
            StatusCode::OK,
            json!({
                "active": true,
                "sub": 1234,
                "resource_access": { "app": { "roles": ["admin"] } }
            }),
        );
        let authorizer = Authorizer::with_introspector(active_config(), stub);
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&bearer_request("xyz"), &mut response).await;

        assert!(decision.is_allow());
        assert_eq!(response.header(X_USERNAME), Some("1234"));
    }

    #[tokio::test]
    async fn test_missing_resource_access_is_server_error() {
        let stub = StubIntrospector::new(StatusCode::OK, json!({"active": true, "sub": "u1"}));
        let authorizer = Authorizer::with_introspector(active_config(), stub);
        let mut response = GateResponse::new();

        let decision = authorizer.authorize(&bearer_request("xyz"), &mut response).await;

        assert!(matches!(decision, Decision::Deny(Denial::Introspection(_))));
        assert_eq!(response.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(response.body, None);
    }
}
