//! Route dispatch
//!
//! Entry points for the two protected backends. Each one runs the decision
//! engine when authorization is active and tells the caller whether to redirect
//! the request to the backend or to answer it with the engine's response.

use crate::gate::{Authorizer, Decision, GateRequest, GateResponse};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Protected backends the gate can redirect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRoute {
    Odpapi,
    Download,
}

impl BackendRoute {
    pub fn name(&self) -> &'static str {
        match self {
            BackendRoute::Odpapi => "odpapi",
            BackendRoute::Download => "download",
        }
    }

    /// Named location of the backend, as referenced by the redirect
    pub fn location(&self) -> &'static str {
        match self {
            BackendRoute::Odpapi => "@odpapi-backend",
            BackendRoute::Download => "@download-backend",
        }
    }

    pub fn default_path_prefix(&self) -> &'static str {
        match self {
            BackendRoute::Odpapi => "/odata",
            BackendRoute::Download => "/download",
        }
    }
}

impl fmt::Display for BackendRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the router should do with the request
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Hand the request to `route`, attaching the headers in `response`
    Redirect {
        route: BackendRoute,
        response: GateResponse,
    },
    /// Answer with `response` as-is; the request never reaches a backend
    Respond(GateResponse),
}

impl DispatchOutcome {
    pub fn is_redirect(&self) -> bool {
        matches!(self, DispatchOutcome::Redirect { .. })
    }
}

/// Dispatch shim in front of the decision engine
#[derive(Clone)]
pub struct Dispatcher {
    authorizer: Authorizer,
}

impl Dispatcher {
    pub fn new(authorizer: Authorizer) -> Self {
        Self { authorizer }
    }

    /// Gate a request bound for the OData API backend
    pub async fn authorize_odpapi(&self, request: &GateRequest) -> DispatchOutcome {
        self.dispatch(request, BackendRoute::Odpapi).await
    }

    /// Gate a request bound for the download backend
    pub async fn authorize_download(&self, request: &GateRequest) -> DispatchOutcome {
        self.dispatch(request, BackendRoute::Download).await
    }

    /// Gate a request bound for `route`.
    ///
    /// With authorization switched off the request is treated as already
    /// authorized and the engine is not consulted.
    pub async fn dispatch(&self, request: &GateRequest, route: BackendRoute) -> DispatchOutcome {
        let mut response = GateResponse::new();

        if !self.authorizer.config().active {
            debug!(backend = %route, "OIDC inactive, redirecting without authorization");
            metrics::record_decision(route.name(), "bypass");
            return DispatchOutcome::Redirect { route, response };
        }

        match self.authorizer.authorize(request, &mut response).await {
            Decision::Allow(grant) => {
                info!(
                    backend = %route,
                    subject = grant.subject.as_deref().unwrap_or_default(),
                    "Redirecting to {}",
                    route.location()
                );
                metrics::record_decision(route.name(), "allow");
                DispatchOutcome::Redirect { route, response }
            }
            Decision::Deny(denial) => {
                metrics::record_decision(route.name(), denial.reason());
                DispatchOutcome::Respond(response)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OidcConfig;
    use crate::gate::{IntrospectionError, IntrospectionResponse, Introspector};
    use async_trait::async_trait;
    use hyper::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Introspector that must not be reached
    #[derive(Default)]
    struct CountingIntrospector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Introspector for CountingIntrospector {
        async fn introspect(
            &self,
            _token: &str,
        ) -> Result<IntrospectionResponse, IntrospectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(IntrospectionError::Malformed("unreachable in this test".into()))
        }
    }

    #[test]
    fn test_backend_route_names() {
        assert_eq!(BackendRoute::Odpapi.location(), "@odpapi-backend");
        assert_eq!(BackendRoute::Download.location(), "@download-backend");
        assert_eq!(BackendRoute::Download.to_string(), "download");
    }

    #[tokio::test]
    async fn test_inactive_always_redirects() {
        let introspector = Arc::new(CountingIntrospector::default());
        let authorizer =
            Authorizer::with_introspector(OidcConfig::default(), introspector.clone());
        let dispatcher = Dispatcher::new(authorizer);

        let outcome = dispatcher.authorize_odpapi(&GateRequest::new()).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Redirect {
                route: BackendRoute::Odpapi,
                response: GateResponse::new()
            }
        );

        let request = GateRequest::new().with_header("Authorization", "garbage");
        assert!(dispatcher.authorize_download(&request).await.is_redirect());
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deny_is_not_redirected() {
        let introspector = Arc::new(CountingIntrospector::default());
        let config = OidcConfig {
            active: true,
            root_url: "http://kc".into(),
            realm: "esa".into(),
            client_id: "gate".into(),
            client_secret: "secret".into(),
            ..Default::default()
        };
        let dispatcher =
            Dispatcher::new(Authorizer::with_introspector(config, introspector.clone()));

        let outcome = dispatcher.authorize_download(&GateRequest::new()).await;
        match outcome {
            DispatchOutcome::Respond(response) => {
                assert_eq!(response.status, Some(StatusCode::UNAUTHORIZED));
            }
            other => panic!("expected deny, got {:?}", other),
        }

        let request = GateRequest::new().with_header("Authorization", "Bearer xyz");
        let outcome = dispatcher.authorize_odpapi(&request).await;
        assert!(!outcome.is_redirect());
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 1);
    }
}
