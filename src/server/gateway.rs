//! Gateway HTTP server
//!
//! Accepts client connections, matches each request to a protected backend by
//! path prefix, runs the dispatch shim and either forwards the request to the
//! backend or answers with the gate's deny response.
//!
//! # Example
//!
//! ```no_run
//! use oidc_gate::config::Config;
//! use oidc_gate::server::gateway::GatewayServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let server = GatewayServer::new(config).await?;
//! println!("Gateway bound to: {:?}", server.local_addr()?);
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use super::forward::{apply_gate_headers, full_body, GatewayBody, UpstreamForwarder};
use crate::config::{Config, RouteConfig};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::gate::{Authorizer, GateRequest, GateResponse};
use crate::metrics;
use crate::server::ServerError;
use bytes::Bytes;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// State shared by every connection
struct Gateway {
    routes: Vec<RouteConfig>,
    dispatcher: Dispatcher,
    forwarder: UpstreamForwarder,
}

/// Gateway server
///
/// Binds on construction so the actual address is known before `run`.
pub struct GatewayServer {
    gateway: Arc<Gateway>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl GatewayServer {
    /// Bind to the configured address and prepare the decision engine
    ///
    /// If port 0 is specified, the OS will assign an available port.
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        if config.oidc.active && !config.oidc.is_complete() {
            warn!("OIDC is active but not fully configured; protected requests will fail with 500");
        }

        let authorizer = Authorizer::new(config.oidc.clone())
            .map_err(|e| ServerError::RuntimeError(format!("Failed to build OIDC client: {}", e)))?;
        let forwarder = UpstreamForwarder::new().map_err(|e| {
            ServerError::RuntimeError(format!("Failed to build upstream client: {}", e))
        })?;

        info!("Gateway bound to {}", local_addr);

        Ok(Self {
            gateway: Arc::new(Gateway {
                routes: config.routes,
                dispatcher: Dispatcher::new(authorizer),
                forwarder,
            }),
            listener,
            local_addr,
        })
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.local_addr)
    }

    /// Accept connections until the process stops.
    ///
    /// Each connection is served on its own task; connection errors are logged
    /// and do not stop the accept loop. A client that disconnects mid-request
    /// drops the request future, which cancels any pending introspection call.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Starting gateway on {}", self.local_addr);

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let gateway = Arc::clone(&self.gateway);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move { handle_request(req, gateway).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Find the route whose prefix matches the request path
///
/// Matches on prefix boundaries and prefers the longest prefix, so `/odata2`
/// does not match a route for `/odata`.
fn find_route_for_path<'a>(routes: &'a [RouteConfig], path: &str) -> Option<&'a RouteConfig> {
    routes
        .iter()
        .filter(|route| {
            let prefix = route.path_prefix.trim_end_matches('/');
            match path.strip_prefix(prefix) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            }
        })
        .max_by_key(|route| route.path_prefix.len())
}

/// Build the engine's view of the request headers
fn build_gate_request<B>(req: &Request<B>) -> GateRequest {
    let mut headers = HashMap::new();
    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_string(), v.to_string());
        }
    }
    GateRequest { headers }
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<Gateway>,
) -> Result<Response<GatewayBody>, Infallible> {
    let span = info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        method = %req.method(),
        path = %req.uri().path(),
    );
    Ok(route_request(req, gateway).instrument(span).await)
}

async fn route_request(req: Request<Incoming>, gateway: Arc<Gateway>) -> Response<GatewayBody> {
    let path = req.uri().path().to_string();

    if path == "/health" && req.method() == Method::GET {
        return text_response(StatusCode::OK, "ok");
    }

    let route = match find_route_for_path(&gateway.routes, &path) {
        Some(route) => route,
        None => {
            info!("No route configured for path: {}", path);
            return text_response(StatusCode::NOT_FOUND, "Not Found");
        }
    };

    let gate_request = build_gate_request(&req);

    match gateway.dispatcher.dispatch(&gate_request, route.backend).await {
        DispatchOutcome::Respond(response) => deny_response(&response),
        DispatchOutcome::Redirect { route: backend, response } => {
            match gateway.forwarder.forward(&route.upstream, req, &response).await {
                Ok(upstream_response) => upstream_response,
                Err(e) => {
                    error!("Forwarding to {} failed: {}", backend.location(), e);
                    metrics::record_upstream_error(backend.name());
                    text_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
                }
            }
        }
    }
}

/// Render the terminal response written by the engine
fn deny_response(gate: &GateResponse) -> Response<GatewayBody> {
    let status = gate.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = gate.body.clone().unwrap_or_default();
    let mut response = text_response(status, body);
    apply_gate_headers(response.headers_mut(), gate);
    response
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<GatewayBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    response
}
