//! Upstream forwarding
//!
//! Performs the redirect of an allowed request: the request is replayed
//! against the backend's upstream URL with the gate headers attached, and the
//! backend's answer is relayed to the client. Bodies are streamed in both
//! directions and never buffered whole.

use crate::gate::{GateResponse, X_ROLES, X_USERNAME};
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response};
use thiserror::Error;
use tracing::warn;

/// Boxed error carried by streamed bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of every gateway response
pub type GatewayBody = UnsyncBoxBody<Bytes, BoxError>;

/// Wrap a complete in-memory body
pub fn full_body(bytes: impl Into<Bytes>) -> GatewayBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Forwarding errors
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Client side of the redirect to a backend
#[derive(Clone)]
pub struct UpstreamForwarder {
    client: reqwest::Client,
}

impl UpstreamForwarder {
    /// Create a forwarder. Backend redirects are relayed to the client, not followed.
    pub fn new() -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    /// Send `req` to `upstream`, keeping its method, path, query, body and
    /// end-to-end headers, and return the backend's response.
    ///
    /// The response is returned as soon as the backend's headers arrive; its
    /// body is relayed chunk by chunk.
    pub async fn forward<B>(
        &self,
        upstream: &str,
        req: Request<B>,
        gate: &GateResponse,
    ) -> Result<Response<GatewayBody>, ForwardError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let url = upstream_url(upstream, parts.uri.path_and_query().map(|p| p.as_str()));

        let mut headers = HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if is_forwardable(name) && *name != header::HOST && !is_identity_header(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        apply_gate_headers(&mut headers, gate);

        let mut request = self.client.request(parts.method, url).headers(headers);
        if body.size_hint().exact() != Some(0) {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream_response = request.send().await?;

        let status = upstream_response.status();
        let upstream_headers = upstream_response.headers().clone();
        let stream = upstream_response
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(BoxError::from);

        let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
        *response.status_mut() = status;
        for (name, value) in upstream_headers.iter() {
            if is_forwardable(name) {
                response.headers_mut().append(name.clone(), value.clone());
            }
        }
        apply_gate_headers(response.headers_mut(), gate);

        Ok(response)
    }
}

/// Join the upstream base URL with the inbound path and query
fn upstream_url(upstream: &str, path_and_query: Option<&str>) -> String {
    format!(
        "{}{}",
        upstream.trim_end_matches('/'),
        path_and_query.unwrap_or("/")
    )
}

/// Headers describing a single connection are never forwarded
fn is_forwardable(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Identity headers only ever come from the engine, never from the client
fn is_identity_header(name: &HeaderName) -> bool {
    name.as_str().eq_ignore_ascii_case(X_USERNAME) || name.as_str().eq_ignore_ascii_case(X_ROLES)
}

/// Copy the headers written by the engine, replacing existing values.
///
/// Values that are not valid HTTP header text are dropped with a warning.
pub(crate) fn apply_gate_headers(target: &mut HeaderMap, gate: &GateResponse) {
    for (name, value) in &gate.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                target.insert(name, value);
            }
            _ => warn!("Dropping invalid header {}", name),
        }
    }
}
