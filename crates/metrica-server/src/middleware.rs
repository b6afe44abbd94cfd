//! Request middleware: access log, trusted subnet, envelope open/sign.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{error, info, warn};

use crate::state::AppState;

pub(crate) const SIGNATURE: HeaderName = HeaderName::from_static("hashsha256");
pub(crate) const REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Upper bound on a request body read into memory.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

// ============================================================
// Access log layer (tower Layer + Service)
// ============================================================

#[derive(Clone)]
pub(crate) struct AccessLogLayer;

impl<S> tower::Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

#[derive(Clone)]
pub(crate) struct AccessLogService<S> {
    inner: S,
}

impl<S> tower::Service<Request> for AccessLogService<S>
where
    S: tower::Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let client = req
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "-".to_owned());
        let t0 = Instant::now();

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.call(req).await?;
            let latency_ms = t0.elapsed().as_millis() as u64;
            let status = response.status().as_u16();
            info!(client, status, latency_ms, "{method} {path}");
            Ok(response)
        })
    }
}

// ============================================================
// Trusted subnet
// ============================================================

/// Rejects requests whose `X-Real-IP` is missing or outside the trusted
/// subnet. A no-op when no subnet is configured.
pub(crate) async fn trusted_subnet_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(subnet) = &state.trusted_subnet {
        let real_ip = req.headers().get(&REAL_IP).and_then(|v| v.to_str().ok());
        if !subnet.allows(real_ip) {
            warn!(
                path = %req.uri().path(),
                real_ip = real_ip.unwrap_or("-"),
                %subnet,
                "request from untrusted address"
            );
            return (StatusCode::FORBIDDEN, "client address is not trusted").into_response();
        }
    }
    next.run(req).await
}

// ============================================================
// Envelope
// ============================================================

/// Opens POST bodies (signature check, decryption, gunzip) before the
/// handler sees them, and signs the response body when a key is set.
pub(crate) async fn envelope_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, mut body) = req.into_parts();

    if parts.method == Method::POST {
        let gzipped = parts
            .headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));

        if gzipped || !state.opener.is_passthrough() {
            let path = parts.uri.path().to_owned();
            let raw = match to_bytes(body, MAX_BODY_BYTES).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(path, error = %e, "failed to read request body");
                    return (StatusCode::BAD_REQUEST, "unreadable request body").into_response();
                }
            };
            let signature = parts
                .headers
                .get(&SIGNATURE)
                .and_then(|v| v.to_str().ok());

            match state.opener.open(&raw, signature, gzipped) {
                Ok(plain) => body = Body::from(plain),
                Err(e) => {
                    warn!(path, error = %e, "request body rejected");
                    return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
                }
            }
            parts.headers.remove(header::CONTENT_ENCODING);
            parts.headers.remove(header::CONTENT_LENGTH);
        }
    }

    let response = next.run(Request::from_parts(parts, body)).await;
    if state.opener.signer().is_none() {
        return response;
    }
    sign_response(&state, response).await
}

async fn sign_response(state: &AppState, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Some(signature) = state.opener.sign(&bytes)
        && let Ok(value) = HeaderValue::from_str(&signature)
    {
        parts.headers.insert(SIGNATURE, value);
    }
    Response::from_parts(parts, Body::from(bytes))
}
