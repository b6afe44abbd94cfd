//! HTTP surface: routes, handlers and error mapping.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::de::DeserializeOwned;
use tower_http::compression::CompressionLayer;
use tracing::{debug, error};
use utoipa::OpenApi;

use metrica_core::{Metric, MetricsError, StoreSnapshot};

use crate::middleware::{AccessLogLayer, envelope_middleware, trusted_subnet_middleware};
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Builds the full HTTP application. Request flow, outermost first:
/// compression, access log, trusted subnet, envelope, handler.
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_list))
        .route("/ping", get(handle_ping))
        .route("/update/", post(handle_update_json))
        .route("/update/{kind}/{name}/{value}", post(handle_update_path))
        .route("/updates/", post(handle_updates))
        .route("/value/", post(handle_value_json))
        .route("/value/{kind}/{name}", get(handle_value_path))
        .route("/api-docs/openapi.json", get(handle_openapi))
        .layer(from_fn_with_state(state.clone(), envelope_middleware))
        .layer(from_fn_with_state(state.clone(), trusted_subnet_middleware))
        .with_state(state)
        .layer(AccessLogLayer)
        .layer(CompressionLayer::new())
}

// ============================================================
// Errors
// ============================================================

pub(crate) enum ApiError {
    /// Body could not be decoded into the expected JSON shape.
    BadRequest(String),
    Service(MetricsError),
}

impl From<MetricsError> for ApiError {
    fn from(e: MetricsError) -> Self {
        ApiError::Service(e)
    }
}

pub(crate) fn status_for(e: &MetricsError) -> StatusCode {
    match e {
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        MetricsError::NotFound { .. } => StatusCode::NOT_FOUND,
        MetricsError::Envelope(_) => StatusCode::BAD_REQUEST,
        MetricsError::NotSupported { .. } | MetricsError::PersistenceDisabled => {
            StatusCode::NOT_IMPLEMENTED
        }
        MetricsError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Service(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    error!(error = %e, "request failed");
                } else {
                    debug!(error = %e, "request rejected");
                }
                (status, e.to_string()).into_response()
            }
        }
    }
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}

// ============================================================
// Updates
// ============================================================

#[utoipa::path(
    post,
    path = "/update/{kind}/{name}/{value}",
    params(
        ("kind" = String, Path, description = "gauge or counter"),
        ("name" = String, Path, description = "Metric name"),
        ("value" = String, Path, description = "Gauge value or counter delta")
    ),
    responses(
        (status = 200, description = "Value stored; body is the value now stored", body = String),
        (status = 400, description = "Unknown kind or unparsable value")
    )
)]
pub(crate) async fn handle_update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<String, ApiError> {
    let stored = state.service.set_value(&name, &kind, &value).await?;
    Ok(stored.to_string())
}

#[utoipa::path(
    post,
    path = "/update/",
    request_body = Metric,
    responses(
        (status = 200, description = "Record with the value now stored", body = Metric),
        (status = 400, description = "Invalid record")
    )
)]
pub(crate) async fn handle_update_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let metric: Metric = decode(&body)?;
    Ok(Json(state.service.update(&metric).await?))
}

#[utoipa::path(
    post,
    path = "/updates/",
    request_body = Vec<Metric>,
    responses(
        (status = 200, description = "Batch applied"),
        (status = 400, description = "Invalid record, bad signature or undecodable body")
    )
)]
pub(crate) async fn handle_updates(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let metrics: Vec<Metric> = decode(&body)?;
    state.service.set_batch(&metrics).await?;
    Ok(StatusCode::OK)
}

// ============================================================
// Reads
// ============================================================

#[utoipa::path(
    get,
    path = "/value/{kind}/{name}",
    params(
        ("kind" = String, Path, description = "gauge or counter"),
        ("name" = String, Path, description = "Metric name")
    ),
    responses(
        (status = 200, description = "Current value; JSON record when Accept asks for it", body = String),
        (status = 400, description = "Unknown kind"),
        (status = 404, description = "Metric not found")
    )
)]
pub(crate) async fn handle_value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let value = state.service.get_value(&name, &kind).await?;
    if wants_json(&headers) {
        Ok(Json(Metric::from_value(name, value)).into_response())
    } else {
        Ok(value.to_string().into_response())
    }
}

#[utoipa::path(
    post,
    path = "/value/",
    request_body = Metric,
    responses(
        (status = 200, description = "Record with its current value", body = Metric),
        (status = 404, description = "Metric not found")
    )
)]
pub(crate) async fn handle_value_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let query: Metric = decode(&body)?;
    let value = state.service.get(&query.id, query.kind).await?;
    Ok(Json(Metric::from_value(query.id, value)))
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Every stored metric", body = StoreSnapshot)
    )
)]
pub(crate) async fn handle_list(State(state): State<AppState>) -> Json<StoreSnapshot> {
    Json(state.service.list_all().await)
}

#[utoipa::path(
    get,
    path = "/ping",
    responses(
        (status = 200, description = "Storage backend reachable", body = String),
        (status = 500, description = "Storage backend unavailable")
    )
)]
pub(crate) async fn handle_ping(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.service.ping().await?;
    Ok("ok")
}

pub(crate) async fn handle_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use metrica_core::envelope::{Opener, Sealer, Signer};
    use metrica_core::retry::RetrySchedule;
    use metrica_core::service::MetricsService;
    use metrica_core::storage::MemoryRepository;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn state_with(opener: Opener, subnet: Option<&str>) -> AppState {
        let service = MetricsService::new(
            Arc::new(MemoryRepository::new()),
            RetrySchedule::once(),
            CancellationToken::new(),
        );
        AppState::new(
            Arc::new(service),
            opener,
            subnet.map(|s| s.parse().unwrap()),
        )
    }

    fn app() -> Router {
        router(state_with(Opener::new(), None))
    }

    fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_counter_accumulates() {
        let app = app();
        let (status, _, body) = send(&app, post("/update/counter/x/10", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "10");

        let (_, _, body) = send(&app, post("/update/counter/x/15", Body::empty())).await;
        assert_eq!(body, "25");

        let (status, _, body) = send(&app, get("/value/counter/x")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "25");
    }

    #[tokio::test]
    async fn test_gauge_overwrites_and_json_accept() {
        let app = app();
        send(&app, post("/update/gauge/g/1.5", Body::empty())).await;
        send(&app, post("/update/gauge/g/-3.2", Body::empty())).await;

        let req = Request::builder()
            .uri("/value/gauge/g")
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let metric: Metric = serde_json::from_str(&body).unwrap();
        assert_eq!(metric, Metric::gauge("g", -3.2));
    }

    #[tokio::test]
    async fn test_path_update_errors() {
        let app = app();
        let (status, _, _) = send(&app, post("/update/bogus/n/1", Body::empty())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&app, post("/update/counter/n/1.5", Body::empty())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&app, post("/update/gauge/n", Body::empty())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Nothing was stored by the rejected writes.
        let (_, _, body) = send(&app, get("/")).await;
        let snapshot: StoreSnapshot = serde_json::from_str(&body).unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_value_not_found() {
        let (status, _, _) = send(&app(), get("/value/gauge/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_json_update_and_value() {
        let app = app();
        let (status, _, body) = send(
            &app,
            post("/update/", r#"{"id":"PollCount","type":"counter","delta":4}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let stored: Metric = serde_json::from_str(&body).unwrap();
        assert_eq!(stored, Metric::counter("PollCount", 4));

        let (status, _, body) =
            send(&app, post("/value/", r#"{"id":"PollCount","type":"counter"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let value: Metric = serde_json::from_str(&body).unwrap();
        assert_eq!(value.delta, Some(4));

        let (status, _, _) =
            send(&app, post("/update/", r#"{"id":"x","type":"bogus","value":1}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&app, post("/update/", r#"{"id":"x","type":"gauge"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_signed_gzip_batch() {
        let app = router(state_with(
            Opener::new().with_signer(Signer::new(b"secret")),
            None,
        ));
        let payload = br#"[{"id":"Load1","type":"gauge","value":0.5},{"id":"PollCount","type":"counter","delta":5}]"#;
        let envelope = Sealer::new()
            .with_signer(Signer::new(b"secret"))
            .seal(payload)
            .unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/updates/")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_ENCODING, "gzip")
            .header("HashSHA256", envelope.signature.clone().unwrap())
            .body(Body::from(envelope.body.clone()))
            .unwrap();
        let (status, headers, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get("HashSHA256").unwrap().to_str().unwrap(),
            Signer::new(b"secret").sign(body.as_bytes())
        );

        let (_, _, body) = send(&app, get("/")).await;
        let snapshot: StoreSnapshot = serde_json::from_str(&body).unwrap();
        assert_eq!(snapshot.gauges.get("Load1"), Some(&0.5));
        assert_eq!(snapshot.counters.get("PollCount"), Some(&5));
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let app = router(state_with(
            Opener::new().with_signer(Signer::new(b"secret")),
            None,
        ));
        let envelope = Sealer::new()
            .with_signer(Signer::new(b"other"))
            .seal(br#"[{"id":"x","type":"counter","delta":1}]"#)
            .unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/updates/")
            .header(header::CONTENT_ENCODING, "gzip")
            .header("HashSHA256", envelope.signature.unwrap())
            .body(Body::from(envelope.body))
            .unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, _, body) = send(&app, get("/")).await;
        let snapshot: StoreSnapshot = serde_json::from_str(&body).unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_unsigned_gzip_batch_without_key() {
        let app = app();
        let envelope = Sealer::new()
            .seal(br#"[{"id":"x","type":"counter","delta":2}]"#)
            .unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/updates/")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from(envelope.body))
            .unwrap();
        let (status, headers, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get("HashSHA256").is_none());
    }

    #[tokio::test]
    async fn test_batch_validation_is_all_or_nothing() {
        let app = app();
        let (status, _, _) = send(
            &app,
            post(
                "/updates/",
                r#"[{"id":"a","type":"counter","delta":1},{"id":"","type":"gauge","value":1}]"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&app, get("/value/counter/a")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_trusted_subnet() {
        let app = router(state_with(Opener::new(), Some("10.0.0.0/8")));

        let (status, _, _) = send(&app, post("/update/counter/x/1", Body::empty())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let req = Request::builder()
            .method("POST")
            .uri("/update/counter/x/1")
            .header("X-Real-IP", "192.168.0.1")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let req = Request::builder()
            .method("POST")
            .uri("/update/counter/x/1")
            .header("X-Real-IP", "10.2.3.4")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ping_and_openapi() {
        let app = app();
        let (status, _, body) = send(&app, get("/ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, _, body) = send(&app, get("/api-docs/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("/updates/"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&MetricsError::UnknownKind("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&MetricsError::PersistenceDisabled),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            status_for(&MetricsError::Backend("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
