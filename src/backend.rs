use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tower_http::services::{ServeDir, ServeFile};
use url::Url;

use crate::logging::{log_event, set_min_level, LogLevel};
use crate::vitals::{VitalsEvent, VitalsValidationError, VITALS_ENDPOINT};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_VITALS_MAX_BODY_BYTES: usize = 16 * 1024;
const DEFAULT_ANALYTICS_FORWARD_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_STATIC_DIR: &str = "dist";
const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Info;

const VITALS_MAX_BODY_BYTES_BOUNDS: (usize, usize) = (512, 256 * 1024);
const ANALYTICS_FORWARD_TIMEOUT_MS_BOUNDS: (u64, u64) = (100, 30_000);
const USER_AGENT: &str = "motion-starter-vitals/1.0";
const REQUEST_ID_HEADER: &str = "x-request-id";

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Debug)]
struct VitalsRuntimeConfig {
    port: u16,
    max_body_bytes: usize,
    forward_url: Option<Url>,
    forward_timeout: Duration,
    static_dir: PathBuf,
    log_level: LogLevel,
}

impl VitalsRuntimeConfig {
    fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let port = read("PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let max_body_bytes = read("VITALS_MAX_BODY_BYTES")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| {
                (VITALS_MAX_BODY_BYTES_BOUNDS.0..=VITALS_MAX_BODY_BYTES_BOUNDS.1).contains(value)
            })
            .unwrap_or(DEFAULT_VITALS_MAX_BODY_BYTES);
        let forward_timeout_ms = read("ANALYTICS_FORWARD_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| {
                (ANALYTICS_FORWARD_TIMEOUT_MS_BOUNDS.0..=ANALYTICS_FORWARD_TIMEOUT_MS_BOUNDS.1)
                    .contains(value)
            })
            .unwrap_or(DEFAULT_ANALYTICS_FORWARD_TIMEOUT_MS);
        let forward_url = read("ANALYTICS_FORWARD_URL")
            .and_then(|value| Url::parse(&value).ok())
            .filter(|url| url.scheme() == "http" || url.scheme() == "https");
        let static_dir = read("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR));
        let log_level = read("LOG_LEVEL")
            .and_then(|value| LogLevel::parse(&value))
            .unwrap_or(DEFAULT_LOG_LEVEL);

        Self {
            port,
            max_body_bytes,
            forward_url,
            forward_timeout: Duration::from_millis(forward_timeout_ms),
            static_dir,
            log_level,
        }
    }
}

#[derive(Clone)]
struct Forwarder {
    client: reqwest::Client,
    url: Url,
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<VitalsRuntimeConfig>,
    forwarder: Option<Forwarder>,
    accepted: Arc<AtomicU64>,
}

impl AppState {
    fn new(config: VitalsRuntimeConfig) -> Result<Self, reqwest::Error> {
        let forwarder = match config.forward_url.clone() {
            Some(url) => Some(Forwarder {
                client: reqwest::Client::builder()
                    .timeout(config.forward_timeout)
                    .user_agent(USER_AGENT)
                    .build()?,
                url,
            }),
            None => None,
        };

        Ok(Self {
            config: Arc::new(config),
            forwarder,
            accepted: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[derive(Serialize)]
struct IngestResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Error)]
enum IngestError {
    #[error("malformed vitals payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] VitalsValidationError),
}

impl IngestError {
    fn class(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_payload",
            Self::Invalid(_) => "invalid_event",
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = VitalsRuntimeConfig::from_env();
    set_min_level(config.log_level);

    let port = config.port;
    let bind_address = format!("0.0.0.0:{port}");
    let state = AppState::new(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    log_event(
        LogLevel::Info,
        "server_listening",
        serde_json::json!({ "url": format!("http://127.0.0.1:{port}") }),
    );
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();
    let static_service =
        ServeDir::new(&static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));

    Router::new()
        .route(VITALS_ENDPOINT, post(ingest_vitals))
        .route("/api/health", get(health))
        .fallback_service(static_service)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(IngestResponse {
        ok: true,
        error: None,
    })
}

async fn ingest_vitals(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let request_started_at = Instant::now();
    let request_id = resolve_request_id(&headers);

    let event = match parse_vitals_event(&body) {
        Ok(event) => event,
        Err(error) => {
            log_event(
                LogLevel::Info,
                "vitals_rejected",
                serde_json::json!({
                    "request_id": request_id.as_str(),
                    "error_class": error.class(),
                    "message": error.to_string(),
                    "body_bytes": body.len(),
                }),
            );
            return ingest_response(
                StatusCode::BAD_REQUEST,
                IngestResponse {
                    ok: false,
                    error: Some(error.to_string()),
                },
                &request_id,
            );
        }
    };

    let accepted = state.accepted.fetch_add(1, Ordering::Relaxed) + 1;
    log_event(
        LogLevel::Info,
        "vitals_received",
        serde_json::json!({
            "request_id": request_id.as_str(),
            "metric": event.metric.name.as_str(),
            "value": event.metric.value,
            "rating": event.metric.rating.as_str(),
            "metric_id": event.metric.id.as_str(),
            "path": event.page.path.as_str(),
            "viewport": event.page.viewport.as_str(),
            "accepted_total": accepted,
            "duration_ms": request_started_at.elapsed().as_millis(),
        }),
    );

    if let Some(forwarder) = state.forwarder.clone() {
        tokio::spawn(forward_event(forwarder, event, request_id.clone()));
    }

    ingest_response(
        StatusCode::ACCEPTED,
        IngestResponse {
            ok: true,
            error: None,
        },
        &request_id,
    )
}

fn parse_vitals_event(body: &[u8]) -> Result<VitalsEvent, IngestError> {
    let event: VitalsEvent = serde_json::from_slice(body)?;
    event.validate()?;
    Ok(event)
}

async fn forward_event(forwarder: Forwarder, event: VitalsEvent, request_id: String) {
    let started_at = Instant::now();
    let result = forwarder
        .client
        .post(forwarder.url.clone())
        .header(REQUEST_ID_HEADER, request_id.as_str())
        .json(&event)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => log_event(
            LogLevel::Debug,
            "vitals_forwarded",
            serde_json::json!({
                "request_id": request_id.as_str(),
                "status": response.status().as_u16(),
                "duration_ms": started_at.elapsed().as_millis(),
            }),
        ),
        Ok(response) => log_event(
            LogLevel::Warn,
            "vitals_forward_failed",
            serde_json::json!({
                "request_id": request_id.as_str(),
                "error_class": "upstream_status",
                "status": response.status().as_u16(),
            }),
        ),
        Err(error) => {
            let error_class = if error.is_timeout() { "timeout" } else { "transport" };
            log_event(
                LogLevel::Warn,
                "vitals_forward_failed",
                serde_json::json!({
                    "request_id": request_id.as_str(),
                    "error_class": error_class,
                    "message": error.to_string(),
                }),
            );
        }
    }
}

fn ingest_response(
    status: StatusCode,
    payload: IngestResponse,
    request_id: &str,
) -> axum::response::Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Ok(request_id_header) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, request_id_header);
    }
    (status, headers, Json(payload)).into_response()
}

fn now_unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_millis())
        .unwrap_or(0)
}

fn generate_request_id() -> String {
    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("req-{}-{counter}", now_unix_millis())
}

fn resolve_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|raw| raw.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(generate_request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_state() -> AppState {
        AppState::new(VitalsRuntimeConfig::from_lookup(|_| None)).expect("state builds")
    }

    fn lcp_body(path: &str, value: f64) -> Bytes {
        Bytes::from(
            serde_json::json!({
                "metric": {
                    "name": "LCP",
                    "value": value,
                    "rating": "good",
                    "id": "v1-1700000000000-1",
                },
                "page": { "path": path, "viewport": "desktop" },
            })
            .to_string(),
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body reads");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[test]
    fn config_defaults_when_env_is_empty() {
        let config = VitalsRuntimeConfig::from_lookup(|_| None);

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_body_bytes, DEFAULT_VITALS_MAX_BODY_BYTES);
        assert_eq!(
            config.forward_timeout,
            Duration::from_millis(DEFAULT_ANALYTICS_FORWARD_TIMEOUT_MS)
        );
        assert!(config.forward_url.is_none());
        assert_eq!(config.static_dir, PathBuf::from(DEFAULT_STATIC_DIR));
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn config_rejects_out_of_bounds_and_non_http_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9090"),
            ("VITALS_MAX_BODY_BYTES", "10"),
            ("ANALYTICS_FORWARD_TIMEOUT_MS", " 750 "),
            ("ANALYTICS_FORWARD_URL", "ftp://collector.example/ingest"),
            ("STATIC_DIR", "public"),
            ("LOG_LEVEL", "debug"),
        ]);
        let config =
            VitalsRuntimeConfig::from_lookup(|name| env.get(name).map(|value| value.to_string()));

        assert_eq!(config.port, 9090);
        assert_eq!(config.max_body_bytes, DEFAULT_VITALS_MAX_BODY_BYTES);
        assert_eq!(config.forward_timeout, Duration::from_millis(750));
        assert!(config.forward_url.is_none());
        assert_eq!(config.static_dir, PathBuf::from("public"));
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn request_id_prefers_the_incoming_header() {
        let mut headers = HeaderMap::new();
        assert!(resolve_request_id(&headers).starts_with("req-"));

        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(" edge-42 "));
        assert_eq!(resolve_request_id(&headers), "edge-42");
    }

    #[tokio::test]
    async fn valid_event_is_accepted() {
        let state = test_state();
        let response =
            ingest_vitals(State(state.clone()), HeaderMap::new(), lcp_body("/work", 1_850.0)).await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert_eq!(state.accepted.load(Ordering::Relaxed), 1);
        assert_eq!(body_json(response).await, serde_json::json!({ "ok": true }));
    }

    #[tokio::test]
    async fn beacon_bodies_sent_as_plain_text_are_accepted() {
        let state = test_state();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain;charset=UTF-8"),
        );

        let response = ingest_vitals(State(state.clone()), headers, lcp_body("/", 2_100.0)).await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(state.accepted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let state = test_state();
        let response = ingest_vitals(
            State(state.clone()),
            HeaderMap::new(),
            Bytes::from_static(b"{\"metric\": 1}"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.accepted.load(Ordering::Relaxed), 0);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn unknown_metric_and_bad_path_are_rejected() {
        let state = test_state();

        let unknown = Bytes::from(
            serde_json::json!({
                "metric": { "name": "FID", "value": 3.0, "rating": "good", "id": "x" },
                "page": { "path": "/" },
            })
            .to_string(),
        );
        let response = ingest_vitals(State(state.clone()), HeaderMap::new(), unknown).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response =
            ingest_vitals(State(state.clone()), HeaderMap::new(), lcp_body("work", 10.0)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            VitalsValidationError::InvalidPath.to_string()
        );
    }

    #[test]
    fn forwarder_is_built_only_for_http_targets() {
        let state = AppState::new(VitalsRuntimeConfig::from_lookup(|name| {
            (name == "ANALYTICS_FORWARD_URL").then(|| "https://collector.example/v1".to_string())
        }))
        .expect("state builds");

        let forwarder = state.forwarder.expect("forwarder configured");
        assert_eq!(forwarder.url.as_str(), "https://collector.example/v1");
    }
}
