//! HTTP query API over the telemetry store.
//!
//! Serves the read surface consumed by dashboards and exporters, plus the
//! crypto convenience endpoints (`/send`, `/receive`) used by producers and
//! by operators debugging a deployment. The API only ever reads the store;
//! ingestion owns all writes through its own connection.
//!
//! A storage failure on a read route is reported as `503
//! storage_unavailable`, which callers must distinguish from a `200` with an
//! empty result.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::codec::Codec;
use crate::error::Result;
use crate::query::{
    aggregate, clamp_limit, csv_snapshot, EXPORT_DEFAULT_LIMIT, EXPORT_MAX_LIMIT,
    HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT, STATS_DEFAULT_CAP, STATS_MAX_CAP,
};
use crate::reading::{epoch_now, Row};
use crate::storage::{Store, Window};

/// Shared state for the API handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Reader connection to the telemetry store.
    store: Arc<Mutex<Store>>,
    /// Codec for the crypto endpoints.
    codec: Arc<Codec>,
}

impl AppState {
    /// Create API state around a reader store and a codec.
    #[must_use]
    pub fn new(store: Store, codec: Codec) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            codec: Arc::new(codec),
        }
    }
}

/// Free-form query parameters accepted by the read routes.
///
/// Both fields stay strings end to end: invalid values fall back to defaults
/// rather than surfacing as errors.
#[derive(Debug, Default, Deserialize)]
struct ReadParams {
    /// Window selector in minutes.
    minutes: Option<String>,
    /// Row limit or aggregation cap.
    limit: Option<String>,
}

/// Error responses produced by the API handlers.
#[derive(Debug)]
enum ApiError {
    /// The request body or parameters were unusable.
    BadRequest(&'static str),
    /// The store could not be queried.
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "storage_unavailable" })),
            )
                .into_response(),
        }
    }
}

impl From<crate::error::Error> for ApiError {
    fn from(err: crate::error::Error) -> Self {
        error!(error = %err, "Query-path storage failure");
        Self::Unavailable
    }
}

/// Build the API router.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/last", get(last))
        .route("/history", get(history))
        .route("/stats", get(stats))
        .route("/export", get(export))
        .route("/send", post(send))
        .route("/receive", post(receive))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve the API until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(addr: &str, state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Query API listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    info!("Query API stopped");
    Ok(())
}

/// Render a stored row for API output, re-parsing the raw plaintext.
fn row_to_json(row: &Row) -> Value {
    json!({
        "msg_id": row.msg_id,
        "ts": row.ts,
        "altitude": row.altitude,
        "speed": row.speed,
        "battery": row.battery,
        "lat": row.lat,
        "lon": row.lon,
        "raw": serde_json::from_str::<Value>(&row.raw).unwrap_or(Value::Null),
        "inserted_at": row.inserted_at,
    })
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn last(
    State(state): State<AppState>,
    Query(params): Query<ReadParams>,
) -> std::result::Result<Json<Value>, ApiError> {
    let window = Window::parse(params.minutes.as_deref());
    let store = state.store.lock().await;
    let row = store.latest(window, epoch_now())?;

    match row {
        Some(row) => Ok(Json(row_to_json(&row))),
        None => Ok(Json(json!({ "status": "empty" }))),
    }
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<ReadParams>,
) -> std::result::Result<Json<Value>, ApiError> {
    let window = Window::parse(params.minutes.as_deref());
    let limit = clamp_limit(params.limit.as_deref(), HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT);

    let store = state.store.lock().await;
    let rows = store.range(window, limit, epoch_now())?;

    let items: Vec<Value> = rows.iter().map(row_to_json).collect();
    Ok(Json(json!({ "count": items.len(), "items": items })))
}

async fn stats(
    State(state): State<AppState>,
    Query(params): Query<ReadParams>,
) -> std::result::Result<Json<Value>, ApiError> {
    let window = Window::parse(params.minutes.as_deref());
    let cap = clamp_limit(params.limit.as_deref(), STATS_DEFAULT_CAP, STATS_MAX_CAP);

    let now = epoch_now();
    let store = state.store.lock().await;
    let rows = store.range(window, cap, now)?;

    if rows.is_empty() {
        return Ok(Json(json!({ "count": 0, "message": "no data" })));
    }

    let agg = aggregate(&rows, now);
    Ok(Json(serde_json::to_value(agg).map_err(crate::error::Error::from)?))
}

async fn export(
    State(state): State<AppState>,
    Query(params): Query<ReadParams>,
) -> std::result::Result<Response, ApiError> {
    let window = Window::parse(params.minutes.as_deref());
    let limit = clamp_limit(params.limit.as_deref(), EXPORT_DEFAULT_LIMIT, EXPORT_MAX_LIMIT);

    let store = state.store.lock().await;
    let rows = store.range(window, limit, epoch_now())?;
    drop(store);

    let csv = csv_snapshot(&rows);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=telemetry.csv",
            ),
        ],
        csv,
    )
        .into_response())
}

/// Generate a sample telemetry payload for `/send` calls without a body.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn sample_telemetry() -> Value {
    let now = epoch_now();
    json!({
        "msg_id": Uuid::new_v4().simple().to_string(),
        "ts": now,
        "altitude": 120.0 + (now as i64 % 10) as f64,
        "speed": 40.0 + (now as i64 % 5) as f64,
        "battery": 90.0 - (now as i64 % 20) as f64,
        "location": { "lat": 12.9716, "lon": 77.5946 },
    })
}

async fn send(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> std::result::Result<Json<Value>, ApiError> {
    let payload = match body {
        Some(Json(value)) => match value.get("data") {
            Some(data) => data.clone(),
            None => value,
        },
        None => sample_telemetry(),
    };

    // A bare string encrypts as-is; anything else is serialized to JSON.
    let plaintext = match &payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let envelope = state
        .codec
        .encrypt(plaintext.as_bytes())
        .map_err(|_| ApiError::BadRequest("encryption failed"))?;

    Ok(Json(json!({ "encrypted": URL_SAFE.encode(envelope) })))
}

async fn receive(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> std::result::Result<Json<Value>, ApiError> {
    let encrypted = body
        .as_ref()
        .and_then(|Json(value)| value.get("encrypted"))
        .and_then(Value::as_str)
        .ok_or(ApiError::BadRequest("expected JSON with key 'encrypted'"))?;

    let envelope = URL_SAFE
        .decode(encrypted)
        .map_err(|_| ApiError::BadRequest("decryption_failed"))?;
    let plaintext = state
        .codec
        .decrypt(&envelope)
        .map_err(|_| ApiError::BadRequest("decryption_failed"))?;
    let text = String::from_utf8(plaintext)
        .map_err(|_| ApiError::BadRequest("decryption_failed"))?;

    // Structured payloads come back as JSON, opaque ones as the plain string.
    let decrypted = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    Ok(Json(json!({ "decrypted": decrypted })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SecretKey;
    use crate::reading::{Location, Reading};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn seeded_state() -> AppState {
        let store = Store::open_in_memory().unwrap();
        let now = epoch_now();
        for (i, msg_id) in ["a", "b", "c"].iter().enumerate() {
            let offset = f64::from(u32::try_from(i).unwrap());
            let reading = Reading {
                msg_id: Some((*msg_id).to_string()),
                ts: Some(now - offset),
                altitude: Some(100.0 + offset),
                speed: Some(40.0),
                battery: Some(if *msg_id == "c" { 10.0 } else { 90.0 }),
                location: Some(Location {
                    lat: 12.0 + offset,
                    lon: 77.0,
                }),
            };
            // "a" is newest, "c" is oldest and ten minutes stale.
            let inserted_at = if *msg_id == "c" { now - 600.0 } else { now - offset };
            store
                .insert_if_absent(msg_id, now - offset, &reading, "{}", inserted_at)
                .unwrap();
        }
        AppState::new(store, Codec::new(SecretKey::generate()))
    }

    fn empty_state() -> AppState {
        AppState::new(
            Store::open_in_memory().unwrap(),
            Codec::new(SecretKey::generate()),
        )
    }

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post_json(state: AppState, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(empty_state(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_last_empty() {
        let (status, body) = get_json(empty_state(), "/last").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "empty");
    }

    #[tokio::test]
    async fn test_last_returns_newest() {
        let (status, body) = get_json(seeded_state(), "/last").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["msg_id"], "a");
        assert_eq!(body["altitude"], 100.0);
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let (status, body) = get_json(seeded_state(), "/history").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
        let ids: Vec<&str> = body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["msg_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_history_respects_limit() {
        let (_, body) = get_json(seeded_state(), "/history?limit=2").await;
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_history_invalid_limit_falls_back() {
        let (status, body) = get_json(seeded_state(), "/history?limit=banana").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
    }

    #[tokio::test]
    async fn test_history_window_filters() {
        // "c" was inserted ten minutes ago; a five-minute window hides it.
        let (_, body) = get_json(seeded_state(), "/history?minutes=5").await;
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_history_invalid_window_means_all() {
        let (_, body) = get_json(seeded_state(), "/history?minutes=soon").await;
        assert_eq!(body["count"], 3);
    }

    #[tokio::test]
    async fn test_stats_no_data() {
        let (status, body) = get_json(empty_state(), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
        assert_eq!(body["message"], "no data");
    }

    #[tokio::test]
    async fn test_stats_aggregates() {
        let (status, body) = get_json(seeded_state(), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
        assert_eq!(body["altitude"]["avg"], 101.0);
        // One of three defined batteries is below threshold.
        let rate = body["low_battery_rate"].as_f64().unwrap();
        assert!((rate - 100.0 / 3.0).abs() < 1e-9);
        // Path runs oldest to newest: c, b, a.
        let path = body["path_sample"].as_array().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0][0], 14.0);
        assert_eq!(path[2][0], 12.0);
    }

    #[tokio::test]
    async fn test_export_csv() {
        let response = build_router(seeded_state())
            .oneshot(Request::builder().uri("/export").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/csv"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "msg_id,ts,altitude,speed,battery,lat,lon");
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("a,"));
    }

    #[tokio::test]
    async fn test_send_receive_round_trip() {
        let state = empty_state();
        let (status, body) = post_json(
            state.clone(),
            "/send",
            r#"{"data": {"battery": 92, "altitude": 10}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let encrypted = body["encrypted"].as_str().unwrap().to_string();

        let (status, body) = post_json(
            state,
            "/receive",
            &json!({ "encrypted": encrypted }).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decrypted"]["battery"], 92);
    }

    #[tokio::test]
    async fn test_send_string_payload() {
        let state = empty_state();
        let (_, body) = post_json(
            state.clone(),
            "/send",
            r#"{"data": "Drone battery: 92%"}"#,
        )
        .await;
        let encrypted = body["encrypted"].as_str().unwrap().to_string();

        let (_, body) = post_json(
            state,
            "/receive",
            &json!({ "encrypted": encrypted }).to_string(),
        )
        .await;
        assert_eq!(body["decrypted"], "Drone battery: 92%");
    }

    #[tokio::test]
    async fn test_send_without_body_samples() {
        let response = build_router(empty_state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/send")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["encrypted"].is_string());
    }

    #[tokio::test]
    async fn test_receive_missing_field() {
        let (status, body) = post_json(empty_state(), "/receive", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("encrypted"));
    }

    #[tokio::test]
    async fn test_receive_garbage() {
        let (status, body) =
            post_json(empty_state(), "/receive", r#"{"encrypted": "!!!not base64!!!"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "decryption_failed");
    }

    #[tokio::test]
    async fn test_receive_tampered_envelope() {
        let state = empty_state();
        let (_, body) = post_json(state.clone(), "/send", r#"{"data": {"x": 1}}"#).await;
        let mut envelope = URL_SAFE
            .decode(body["encrypted"].as_str().unwrap())
            .unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;

        let (status, body) = post_json(
            state,
            "/receive",
            &json!({ "encrypted": URL_SAFE.encode(envelope) }).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "decryption_failed");
    }
}
