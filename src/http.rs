use crate::admission::{AdmissionGate, AdmissionResult};
use crate::error::{database_error, AppError, AppResult};
use crate::sink::{Sink, StoreStats, StoreStatsSource};
use crate::stats::{IngestStats, StatsSnapshot};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct HttpState {
    pub gate: AdmissionGate,
    pub stats: Arc<IngestStats>,
    pub sink: Arc<dyn Sink>,
    pub store_stats: Arc<dyn StoreStatsSource>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    time: String,
}

#[derive(Debug, Serialize)]
struct AcceptedResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    store: StoreStats,
    pipeline: StatsSnapshot,
}

async fn health(State(state): State<HttpState>) -> AppResult<Json<HealthResponse>> {
    state.sink.ping().await.map_err(|err| {
        tracing::warn!(error = %err, "health check ping failed");
        AppError::unavailable("Database connection failed")
    })?;
    Ok(Json(HealthResponse {
        status: "healthy",
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

async fn post_sensor_data(State(state): State<HttpState>, body: Bytes) -> Response {
    match state.gate.admit(body.to_vec()) {
        AdmissionResult::Accepted => {
            (StatusCode::OK, Json(AcceptedResponse { status: "accepted" })).into_response()
        }
        AdmissionResult::RejectedInvalid(reason) => AppError::bad_request(reason).into_response(),
        AdmissionResult::RejectedBusy => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "1")],
            "Service busy, please retry",
        )
            .into_response(),
    }
}

async fn get_stats(State(state): State<HttpState>) -> AppResult<Json<StatsResponse>> {
    let store = state
        .store_stats
        .store_stats()
        .await
        .map_err(database_error)?;
    let pipeline = state
        .stats
        .snapshot(state.gate.queue_depth(), state.gate.queue_capacity());
    Ok(Json(StatsResponse { store, pipeline }))
}

pub fn router(state: HttpState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sensor-data", post(post_sensor_data))
        .route("/api/stats", get(get_stats))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::queue::QueueReceiver;
    use crate::test_support::{reading_json, RecordingSink};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(capacity: usize) -> (Router, Arc<RecordingSink>, QueueReceiver) {
        let sink = RecordingSink::new();
        let stats = Arc::new(IngestStats::new());
        let (handle, rx) = queue::bounded(capacity);
        let state = HttpState {
            gate: AdmissionGate::new(handle, stats.clone()),
            stats,
            sink: sink.clone(),
            store_stats: sink.clone(),
        };
        (router(state, Duration::from_secs(5)), sink, rx)
    }

    fn post(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/sensor-data")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn valid_reading_is_accepted() {
        let (app, _sink, mut rx) = app(4);
        let resp = app
            .oneshot(post(reading_json("dev-1", "temp", "2024-01-01T00:00:00Z")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "accepted");
        assert_eq!(rx.dequeue().await.unwrap().device_id(), "dev-1");
    }

    #[tokio::test]
    async fn invalid_reading_is_a_client_error() {
        let (app, _sink, _rx) = app(4);
        let resp = app
            .clone()
            .oneshot(post(b"{not json".to_vec()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(post(reading_json("", "temp", "2024-01-01T00:00:00Z")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"missing fields");
    }

    #[tokio::test]
    async fn full_queue_is_retryable_overload() {
        let (app, _sink, _rx) = app(1);
        let body = reading_json("dev-1", "temp", "2024-01-01T00:00:00Z");
        let first = app.clone().oneshot(post(body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(post(body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            second.headers().get(header::RETRY_AFTER).unwrap(),
            "1"
        );
    }

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let (app, _sink, _rx) = app(4);
        let resp = app.oneshot(get_request("/api/sensor-data")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn health_reflects_store_ping() {
        let (app, sink, _rx) = app(4);
        let resp = app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "healthy");
        assert!(json["time"].as_str().unwrap().ends_with('Z'));

        sink.set_unhealthy(true);
        let resp = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn stats_combine_store_and_pipeline_counters() {
        let (app, sink, _rx) = app(4);
        sink.write_batch(&[crate::test_support::record("dev-a", 0)])
            .await
            .unwrap();
        let accepted = app
            .clone()
            .oneshot(post(reading_json("dev-1", "temp", "2024-01-01T00:00:00Z")))
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);

        let resp = app.clone().oneshot(get_request("/api/stats")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["total_records"], 1);
        assert_eq!(json["device_count"], 1);
        assert_eq!(json["priority_stats"]["2"], 1);
        assert_eq!(json["pipeline"]["accepted"], 1);
        assert_eq!(json["pipeline"]["queue_depth"], 1);
        assert_eq!(json["pipeline"]["queue_capacity"], 4);

        sink.set_unhealthy(true);
        let resp = app.oneshot(get_request("/api/stats")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
