//! Liveness and readiness probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use std::time::Instant;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub queued_jobs: usize,
    pub speech_providers: Vec<String>,
    pub dependencies: Vec<DependencyCheck>,
}

/// One external dependency the renderer needs.
#[derive(Serialize)]
pub struct DependencyCheck {
    pub name: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl DependencyCheck {
    fn from_result<E: ToString>(name: &'static str, result: Result<(), E>, latency_ms: Option<u64>) -> Self {
        match result {
            Ok(()) => Self {
                name,
                ok: true,
                error: None,
                latency_ms,
            },
            Err(e) => Self {
                name,
                ok: false,
                error: Some(e.to_string()),
                latency_ms: None,
            },
        }
    }
}

/// Readiness probe: FFmpeg tools on PATH, a reachable job store and at
/// least one configured speech provider.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let start = Instant::now();
    let store = state.jobs.store().ping().await;
    let store_latency = start.elapsed().as_millis() as u64;

    let dependencies = vec![
        DependencyCheck::from_result("ffmpeg", reel_media::check_ffmpeg().map(|_| ()), None),
        DependencyCheck::from_result("ffprobe", reel_media::check_ffprobe().map(|_| ()), None),
        DependencyCheck::from_result("job_store", store, Some(store_latency)),
    ];
    let speech_providers = state.jobs.generator().speech().provider_names();

    let ready = !speech_providers.is_empty() && dependencies.iter().all(|d| d.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            queued_jobs: state.jobs.queued().await,
            speech_providers,
            dependencies,
        }),
    )
}
