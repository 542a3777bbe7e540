//! Byte-streamed delivery of finished videos and thumbnails.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use std::path::PathBuf;
use tokio_util::io::ReaderStream;
use tracing::warn;

use reel_models::JobStatus;

use crate::error::{ApiError, ApiResult};
use crate::handlers::jobs::parse_job_id;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
enum Artifact {
    Video,
    Thumbnail,
}

impl Artifact {
    fn content_type(&self) -> &'static str {
        match self {
            Artifact::Video => "video/mp4",
            Artifact::Thumbnail => "image/jpeg",
        }
    }
}

/// GET /api/jobs/:job_id/video
pub async fn get_video(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Response> {
    stream_artifact(&state, &job_id, Artifact::Video).await
}

/// GET /api/jobs/:job_id/thumbnail
pub async fn get_thumbnail(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Response> {
    stream_artifact(&state, &job_id, Artifact::Thumbnail).await
}

async fn stream_artifact(state: &AppState, raw_id: &str, artifact: Artifact) -> ApiResult<Response> {
    let job_id = parse_job_id(raw_id)?;
    let job = state.jobs.status(&job_id).await?;

    let result = match (&job.status, &job.result) {
        (JobStatus::Success, Some(result)) => result,
        _ => {
            return Err(ApiError::not_found(format!(
                "Job {} has no artifacts while {}",
                job_id, job.status
            )))
        }
    };
    let path: PathBuf = match artifact {
        Artifact::Video => result.video_path.clone(),
        Artifact::Thumbnail => result.thumbnail_path.clone(),
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(job_id = %job_id, path = %path.display(), "Artifact missing on disk");
            return Err(ApiError::not_found("Artifact no longer available"));
        }
        Err(e) => return Err(ApiError::internal(format!("opening artifact: {}", e))),
    };
    let length = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(format!("reading artifact metadata: {}", e)))?
        .len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.content_type())
        .header(header::CONTENT_LENGTH, length)
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::internal(e.to_string()))
}
