//! Job submission, status, cancellation and listing.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

use reel_models::{GenerationRequest, Job, JobId, JobStatus};
use reel_queue::{JobFilter, DEFAULT_PAGE_SIZE};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Accepted submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// Artifact links and video facts for a finished job.
#[derive(Debug, Serialize)]
pub struct JobResultResponse {
    pub video_url: String,
    pub thumbnail_url: String,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub scene_count: u32,
    pub file_size_bytes: u64,
}

/// Job status response.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub requester: String,
    pub status: JobStatus,
    /// 0.0-1.0
    pub progress: f64,
    pub progress_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResultResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl JobStatusResponse {
    /// Render a job for clients. Local paths never leave the server.
    pub fn from_job(job: &Job, config: &ApiConfig) -> Self {
        let result = job.result.as_ref().map(|r| JobResultResponse {
            video_url: config.public_url(&format!("/api/jobs/{}/video", job.id)),
            thumbnail_url: config.public_url(&format!("/api/jobs/{}/thumbnail", job.id)),
            duration_secs: r.metadata.duration_secs,
            width: r.metadata.width,
            height: r.metadata.height,
            scene_count: r.metadata.scene_count,
            file_size_bytes: r.metadata.file_size_bytes,
        });

        Self {
            job_id: job.id.to_string(),
            requester: job.requester().to_string(),
            status: job.status,
            progress: job.progress,
            progress_message: job.progress_message.clone(),
            result,
            error: job.error.clone(),
            retry_count: job.retry_count,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobStatusResponse>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

/// Parse a path job id, rejecting anything that is not one of ours.
pub(crate) fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    if !JobId::is_valid(raw) {
        return Err(ApiError::not_found(format!("Job {}", raw)));
    }
    Ok(JobId::from_string(raw))
}

/// POST /api/jobs
///
/// Validation and segmentation run before the job is accepted; the render
/// itself happens in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let job = state.jobs.submit(request).await?;
    info!(job_id = %job.id, requester = %job.requester(), "Accepted generation request");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id.to_string(),
            status: job.status,
        }),
    ))
}

/// GET /api/jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.jobs.status(&job_id).await?;
    Ok(Json(JobStatusResponse::from_job(&job, &state.config)))
}

/// POST /api/jobs/:job_id/cancel
///
/// 409 unless the job is pending, started or processing.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.jobs.cancel(&job_id).await?;
    Ok(Json(JobStatusResponse::from_job(&job, &state.config)))
}

/// GET /api/jobs?requester=&status=&page=&page_size=
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<ListJobsResponse>> {
    let status = query
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let filter = JobFilter {
        requester: query.requester.filter(|r| !r.is_empty()),
        status,
        page: query.page.unwrap_or(1),
        page_size: query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    };
    let page = state.jobs.list(&filter).await?;

    Ok(Json(ListJobsResponse {
        jobs: page
            .jobs
            .iter()
            .map(|job| JobStatusResponse::from_job(job, &state.config))
            .collect(),
        total: page.total,
        page: page.page,
        page_size: page.page_size,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{JobResult, VideoMetadata};
    use std::path::PathBuf;

    #[test]
    fn test_status_response_hides_paths() {
        let mut job = Job::new(GenerationRequest::new("alice", "Hello there."));
        job.start().unwrap();
        job.record_progress(0.5, "Composing");
        job.complete(JobResult {
            video_path: PathBuf::from("/srv/output/abc/video.mp4"),
            thumbnail_path: PathBuf::from("/srv/output/abc/thumbnail.jpg"),
            metadata: VideoMetadata {
                duration_secs: 12.5,
                scene_count: 3,
                ..Default::default()
            },
        })
        .unwrap();

        let response = JobStatusResponse::from_job(&job, &ApiConfig::default());
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("/srv/output"));

        let result = response.result.unwrap();
        assert_eq!(result.video_url, format!("/api/jobs/{}/video", job.id));
        assert_eq!(result.scene_count, 3);
        assert_eq!(response.progress, 1.0);
    }

    #[test]
    fn test_parse_job_id() {
        let id = JobId::new();
        assert_eq!(parse_job_id(id.as_str()).unwrap(), id);
        assert!(matches!(parse_job_id("../etc"), Err(ApiError::NotFound(_))));
    }
}
