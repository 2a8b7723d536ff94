//! Video API handlers.

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use vmorph_models::encoding::OUTPUT_EXTENSION;
use vmorph_models::{AssetId, JobId};
use vmorph_storage::StoredAsset;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the uploaded file.
pub const VIDEO_FIELD: &str = "video";

// ============================================================================
// Upload
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub video_id: AssetId,
    pub filename: String,
    /// Size in megabytes, two decimals
    pub size: String,
}

/// Store an uploaded video.
///
/// POST /api/video/upload
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default();
        if !content_type.starts_with("video/") {
            warn!("Rejected upload with content type '{}'", content_type);
            return Err(ApiError::bad_request("Only video files are allowed"));
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let stored = store_field(&state, field, &filename).await?;
        metrics::record_upload(stored.size_bytes);

        info!(
            "Uploaded video {} ({}, {} MB)",
            stored.id,
            stored.original_filename,
            stored.size_mb()
        );

        return Ok(Json(UploadResponse {
            success: true,
            size: stored.size_mb(),
            video_id: stored.id,
            filename: stored.original_filename,
        }));
    }

    Err(ApiError::bad_request("No video file uploaded"))
}

/// Stream a multipart field to storage, removing the partial file on error.
async fn store_field(
    state: &AppState,
    mut field: Field<'_>,
    filename: &str,
) -> ApiResult<StoredAsset> {
    let mut writer = state
        .storage
        .begin_upload(filename, state.config.max_upload_bytes)
        .await?;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                writer.abort().await;
                return Err(multipart_error(e));
            }
        };

        if let Err(e) = writer.write_chunk(&chunk).await {
            writer.abort().await;
            return Err(e.into());
        }
    }

    Ok(writer.finish().await?)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(e.body_text())
    } else {
        ApiError::bad_request(e.body_text())
    }
}

// ============================================================================
// Batch lifecycle
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessVideoRequest {
    pub video_id: String,
    /// Signed so that negative counts are reported as out of range
    pub variation_count: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobActionResponse {
    pub success: bool,
    pub job_id: JobId,
}

/// Start a batch of variations. Returns before any variation is produced.
///
/// POST /api/video/process
pub async fn process_video(
    State(state): State<AppState>,
    payload: Result<Json<ProcessVideoRequest>, JsonRejection>,
) -> ApiResult<Json<JobActionResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let video_id = AssetId::parse(&request.video_id)
        .map_err(|e| ApiError::bad_request(format!("Invalid videoId: {}", e)))?;

    let count = request
        .variation_count
        .unwrap_or(i64::from(state.config.default_variations));
    if !state.config.accepts_variation_count(count) {
        return Err(ApiError::bad_request(match state.config.max_variations {
            Some(max) => format!("variationCount must be between 1 and {}", max),
            None => "variationCount must be at least 1".to_string(),
        }));
    }
    let count = u32::try_from(count)
        .map_err(|_| ApiError::bad_request("variationCount out of range"))?;

    let job_id = state.orchestrator.start(video_id.clone(), count).await;
    info!("Job {} started: {} variations of {}", job_id, count, video_id);

    Ok(Json(JobActionResponse {
        success: true,
        job_id,
    }))
}

#[derive(Serialize)]
struct StatusNotFound {
    status: &'static str,
}

/// Poll a job.
///
/// GET /api/video/status/:job_id
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    let job = match job_id.parse::<JobId>() {
        Ok(id) => state.registry.get(id).await,
        Err(_) => None,
    };

    match job {
        Some(job) => Json(job).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(StatusNotFound {
                status: "not_found",
            }),
        )
            .into_response(),
    }
}

/// Stop an active job.
///
/// POST /api/video/cancel/:job_id
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobActionResponse>> {
    let job_id = parse_job_id(&job_id)?;
    state.registry.cancel(job_id).await?;

    Ok(Json(JobActionResponse {
        success: true,
        job_id,
    }))
}

/// Drop a finished job from the registry.
///
/// DELETE /api/video/status/:job_id
pub async fn acknowledge_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    let job_id = parse_job_id(&job_id)?;
    state.registry.remove(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("Job not found: {}", raw)))
}

// ============================================================================
// Download
// ============================================================================

/// Stream a produced variation as an attachment.
///
/// GET /api/video/download/:variation_id
pub async fn download_variation(
    State(state): State<AppState>,
    Path(variation_id): Path<String>,
) -> ApiResult<Response> {
    let suffix = format!(".{}", OUTPUT_EXTENSION);
    let variation_id = variation_id
        .strip_suffix(suffix.as_str())
        .unwrap_or(&variation_id);

    let (file, size) = state.storage.open_output(variation_id).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.{}\"", variation_id, OUTPUT_EXTENSION),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}
