//! Job submission and status handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use vidq_models::{ContentAnalysis, JobId, JobPayload, JobView};

use crate::error::{ApiError, ApiResult};
use crate::services::{Submission, SubmitOutcome};
use crate::state::AppState;

/// Body of `POST /api/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
    #[serde(default)]
    #[validate(length(min = 2, max = 35))]
    pub locale: Option<String>,
    #[serde(default)]
    pub options: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    #[validate(range(min = 0, max = 10_000))]
    pub priority: Option<i32>,
}

impl From<SubmitRequest> for Submission {
    fn from(request: SubmitRequest) -> Self {
        let mut payload = JobPayload::new(request.url);
        payload.locale = request.locale;
        payload.options = request.options.unwrap_or_default();
        Submission {
            payload,
            priority: request.priority,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubmitResponse {
    Completed {
        result: ContentAnalysis,
        /// Whether the result came from the fingerprint cache
        cached: bool,
    },
    Queued {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
}

impl IntoResponse for SubmitResponse {
    fn into_response(self) -> Response {
        let status = match self {
            SubmitResponse::Completed { .. } => StatusCode::OK,
            SubmitResponse::Queued { .. } => StatusCode::ACCEPTED,
        };
        (status, Json(self)).into_response()
    }
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Cached(result) => SubmitResponse::Completed {
                result,
                cached: true,
            },
            SubmitOutcome::Inline(result) => SubmitResponse::Completed {
                result,
                cached: false,
            },
            SubmitOutcome::Queued(job_id) => SubmitResponse::Queued { job_id },
        }
    }
}

/// POST /api/jobs
///
/// Returns 200 with the result when it is cached or was computed inline,
/// 202 with a job id when the work was queued.
pub async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<SubmitResponse> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    request.validate()?;

    let outcome = state.submission.submit(request.into()).await?;
    Ok(outcome.into())
}

/// GET /api/jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    Ok(Json(state.submission.status(&job_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shapes() {
        let queued = serde_json::to_value(SubmitResponse::Queued {
            job_id: JobId::from("j-1"),
        })
        .unwrap();
        assert_eq!(queued, serde_json::json!({"status": "queued", "jobId": "j-1"}));

        let completed = serde_json::to_value(SubmitResponse::Completed {
            result: ContentAnalysis::new("https://example.com/v.mp4"),
            cached: true,
        })
        .unwrap();
        assert_eq!(completed["status"], "completed");
        assert_eq!(completed["cached"], true);
        assert!(completed["result"].is_object());
    }

    #[test]
    fn test_request_validation() {
        let request: SubmitRequest =
            serde_json::from_value(serde_json::json!({"url": "", "priority": -1})).unwrap();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("url"));
        assert!(errors.field_errors().contains_key("priority"));
    }
}
