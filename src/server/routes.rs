//! /api/research 路由处理

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::core::{AgentError, Job, JobStatus, JobSummary, Orchestrator};
use crate::server::sse::sse_response;

type ApiError = (StatusCode, String);

#[derive(Debug, Deserialize)]
pub struct CreateResearchRequest {
    #[serde(default)]
    pub topic: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResearchResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

fn api_error(err: AgentError) -> ApiError {
    let status = match err {
        AgentError::EmptyTopic => StatusCode::BAD_REQUEST,
        AgentError::JobNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn not_found(id: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("Job not found: {id}"))
}

/// POST /api/research：创建任务，202 + {job_id, status}
pub async fn create_research(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(req): Json<CreateResearchRequest>,
) -> Result<(StatusCode, Json<CreateResearchResponse>), ApiError> {
    let job = orchestrator.create_job(&req.topic).await.map_err(api_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateResearchResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /api/research
pub async fn list_research(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Vec<JobSummary>> {
    Json(orchestrator.list_jobs().await)
}

/// GET /api/research/:id
pub async fn get_research(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    orchestrator
        .get_job(&id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

/// GET /api/research/:id/events：SSE
pub async fn research_events(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = orchestrator.subscribe(&id).await.map_err(api_error)?;
    tracing::debug!(job_id = %id, "SSE subscriber attached");
    Ok(sse_response(subscription))
}

/// POST /api/research/:id/cancel
pub async fn cancel_research(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = orchestrator.cancel_job(&id).await.map_err(api_error)?;
    Ok(Json(CancelResponse { cancelled }))
}
