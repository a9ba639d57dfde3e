//! HTTP 接口（axum）：创建 / 查询 / 取消研究任务，SSE 推送任务事件

pub mod routes;
pub mod sse;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::core::Orchestrator;

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route(
            "/api/research",
            get(routes::list_research).post(routes::create_research),
        )
        .route("/api/research/:id", get(routes::get_research))
        .route("/api/research/:id/events", get(routes::research_events))
        .route("/api/research/:id/cancel", post(routes::cancel_research))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(orchestrator)
}
