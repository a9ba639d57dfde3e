//! Scout - 研究任务 HTTP 服务
//!
//! 入口：初始化日志、加载配置、创建编排器并启动 axum；Ctrl+C 时取消全部任务后退出。

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scout::{config::load_config, core::OrchestratorBuilder, observability, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .context("Invalid server address")?;

    let orchestrator = OrchestratorBuilder::new(cfg)
        .build()
        .context("Failed to create orchestrator")?;

    let app = server::router(Arc::clone(&orchestrator));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Scout listening on http://{}", addr);

    let shutdown_orchestrator = Arc::clone(&orchestrator);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, cancelling running jobs...");
            }
            shutdown_orchestrator.shutdown();
        })
        .await
        .context("Server error")?;

    if !orchestrator.wait_idle(Duration::from_secs(5)).await {
        tracing::warn!(
            active = orchestrator.active_jobs(),
            "Some jobs did not finish before shutdown"
        );
    }
    Ok(())
}
