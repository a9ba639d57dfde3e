//! 编排器构建器：统一的初始化逻辑
//!
//! 默认从 AppConfig 创建路由器、工具与内存存储；测试或嵌入场景可逐项替换。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::core::store::{InMemoryJobStore, JobStore};
use crate::core::AgentError;
use crate::llm::{create_router_from_config, InferenceRouter};
use crate::tools::{create_tool_executor, ToolExecutor};

pub struct OrchestratorBuilder {
    config: AppConfig,
    store: Option<Arc<dyn JobStore>>,
    router: Option<Arc<InferenceRouter>>,
    tools: Option<Arc<ToolExecutor>>,
    settings: Option<OrchestratorSettings>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            router: None,
            tools: None,
            settings: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 指定路由器（跳过按配置创建后端与读取 API Key）
    pub fn with_router(mut self, router: Arc<InferenceRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_tools(mut self, tools: ToolExecutor) -> Self {
        self.tools = Some(Arc::new(tools));
        self
    }

    /// 覆盖 [orchestrator] 配置段
    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> Result<Arc<Orchestrator>, AgentError> {
        let router = match self.router {
            Some(router) => router,
            None => Arc::new(create_router_from_config(&self.config.llm)?),
        };
        let tools = self
            .tools
            .unwrap_or_else(|| Arc::new(create_tool_executor(&self.config.tools)));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));
        let settings = self
            .settings
            .unwrap_or_else(|| OrchestratorSettings::from(&self.config.orchestrator));

        tracing::info!(
            max_attempts = settings.max_attempts,
            step_delay_ms = settings.step_delay.as_millis() as u64,
            scheduler = %settings.scheduler,
            quality_backend = router.has_quality(),
            "Orchestrator ready"
        );
        Ok(Arc::new(Orchestrator::new(store, router, tools, settings)))
    }
}
