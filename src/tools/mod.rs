//! 工具适配层：search / fetch，以及注册表与带超时的执行器

pub mod executor;
pub mod fetch;
pub mod registry;
pub mod search;

pub use executor::{ToolError, ToolExecutor};
pub use fetch::FetchTool;
pub use registry::{Tool, ToolRegistry};
pub use search::{SearchHit, SearchProvider, SearchTool, WebSearch};

use crate::config::ToolsSection;

/// 按 [tools] 配置注册 search 与 fetch，返回带超时的执行器
pub fn create_tool_executor(cfg: &ToolsSection) -> ToolExecutor {
    let mut registry = ToolRegistry::new();
    let search = WebSearch::from_config(&cfg.search);
    tracing::info!(providers = ?search.provider_names(), "Search providers");
    registry.register(SearchTool::new(search, cfg.search.max_results));
    registry.register(FetchTool::new(cfg.fetch.timeout_secs, cfg.fetch.max_chars));
    ToolExecutor::new(registry, cfg.tool_timeout_secs)
}
