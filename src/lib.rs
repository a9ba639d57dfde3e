//! Scout - 自主研究任务服务
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 任务状态机、事件与存储、恢复策略、步骤调度、取消监管
//! - **agents**: Planner、Executor、Verifier、ReportGenerator
//! - **llm**: LLM 客户端、限速重试后端与推理路由器
//! - **tools**: 搜索与网页抓取工具、注册表与执行器
//! - **server**: axum HTTP + SSE 接口（feature `web`）

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
#[cfg(feature = "web")]
pub mod server;
pub mod tools;
