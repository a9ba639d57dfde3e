//! 后端提供方：快速后端（Groq，OpenAI 兼容）与高质量后端（Gemini，OpenAI 兼容端点）
//!
//! - 快速后端必须配置 API Key，否则启动失败
//! - 高质量后端缺少 Key 时静默禁用，校验 / 报告合成全部走快速后端

use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendSection, LlmSection};
use crate::core::AgentError;
use crate::llm::{Backend, InferenceRouter, OpenAiClient, RetryPolicy};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// 某个槽位的默认参数
#[derive(Debug, Clone, Copy)]
pub struct ProviderDefaults {
    pub name: &'static str,
    pub base_url: &'static str,
    pub model: &'static str,
    pub api_key_env: &'static str,
    pub min_interval_ms: u64,
}

pub const FAST_DEFAULTS: ProviderDefaults = ProviderDefaults {
    name: "fast",
    base_url: GROQ_BASE_URL,
    model: GROQ_DEFAULT_MODEL,
    api_key_env: "GROQ_API_KEY",
    min_interval_ms: 1500,
};

pub const QUALITY_DEFAULTS: ProviderDefaults = ProviderDefaults {
    name: "quality",
    base_url: GEMINI_BASE_URL,
    model: GEMINI_DEFAULT_MODEL,
    api_key_env: "GEMINI_API_KEY",
    min_interval_ms: 2000,
};

/// 配置与默认值合并后的后端参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub min_interval: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

pub fn resolve(section: &BackendSection, defaults: &ProviderDefaults) -> ResolvedBackend {
    ResolvedBackend {
        name: defaults.name.to_string(),
        base_url: section
            .base_url
            .clone()
            .unwrap_or_else(|| defaults.base_url.to_string()),
        model: section
            .model
            .clone()
            .unwrap_or_else(|| defaults.model.to_string()),
        api_key_env: section
            .api_key_env
            .clone()
            .unwrap_or_else(|| defaults.api_key_env.to_string()),
        min_interval: Duration::from_millis(
            section.min_interval_ms.unwrap_or(defaults.min_interval_ms),
        ),
        max_attempts: section.max_attempts.unwrap_or(3),
        backoff_base: Duration::from_millis(section.backoff_base_ms.unwrap_or(1000)),
    }
}

/// 用解析后的参数与 API Key 创建后端
pub fn build_backend(resolved: &ResolvedBackend, api_key: &str, timeout: Duration) -> Backend {
    let client = OpenAiClient::new(Some(&resolved.base_url), &resolved.model, api_key)
        .with_timeout(timeout);
    Backend::new(
        resolved.name.clone(),
        Arc::new(client),
        resolved.min_interval,
        RetryPolicy::new(resolved.max_attempts, resolved.backoff_base),
    )
}

fn read_key(env_name: &str) -> Option<String> {
    std::env::var(env_name).ok().filter(|k| !k.trim().is_empty())
}

/// 根据配置与环境变量创建路由器
pub fn create_router_from_config(cfg: &LlmSection) -> Result<InferenceRouter, AgentError> {
    let timeout = Duration::from_secs(cfg.request_timeout_secs);
    let fast = resolve(&cfg.fast, &FAST_DEFAULTS);
    let fast_key = read_key(&fast.api_key_env).ok_or_else(|| {
        AgentError::ConfigError(format!(
            "fast backend requires an API key in ${}",
            fast.api_key_env
        ))
    })?;
    tracing::info!("Using fast backend {} ({})", fast.model, fast.base_url);
    let fast_backend = Arc::new(build_backend(&fast, &fast_key, timeout));

    let quality = resolve(&cfg.quality, &QUALITY_DEFAULTS);
    let quality_backend = match read_key(&quality.api_key_env) {
        Some(key) => {
            tracing::info!("Using quality backend {} ({})", quality.model, quality.base_url);
            Some(Arc::new(build_backend(&quality, &key, timeout)))
        }
        None => {
            tracing::info!(
                "${} not set, verify/synthesize will use the fast backend",
                quality.api_key_env
            );
            None
        }
    };

    Ok(InferenceRouter::new(fast_backend, quality_backend))
}
