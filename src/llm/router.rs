//! 推理路由器
//!
//! 四种语义操作各自选择后端：
//! - 规划 / 步骤执行：快速后端，无回退
//! - 校验 / 报告合成：高质量后端（若已配置），出错（含其重试耗尽）时单跳回退到快速后端
//!
//! 未配置高质量后端时一切请求静默走快速后端。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::{Backend, LlmError};

/// 语义操作（用于路由决策）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// 生成研究计划
    Plan,
    /// 执行单个步骤（分析类）
    ExecuteStep,
    /// 校验研究结果
    Verify,
    /// 合成最终报告
    Synthesize,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Plan => "plan",
            Intent::ExecuteStep => "execute_step",
            Intent::Verify => "verify",
            Intent::Synthesize => "synthesize",
        }
    }

    /// 是否优先使用高质量后端
    fn prefers_quality(&self) -> bool {
        matches!(self, Intent::Verify | Intent::Synthesize)
    }
}

/// 后端槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSlot {
    Fast,
    Quality,
}

/// 某个 Intent 的路由结果：主后端 + 可选回退
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub primary: BackendSlot,
    pub fallback: Option<BackendSlot>,
}

/// 推理路由器：仅持有启动时配置的后端
pub struct InferenceRouter {
    fast: Arc<Backend>,
    quality: Option<Arc<Backend>>,
    /// 回退次数统计
    fallbacks: AtomicUsize,
}

impl InferenceRouter {
    pub fn new(fast: Arc<Backend>, quality: Option<Arc<Backend>>) -> Self {
        Self {
            fast,
            quality,
            fallbacks: AtomicUsize::new(0),
        }
    }

    pub fn has_quality(&self) -> bool {
        self.quality.is_some()
    }

    /// 返回某个 Intent 的路由决策
    pub fn route(&self, intent: Intent) -> Route {
        if intent.prefers_quality() && self.quality.is_some() {
            Route {
                primary: BackendSlot::Quality,
                fallback: Some(BackendSlot::Fast),
            }
        } else {
            Route {
                primary: BackendSlot::Fast,
                fallback: None,
            }
        }
    }

    /// 累计回退次数
    pub fn fallback_count(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    fn backend(&self, slot: BackendSlot) -> &Arc<Backend> {
        match slot {
            BackendSlot::Quality => self.quality.as_ref().unwrap_or(&self.fast),
            BackendSlot::Fast => &self.fast,
        }
    }

    pub async fn generate_text(&self, intent: Intent, prompt: &str) -> Result<String, LlmError> {
        let route = self.route(intent);
        match self.backend(route.primary).generate_text(prompt).await {
            Ok(text) => Ok(text),
            Err(e) => match route.fallback {
                Some(slot) => {
                    self.note_fallback(intent, route.primary, &e);
                    self.backend(slot).generate_text(prompt).await
                }
                None => Err(e),
            },
        }
    }

    pub async fn generate_structured(
        &self,
        intent: Intent,
        prompt: &str,
    ) -> Result<Value, LlmError> {
        let route = self.route(intent);
        match self.backend(route.primary).generate_structured(prompt).await {
            Ok(value) => Ok(value),
            Err(e) => match route.fallback {
                Some(slot) => {
                    self.note_fallback(intent, route.primary, &e);
                    self.backend(slot).generate_structured(prompt).await
                }
                None => Err(e),
            },
        }
    }

    fn note_fallback(&self, intent: Intent, from: BackendSlot, err: &LlmError) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            intent = intent.as_str(),
            from = %self.backend(from).name(),
            error = %err,
            "primary backend failed, falling back to fast backend"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::{MockLlmClient, RetryPolicy};

    fn backend(name: &str, client: Arc<MockLlmClient>) -> Arc<Backend> {
        Arc::new(Backend::new(
            name,
            client,
            Duration::ZERO,
            RetryPolicy::new(3, Duration::ZERO),
        ))
    }

    #[test]
    fn test_routes_with_quality_backend() {
        let fast = backend("fast", Arc::new(MockLlmClient::echo()));
        let quality = backend("quality", Arc::new(MockLlmClient::echo()));
        let router = InferenceRouter::new(fast, Some(quality));

        assert_eq!(router.route(Intent::Plan).primary, BackendSlot::Fast);
        assert_eq!(router.route(Intent::Plan).fallback, None);
        assert_eq!(router.route(Intent::ExecuteStep).primary, BackendSlot::Fast);
        assert_eq!(
            router.route(Intent::Verify),
            Route {
                primary: BackendSlot::Quality,
                fallback: Some(BackendSlot::Fast)
            }
        );
        assert_eq!(router.route(Intent::Synthesize).primary, BackendSlot::Quality);
    }

    #[tokio::test]
    async fn test_without_quality_everything_goes_fast() {
        let fast_client = Arc::new(MockLlmClient::from_fn(|_| Ok("{\"ok\": true}".into())));
        let router = InferenceRouter::new(backend("fast", fast_client.clone()), None);

        assert_eq!(router.route(Intent::Verify).primary, BackendSlot::Fast);
        router.generate_structured(Intent::Verify, "v").await.unwrap();
        router.generate_text(Intent::Synthesize, "s").await.unwrap();
        assert_eq!(fast_client.call_count(), 2);
        assert_eq!(router.fallback_count(), 0);
    }

    #[tokio::test]
    async fn test_quality_error_falls_back_to_fast() {
        let fast_client = Arc::new(MockLlmClient::from_fn(|_| Ok("from fast".into())));
        let quality_client = Arc::new(MockLlmClient::from_fn(|_| {
            Err(LlmError::Provider("boom".into()))
        }));
        let router = InferenceRouter::new(
            backend("fast", fast_client.clone()),
            Some(backend("quality", quality_client.clone())),
        );

        let out = router.generate_text(Intent::Synthesize, "report").await.unwrap();
        assert_eq!(out, "from fast");
        assert_eq!(quality_client.call_count(), 1);
        assert_eq!(fast_client.call_count(), 1);
        assert_eq!(router.fallback_count(), 1);
    }

    #[tokio::test]
    async fn test_quality_retry_exhaustion_falls_back() {
        let fast_client = Arc::new(MockLlmClient::from_fn(|_| Ok("{\"status\": \"pass\"}".into())));
        let quality_client = Arc::new(MockLlmClient::from_fn(|_| {
            Err(LlmError::RateLimited("429".into()))
        }));
        let router = InferenceRouter::new(
            backend("fast", fast_client.clone()),
            Some(backend("quality", quality_client.clone())),
        );

        let value = router.generate_structured(Intent::Verify, "verify").await.unwrap();
        assert_eq!(value["status"], "pass");
        assert_eq!(quality_client.call_count(), 3);
        assert_eq!(fast_client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_is_single_hop() {
        let fast_client = Arc::new(MockLlmClient::from_fn(|_| {
            Err(LlmError::Provider("fast down".into()))
        }));
        let quality_client = Arc::new(MockLlmClient::from_fn(|_| {
            Err(LlmError::Provider("quality down".into()))
        }));
        let router = InferenceRouter::new(
            backend("fast", fast_client.clone()),
            Some(backend("quality", quality_client.clone())),
        );

        let err = router.generate_text(Intent::Verify, "x").await.unwrap_err();
        assert!(err.to_string().contains("fast down"));
        assert_eq!(fast_client.call_count(), 1);
        assert_eq!(quality_client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_plan_errors_do_not_fall_back() {
        let fast_client = Arc::new(MockLlmClient::from_fn(|_| {
            Err(LlmError::Provider("fast down".into()))
        }));
        let quality_client = Arc::new(MockLlmClient::echo());
        let router = InferenceRouter::new(
            backend("fast", fast_client),
            Some(backend("quality", quality_client.clone())),
        );

        assert!(router.generate_structured(Intent::Plan, "plan").await.is_err());
        assert_eq!(quality_client.call_count(), 0);
    }
}
