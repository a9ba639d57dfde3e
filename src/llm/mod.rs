//! LLM 层：传输客户端（OpenAI 兼容 / Mock）、限速重试后端、推理路由器

pub mod backend;
pub mod mock;
pub mod openai;
pub mod providers;
pub mod router;
pub mod throttle;
pub mod traits;

pub use backend::{parse_structured, Backend, RetryPolicy};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use providers::create_router_from_config;
pub use router::{BackendSlot, InferenceRouter, Intent, Route};
pub use throttle::Throttle;
pub use traits::{is_rate_limit_message, LlmClient, LlmError, Message, Role};
