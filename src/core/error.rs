//! 错误类型与恢复动作
//!
//! AgentError 覆盖研究任务生命周期内的致命错误；RecoveryAction 由 RecoveryEngine 在校验失败后给出。

use thiserror::Error;

use crate::core::state::JobStatus;
use crate::llm::LlmError;

/// 任务存储错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} is already in a terminal state")]
    Terminal(String),

    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Step {step} not found in current plan")]
    UnknownStep { step: String },
}

/// 研究任务运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("No findings were gathered, cannot synthesize a report")]
    EmptyFindings,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 校验失败后恢复引擎给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 带着校验反馈重新规划
    Replan { feedback: String },
    /// 重试次数耗尽，直接用最后一轮 Findings 合成报告
    FallbackReport,
    /// 无可用 Findings，任务失败
    Abort(String),
}
