//! 核心编排层：任务状态、事件与存储、恢复策略、步骤调度、取消监管、主控状态机

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod recovery;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod supervisor;

pub use builder::OrchestratorBuilder;
pub use error::{AgentError, RecoveryAction, StoreError};
pub use events::JobEvent;
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use recovery::RecoveryEngine;
pub use scheduler::{DependencyOrderScheduler, SequentialScheduler, StepScheduler};
pub use state::{
    Finding, Findings, Job, JobId, JobStatus, JobSummary, LogEntry, LogLevel, Plan, Step,
    StepStatus, ToolKind, Verification,
};
pub use store::{InMemoryJobStore, JobStore, JobUpdate, Subscription};
pub use supervisor::JobSupervisor;
