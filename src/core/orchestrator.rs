//! 研究任务编排器：Plan → Execute → Verify 状态机
//!
//! create_job 同步返回任务 ID，状态机在独立 tokio 任务中推进；同一任务的所有修改都发生在它自己的任务里，
//! 不同任务并发运行。每次修改经 JobStore 写入并推送给订阅者。
//!
//! 取消：每个任务持有 JobSupervisor 下发的子 token，整个状态机 future 与 token 竞争，
//! 任意挂起点（后端调用、工具调用、步骤间隔）都会被放弃，任务以 cancelled 结束。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::agents::{Planner, ReportGenerator, StepExecutor, Verifier};
use crate::config::OrchestratorSection;
use crate::core::recovery::RecoveryEngine;
use crate::core::scheduler::{scheduler_from_name, StepScheduler};
use crate::core::state::{Findings, Job, JobStatus, JobSummary, LogLevel, Plan, StepStatus};
use crate::core::store::{JobStore, JobUpdate, Subscription};
use crate::core::supervisor::JobSupervisor;
use crate::core::{AgentError, RecoveryAction};
use crate::llm::InferenceRouter;
use crate::tools::ToolExecutor;

/// 编排参数（来自 [orchestrator] 配置段）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_attempts: u32,
    pub step_delay: Duration,
    pub scheduler: String,
}

impl From<&OrchestratorSection> for OrchestratorSettings {
    fn from(cfg: &OrchestratorSection) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            step_delay: Duration::from_millis(cfg.step_delay_ms),
            scheduler: cfg.scheduler.clone(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorSection::default())
    }
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    router: Arc<InferenceRouter>,
    planner: Planner,
    executor: StepExecutor,
    verifier: Verifier,
    reporter: ReportGenerator,
    recovery: RecoveryEngine,
    scheduler: Box<dyn StepScheduler>,
    supervisor: JobSupervisor,
    /// 所有已派生的任务，wait_idle 等它们结束
    tasks: TaskTracker,
    step_delay: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        router: Arc<InferenceRouter>,
        tools: Arc<ToolExecutor>,
        settings: OrchestratorSettings,
    ) -> Self {
        let planner = Planner::new(router.clone()).with_tools(tools.registry().tool_descriptions());
        Self {
            store,
            planner,
            executor: StepExecutor::new(router.clone(), tools),
            verifier: Verifier::new(router.clone()),
            reporter: ReportGenerator::new(router.clone()),
            router,
            recovery: RecoveryEngine::new(settings.max_attempts),
            scheduler: scheduler_from_name(&settings.scheduler),
            supervisor: JobSupervisor::new(),
            tasks: TaskTracker::new(),
            step_delay: settings.step_delay,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<InferenceRouter> {
        &self.router
    }

    /// 创建任务并在后台开始执行；立即返回 queued 状态的快照
    pub async fn create_job(self: &Arc<Self>, topic: &str) -> Result<Job, AgentError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(AgentError::EmptyTopic);
        }
        let job = self.store.create(topic).await;
        let token = self.supervisor.register(&job.id);
        tracing::info!(job_id = %job.id, topic = %topic, "Job created");

        let this = Arc::clone(self);
        let job_id = job.id.clone();
        let topic = job.topic.clone();
        self.tasks.spawn(async move {
            this.run_job(job_id, topic, token).await;
        });
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        self.store.get(job_id).await
    }

    pub async fn list_jobs(&self) -> Vec<JobSummary> {
        self.store.list().await
    }

    pub async fn subscribe(&self, job_id: &str) -> Result<Subscription, AgentError> {
        self.store
            .subscribe(job_id)
            .await
            .map_err(|_| AgentError::JobNotFound(job_id.to_string()))
    }

    /// 取消任务；任务已处于终态时返回 false
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool, AgentError> {
        let job = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| AgentError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        let cancelled = self.supervisor.cancel(job_id);
        if cancelled {
            tracing::info!(job_id = %job_id, "Cancellation requested");
        }
        Ok(cancelled)
    }

    /// 取消全部运行中的任务（进程关闭）
    pub fn shutdown(&self) {
        self.supervisor.cancel_all();
    }

    pub fn active_jobs(&self) -> usize {
        self.tasks.len()
    }

    /// 等待所有任务结束，最多等待 timeout；返回是否全部结束
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.tasks.close();
        let idle = tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok();
        // 关闭只影响 wait；之后创建的任务照常被跟踪
        self.tasks.reopen();
        idle
    }

    async fn run_job(self: Arc<Self>, job_id: String, topic: String, token: CancellationToken) {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(AgentError::Cancelled),
            result = self.drive(&job_id, &topic) => result,
        };

        match outcome {
            Ok(()) => tracing::info!(job_id = %job_id, "Job completed"),
            Err(AgentError::Cancelled) => {
                self.log_quietly(&job_id, LogLevel::Warning, "Job cancelled").await;
                if let Err(e) = self.store.apply(&job_id, JobUpdate::Cancel).await {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record cancellation");
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.log_quietly(&job_id, LogLevel::Error, &format!("Job failed: {message}"))
                    .await;
                if let Err(e) = self
                    .store
                    .apply(&job_id, JobUpdate::Fail { error: message })
                    .await
                {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record failure");
                }
            }
        }
        self.supervisor.release(&job_id);
    }

    /// 状态机主体；返回 Err 时由 run_job 走统一的失败 / 取消路径
    async fn drive(&self, job_id: &str, topic: &str) -> Result<(), AgentError> {
        let max_attempts = self.recovery.max_attempts();
        let mut feedback: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.store.apply(job_id, JobUpdate::Attempt(attempt)).await?;
            self.store
                .apply(job_id, JobUpdate::Status(JobStatus::Planning))
                .await?;
            self.log(
                job_id,
                LogLevel::Info,
                format!("Attempt {attempt}/{max_attempts}: planning research on \"{topic}\""),
            )
            .await?;

            let plan = self.planner.plan(topic, feedback.as_deref()).await?;
            self.log(
                job_id,
                LogLevel::Info,
                format!("Plan created with {} step(s)", plan.steps.len()),
            )
            .await?;
            self.store.apply(job_id, JobUpdate::Plan(plan.clone())).await?;
            self.store
                .apply(job_id, JobUpdate::Status(JobStatus::Executing))
                .await?;

            let findings = self.execute_plan(job_id, topic, &plan).await?;

            self.store
                .apply(job_id, JobUpdate::Status(JobStatus::Verifying))
                .await?;
            self.log(
                job_id,
                LogLevel::Info,
                format!("Verifying {} finding(s)", findings.len()),
            )
            .await?;
            let verdict = self.verifier.verify(topic, &plan, &findings).await?;

            if verdict.passed {
                let report = match verdict.report {
                    Some(report) => report,
                    None => {
                        self.log(
                            job_id,
                            LogLevel::Info,
                            "Verification passed without a report, synthesizing one",
                        )
                        .await?;
                        self.reporter.generate(topic, &findings).await?
                    }
                };
                self.log(job_id, LogLevel::Info, "Verification passed").await?;
                self.store
                    .apply(job_id, JobUpdate::Complete { report })
                    .await?;
                return Ok(());
            }

            let reason = verdict.feedback.clone().unwrap_or_default();
            self.log(
                job_id,
                LogLevel::Warning,
                format!("Verification failed: {reason}"),
            )
            .await?;

            match self
                .recovery
                .after_failed_verification(attempt, &findings, verdict.feedback.as_deref())
            {
                RecoveryAction::Replan { feedback: next } => {
                    feedback = Some(next);
                }
                RecoveryAction::FallbackReport => {
                    self.log(
                        job_id,
                        LogLevel::Warning,
                        format!(
                            "Attempts exhausted, building fallback report from {} finding(s)",
                            findings.len()
                        ),
                    )
                    .await?;
                    let report = self.reporter.generate(topic, &findings).await?;
                    self.store
                        .apply(job_id, JobUpdate::Complete { report })
                        .await?;
                    return Ok(());
                }
                RecoveryAction::Abort(reason) => {
                    tracing::warn!(job_id = %job_id, reason = %reason, "Aborting job");
                    return Err(AgentError::EmptyFindings);
                }
            }
        }
    }

    /// 按调度顺序串行执行全部步骤，返回本轮 Findings
    async fn execute_plan(
        &self,
        job_id: &str,
        topic: &str,
        plan: &Plan,
    ) -> Result<Findings, AgentError> {
        let mut findings = Findings::new();
        let order = self.scheduler.order(plan);
        let total = order.len();

        for (n, idx) in order.into_iter().enumerate() {
            let Some(step) = plan.steps.get(idx) else {
                continue;
            };
            self.store
                .apply(
                    job_id,
                    JobUpdate::Step {
                        step_id: step.id.clone(),
                        status: StepStatus::Active,
                        result: None,
                    },
                )
                .await?;
            self.log(
                job_id,
                LogLevel::Info,
                format!(
                    "Step {}/{} [{}] {}: {}",
                    n + 1,
                    total,
                    step.id,
                    step.tool.as_str(),
                    step.description
                ),
            )
            .await?;

            let result = self.executor.execute(topic, step, &findings).await;
            tracing::debug!(job_id = %job_id, step = %step.id, chars = result.len(), "Step finished");
            findings.insert(&step.id, &step.description, result.clone());
            self.store
                .apply(
                    job_id,
                    JobUpdate::Step {
                        step_id: step.id.clone(),
                        status: StepStatus::Completed,
                        result: Some(result),
                    },
                )
                .await?;

            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
        }
        Ok(findings)
    }

    /// 同时写 tracing 与任务日志
    async fn log(
        &self,
        job_id: &str,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<(), AgentError> {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(job_id = %job_id, "{}", message),
            LogLevel::Warning => tracing::warn!(job_id = %job_id, "{}", message),
            LogLevel::Error => tracing::error!(job_id = %job_id, "{}", message),
        }
        self.store.append_log(job_id, level, &message).await?;
        Ok(())
    }

    async fn log_quietly(&self, job_id: &str, level: LogLevel, message: &str) {
        if let Err(e) = self.log(job_id, level, message).await {
            tracing::debug!(job_id = %job_id, error = %e, "Could not append log entry");
        }
    }
}
