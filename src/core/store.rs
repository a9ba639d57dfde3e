//! 任务存储：create / get / append_log / apply(发布) / subscribe
//!
//! 编排器只通过 JobStore 修改任务，状态机逻辑与存储实现解耦，日后可换成持久化实现。
//! InMemoryJobStore 在同一把锁内完成「修改 + 推送给订阅者」，因此订阅者看到的事件顺序即真实修改顺序；
//! 订阅时的历史回放与注册也在同一把锁内完成，不会漏事件也不会重复。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::core::error::StoreError;
use crate::core::events::JobEvent;
use crate::core::state::{Job, JobStatus, JobSummary, LogEntry, LogLevel, Plan, StepStatus};

/// 对任务的一次修改；每种修改对应发布的事件
#[derive(Debug, Clone)]
pub enum JobUpdate {
    /// 记录当前尝试轮次（随后的 Status 事件携带）
    Attempt(u32),
    /// 非终态迁移
    Status(JobStatus),
    /// 整体替换计划
    Plan(Plan),
    /// 步骤状态 / 结果
    Step {
        step_id: String,
        status: StepStatus,
        result: Option<String>,
    },
    /// 成功终态：同时写入报告
    Complete { report: String },
    /// 失败终态
    Fail { error: String },
    /// 取消终态
    Cancel,
}

/// 单个订阅：先吐出回放队列，再接收实时事件；Drop 时自动退订
pub struct Subscription {
    backlog: VecDeque<JobEvent>,
    rx: mpsc::UnboundedReceiver<JobEvent>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        backlog: VecDeque<JobEvent>,
        rx: mpsc::UnboundedReceiver<JobEvent>,
        on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
    ) -> Self {
        Self {
            backlog,
            rx,
            on_drop,
        }
    }

    /// 下一个事件；任务终态且事件取尽后返回 None
    pub async fn next(&mut self) -> Option<JobEvent> {
        if let Some(ev) = self.backlog.pop_front() {
            return Some(ev);
        }
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.on_drop.take() {
            unsubscribe();
        }
    }
}

/// 任务存储抽象
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 创建 queued 状态的新任务
    async fn create(&self, topic: &str) -> Job;

    async fn get(&self, id: &str) -> Option<Job>;

    /// 按创建时间排序的任务摘要
    async fn list(&self) -> Vec<JobSummary>;

    /// 追加日志并推送 log 事件
    async fn append_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
    ) -> Result<LogEntry, StoreError>;

    /// 应用修改并推送对应事件，返回修改后的快照
    async fn apply(&self, id: &str, update: JobUpdate) -> Result<Job, StoreError>;

    /// 订阅：回放全部日志，终态任务随后立即收到 result，否则收到当前 status，再接实时事件
    async fn subscribe(&self, id: &str) -> Result<Subscription, StoreError>;
}

struct JobRecord {
    job: Job,
    subscribers: HashMap<u64, mpsc::UnboundedSender<JobEvent>>,
}

impl JobRecord {
    fn publish(&mut self, event: JobEvent) {
        // 接收端已关闭的订阅者顺带清理
        self.subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    fn result_event(&self) -> JobEvent {
        JobEvent::Result {
            status: self.job.status,
            final_report: self.job.final_report.clone(),
            error: self.job.error.clone(),
        }
    }

    fn status_event(&self) -> JobEvent {
        JobEvent::Status {
            status: self.job.status,
            attempt: self.job.attempt,
        }
    }
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, JobRecord>,
    next_subscriber: u64,
}

/// 进程内任务存储（进程结束即丢失）
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前订阅者数量（连接断开后应回落）
    pub fn subscriber_count(&self, id: &str) -> usize {
        lock(&self.inner)
            .jobs
            .get(id)
            .map(|r| r.subscribers.len())
            .unwrap_or(0)
    }

    fn apply_locked(record: &mut JobRecord, update: JobUpdate) -> Result<(), StoreError> {
        let id = record.job.id.clone();
        if record.job.status.is_terminal() {
            return Err(StoreError::Terminal(id));
        }

        fn transition(record: &mut JobRecord, to: JobStatus) -> Result<(), StoreError> {
            let from = record.job.status;
            if !from.can_transition_to(to) {
                return Err(StoreError::InvalidTransition { from, to });
            }
            record.job.status = to;
            Ok(())
        }

        match update {
            JobUpdate::Attempt(n) => {
                record.job.attempt = n;
            }
            JobUpdate::Status(to) => {
                if to.is_terminal() {
                    return Err(StoreError::InvalidTransition {
                        from: record.job.status,
                        to,
                    });
                }
                transition(record, to)?;
                let ev = record.status_event();
                record.publish(ev);
            }
            JobUpdate::Plan(plan) => {
                record.job.plan = Some(plan.clone());
                record.publish(JobEvent::Plan(plan));
            }
            JobUpdate::Step {
                step_id,
                status,
                result,
            } => {
                let step = record
                    .job
                    .plan
                    .as_mut()
                    .and_then(|p| p.step_mut(&step_id))
                    .ok_or_else(|| StoreError::UnknownStep {
                        step: step_id.clone(),
                    })?;
                step.status = status;
                if result.is_some() {
                    step.result = result.clone();
                }
                record.publish(JobEvent::Step {
                    step_id,
                    status,
                    result,
                });
            }
            JobUpdate::Complete { report } => {
                transition(record, JobStatus::Completed)?;
                record.job.final_report = Some(report);
                let status = record.status_event();
                let result = record.result_event();
                record.publish(status);
                record.publish(result);
            }
            JobUpdate::Fail { error } => {
                transition(record, JobStatus::Failed)?;
                record.job.error = Some(error);
                let status = record.status_event();
                let result = record.result_event();
                record.publish(status);
                record.publish(result);
            }
            JobUpdate::Cancel => {
                transition(record, JobStatus::Cancelled)?;
                let status = record.status_event();
                let result = record.result_event();
                record.publish(status);
                record.publish(result);
            }
        }

        if record.job.status.is_terminal() {
            // 终态后不再有事件，关闭所有订阅者的发送端
            record.subscribers.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, topic: &str) -> Job {
        let job = Job::new(topic);
        let mut inner = lock(&self.inner);
        inner.jobs.insert(
            job.id.clone(),
            JobRecord {
                job: job.clone(),
                subscribers: HashMap::new(),
            },
        );
        job
    }

    async fn get(&self, id: &str) -> Option<Job> {
        lock(&self.inner).jobs.get(id).map(|r| r.job.clone())
    }

    async fn list(&self) -> Vec<JobSummary> {
        let inner = lock(&self.inner);
        let mut jobs: Vec<JobSummary> = inner.jobs.values().map(|r| r.job.summary()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    async fn append_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
    ) -> Result<LogEntry, StoreError> {
        let mut inner = lock(&self.inner);
        let record = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if record.job.status.is_terminal() {
            return Err(StoreError::Terminal(id.to_string()));
        }
        let entry = LogEntry {
            seq: record.job.logs.len() as u64,
            timestamp: Utc::now(),
            message: message.to_string(),
            level,
        };
        record.job.logs.push(entry.clone());
        record.publish(JobEvent::Log(entry.clone()));
        Ok(entry)
    }

    async fn apply(&self, id: &str, update: JobUpdate) -> Result<Job, StoreError> {
        let mut inner = lock(&self.inner);
        let record = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Self::apply_locked(record, update)?;
        Ok(record.job.clone())
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription, StoreError> {
        let mut inner = lock(&self.inner);
        let sub_id = inner.next_subscriber;
        inner.next_subscriber += 1;

        let record = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut backlog: VecDeque<JobEvent> =
            record.job.logs.iter().cloned().map(JobEvent::Log).collect();
        let (tx, rx) = mpsc::unbounded_channel();

        if record.job.status.is_terminal() {
            backlog.push_back(record.result_event());
            // tx 在此丢弃，回放取尽后流即结束
            return Ok(Subscription::new(backlog, rx, None));
        }

        backlog.push_back(record.status_event());
        record.subscribers.insert(sub_id, tx);

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let job_id = id.to_string();
        let on_drop = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(record) = lock(&inner).jobs.get_mut(&job_id) {
                    record.subscribers.remove(&sub_id);
                }
            }
        });
        Ok(Subscription::new(backlog, rx, Some(on_drop)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Step, ToolKind};

    fn plan_with(ids: &[&str]) -> Plan {
        Plan {
            reasoning: "r".into(),
            steps: ids
                .iter()
                .map(|id| Step {
                    id: id.to_string(),
                    description: format!("step {id}"),
                    tool: ToolKind::Analyze,
                    params: serde_json::json!({}),
                    depends_on: vec![],
                    status: StepStatus::Pending,
                    result: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryJobStore::new();
        let job = store.create("topic").await;
        let fetched = store.get(&job.id).await.unwrap();
        assert_eq!(fetched.topic, "topic");
        assert_eq!(fetched.status, JobStatus::Queued);
        assert!(store.get("missing").await.is_none());
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_log_seq_is_monotonic() {
        let store = InMemoryJobStore::new();
        let job = store.create("t").await;
        for i in 0..5 {
            let entry = store
                .append_log(&job.id, LogLevel::Info, &format!("m{i}"))
                .await
                .unwrap();
            assert_eq!(entry.seq, i);
        }
        assert_eq!(store.get(&job.id).await.unwrap().logs.len(), 5);
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let store = InMemoryJobStore::new();
        let job = store.create("t").await;
        let err = store
            .apply(&job.id, JobUpdate::Status(JobStatus::Executing))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Executing
            }
        );
        // Completed 只能通过 Complete 进入
        let err = store
            .apply(&job.id, JobUpdate::Status(JobStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_terminal_job_rejects_updates_and_logs() {
        let store = InMemoryJobStore::new();
        let job = store.create("t").await;
        store
            .apply(&job.id, JobUpdate::Fail { error: "x".into() })
            .await
            .unwrap();
        assert!(matches!(
            store.apply(&job.id, JobUpdate::Cancel).await,
            Err(StoreError::Terminal(_))
        ));
        assert!(matches!(
            store.append_log(&job.id, LogLevel::Info, "late").await,
            Err(StoreError::Terminal(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_sets_report() {
        let store = InMemoryJobStore::new();
        let job = store.create("t").await;
        store.apply(&job.id, JobUpdate::Status(JobStatus::Planning)).await.unwrap();
        store.apply(&job.id, JobUpdate::Status(JobStatus::Executing)).await.unwrap();
        store.apply(&job.id, JobUpdate::Status(JobStatus::Verifying)).await.unwrap();
        let done = store
            .apply(&job.id, JobUpdate::Complete { report: "# R".into() })
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.final_report.as_deref(), Some("# R"));
    }

    #[tokio::test]
    async fn test_step_update_requires_known_step() {
        let store = InMemoryJobStore::new();
        let job = store.create("t").await;
        store.apply(&job.id, JobUpdate::Plan(plan_with(&["a"]))).await.unwrap();
        let updated = store
            .apply(
                &job.id,
                JobUpdate::Step {
                    step_id: "a".into(),
                    status: StepStatus::Completed,
                    result: Some("done".into()),
                },
            )
            .await
            .unwrap();
        let step = updated.plan.unwrap().steps.remove(0);
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.result.as_deref(), Some("done"));

        assert!(matches!(
            store
                .apply(
                    &job.id,
                    JobUpdate::Step {
                        step_id: "zzz".into(),
                        status: StepStatus::Active,
                        result: None
                    }
                )
                .await,
            Err(StoreError::UnknownStep { .. })
        ));
    }

    #[tokio::test]
    async fn test_subscribe_replays_then_streams_live() {
        let store = InMemoryJobStore::new();
        let job = store.create("t").await;
        store.append_log(&job.id, LogLevel::Info, "one").await.unwrap();
        store.append_log(&job.id, LogLevel::Info, "two").await.unwrap();

        let mut sub = store.subscribe(&job.id).await.unwrap();
        store.append_log(&job.id, LogLevel::Info, "three").await.unwrap();

        let mut seqs = Vec::new();
        for _ in 0..2 {
            match sub.next().await.unwrap() {
                JobEvent::Log(entry) => seqs.push(entry.seq),
                other => panic!("expected log replay, got {other:?}"),
            }
        }
        assert!(matches!(
            sub.next().await.unwrap(),
            JobEvent::Status {
                status: JobStatus::Queued,
                ..
            }
        ));
        match sub.next().await.unwrap() {
            JobEvent::Log(entry) => seqs.push(entry.seq),
            other => panic!("expected live log, got {other:?}"),
        }
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_subscribe_to_terminal_job_gets_result_and_ends() {
        let store = InMemoryJobStore::new();
        let job = store.create("t").await;
        store.append_log(&job.id, LogLevel::Info, "hello").await.unwrap();
        store
            .apply(&job.id, JobUpdate::Fail { error: "bad".into() })
            .await
            .unwrap();

        let mut sub = store.subscribe(&job.id).await.unwrap();
        assert!(matches!(sub.next().await, Some(JobEvent::Log(_))));
        match sub.next().await {
            Some(JobEvent::Result { status, error, .. }) => {
                assert_eq!(status, JobStatus::Failed);
                assert_eq!(error.as_deref(), Some("bad"));
            }
            other => panic!("expected result, got {other:?}"),
        }
        assert!(sub.next().await.is_none());
        assert_eq!(store.subscriber_count(&job.id), 0);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let store = InMemoryJobStore::new();
        let job = store.create("t").await;
        let a = store.subscribe(&job.id).await.unwrap();
        let b = store.subscribe(&job.id).await.unwrap();
        assert_eq!(store.subscriber_count(&job.id), 2);
        drop(a);
        assert_eq!(store.subscriber_count(&job.id), 1);
        drop(b);
        assert_eq!(store.subscriber_count(&job.id), 0);
    }

    #[tokio::test]
    async fn test_live_subscriber_stream_ends_after_result() {
        let store = InMemoryJobStore::new();
        let job = store.create("t").await;
        let mut sub = store.subscribe(&job.id).await.unwrap();
        store.apply(&job.id, JobUpdate::Cancel).await.unwrap();

        let mut types = Vec::new();
        while let Some(ev) = sub.next().await {
            types.push(ev.event_type());
        }
        assert_eq!(types, vec!["status", "status", "result"]);
        assert_eq!(store.subscriber_count(&job.id), 0);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_job() {
        let store = InMemoryJobStore::new();
        assert!(matches!(
            store.subscribe("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
