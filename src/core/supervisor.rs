//! 任务监管：取消令牌管理
//!
//! 持有根 CancellationToken，每个任务拿到一个子 token；Ctrl+C 取消根 token 时所有任务一起取消，
//! 单个任务取消只影响自身。任务结束后释放其 token。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

/// 根 token 与按任务 ID 索引的子 token
#[derive(Debug, Default)]
pub struct JobSupervisor {
    root: CancellationToken,
    jobs: Mutex<HashMap<String, CancellationToken>>,
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 为任务注册子 token
    pub fn register(&self, job_id: &str) -> CancellationToken {
        let token = self.root.child_token();
        self.jobs().insert(job_id.to_string(), token.clone());
        token
    }

    /// 取消单个任务；任务未在运行时返回 false
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.jobs().get(job_id) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// 任务结束后释放 token
    pub fn release(&self, job_id: &str) {
        self.jobs().remove(job_id);
    }

    /// 取消全部任务（进程关闭）
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    #[cfg(test)]
    fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }

    #[cfg(test)]
    fn active_jobs(&self) -> usize {
        self.jobs().len()
    }
}
