//! 作业注册表
//!
//! 按作业ID登记取消句柄，使同一作业下所有排队中与进行中的请求可以一起中止。
//! 作业的最后一个句柄注销后，该作业ID从表中移除。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 注册表分配的句柄编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

/// 作业注册表
///
/// 所有变更（注册、注销、中止）都在同一把锁内完成，彼此原子。
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, HashMap<HandleId, CancellationToken>>>,
    next_id: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为作业登记一个取消句柄
    pub fn register(&self, job_id: &str, handle: CancellationToken) -> HandleId {
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.jobs
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .insert(id, handle);
        id
    }

    /// 注销句柄；作业没有剩余句柄时删除整个条目。返回句柄是否仍在表中。
    pub fn unregister(&self, job_id: &str, id: HandleId) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(handles) = jobs.get_mut(job_id) else {
            return false;
        };
        let removed = handles.remove(&id).is_some();
        if handles.is_empty() {
            jobs.remove(job_id);
        }
        removed
    }

    /// 中止作业：取消该作业当前登记的每个句柄，然后清除条目。
    ///
    /// 返回被取消的句柄数。
    pub fn abort(&self, job_id: &str) -> usize {
        let handles = self.jobs.lock().remove(job_id);
        let Some(handles) = handles else {
            debug!(job_id, "abort requested for unknown job");
            return 0;
        };
        let count = handles.len();
        for token in handles.into_values() {
            token.cancel();
        }
        info!(job_id, handles = count, "job aborted");
        count
    }

    /// 登记一个新令牌，返回在析构时自动注销的守卫
    pub fn track(self: &Arc<Self>, job_id: &str) -> JobGuard {
        let token = CancellationToken::new();
        let id = self.register(job_id, token.clone());
        JobGuard {
            registry: Arc::clone(self),
            job_id: job_id.to_string(),
            id,
            token,
        }
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.jobs.lock().contains_key(job_id)
    }

    pub fn handle_count(&self, job_id: &str) -> usize {
        self.jobs.lock().get(job_id).map_or(0, HashMap::len)
    }

    pub fn active_jobs(&self) -> Vec<String> {
        self.jobs.lock().keys().cloned().collect()
    }
}

/// [`JobRegistry::track`] 返回的守卫
pub struct JobGuard {
    registry: Arc<JobRegistry>,
    job_id: String,
    id: HandleId,
    token: CancellationToken,
}

impl JobGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.job_id, self.id);
    }
}
