//! 并发调度器
//!
//! 先进先出的任务队列，受以下条件共同约束：
//!
//! - 同时运行的任务数上限 `max_concurrent`
//! - 令牌桶 [`RateLimiter`]
//! - 每个任务启动前的随机抖动延迟
//! - 可选的全局临时限流窗口（由限流/服务端错误触发）
//!
//! 任务按入队顺序*启动*，完成顺序不做保证。

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{log_best_effort, Result, TranslationError};
use crate::rate_limiter::RateLimiter;
use crate::types::LimitsConfig;

/// 调度器运行时配置的局部更新，`None` 表示保持不变。
#[derive(Debug, Clone, Default)]
pub struct SchedulerUpdate {
    pub max_concurrent: Option<usize>,
    pub jitter_ms: Option<(u64, u64)>,
    pub rps: Option<f64>,
    pub burst: Option<u32>,
}

impl From<&LimitsConfig> for SchedulerUpdate {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_concurrent: Some(limits.max_concurrent),
            jitter_ms: Some((limits.jitter_ms[0], limits.jitter_ms[1])),
            rps: Some(limits.rps),
            burst: Some(limits.burst),
        }
    }
}

/// 调度器状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub running: usize,
    pub queued: usize,
    pub effective_rate: f64,
    pub burst_capacity: u32,
    /// 剩余的临时限流时长，0 表示未限流
    pub throttled_for_ms: u64,
    /// 累计触发临时限流的次数
    pub throttle_activations: u64,
    pub closed: bool,
}

/// 类型擦除后的排队任务。
trait Job: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
    fn reject(self: Box<Self>, error: TranslationError);
}

struct TaskSlot<F, T> {
    operation: F,
    result_tx: oneshot::Sender<Result<T>>,
}

impl<F, Fut, T> Job for TaskSlot<F, T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let TaskSlot {
            operation,
            result_tx,
        } = *self;
        Box::pin(async move {
            let result = operation().await;
            log_best_effort(
                "deliver task result",
                result_tx.send(result).map_err(|_| "receiver dropped"),
            );
        })
    }

    fn reject(self: Box<Self>, error: TranslationError) {
        log_best_effort(
            "deliver task rejection",
            self.result_tx.send(Err(error)).map_err(|_| "receiver dropped"),
        );
    }
}

struct QueuedTask {
    job: Box<dyn Job>,
    cancel: Option<CancellationToken>,
}

struct SchedulerState {
    queue: VecDeque<QueuedTask>,
    running: usize,
    max_concurrent: usize,
    jitter_ms: (u64, u64),
    throttle_until: Option<Instant>,
    throttle_activations: u64,
    closed: bool,
}

struct Inner {
    state: Mutex<SchedulerState>,
    limiter: RateLimiter,
}

/// 并发调度器
///
/// 显式构造后以 `Arc` 共享给编排器等调用方；配置可在运行时热更新，
/// 不会丢失已排队的任务。必须在 Tokio 运行时内使用。
#[derive(Clone)]
pub struct ConcurrencyScheduler {
    inner: Arc<Inner>,
}

fn normalize_jitter((min, max): (u64, u64)) -> (u64, u64) {
    (min, max.max(min))
}

impl ConcurrencyScheduler {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState {
                    queue: VecDeque::new(),
                    running: 0,
                    max_concurrent: limits.max_concurrent.max(1),
                    jitter_ms: normalize_jitter((limits.jitter_ms[0], limits.jitter_ms[1])),
                    throttle_until: None,
                    throttle_activations: 0,
                    closed: false,
                }),
                limiter: RateLimiter::new(limits.rps, limits.burst),
            }),
        }
    }

    /// 提交任务，返回其结果的 future。
    ///
    /// 任务在调用时同步入队，因此多个 `enqueue` 的启动顺序与调用顺序一致，
    /// 与返回的 future 何时被 poll 无关。
    ///
    /// * 调度器已关闭：返回 `SchedulerClosed`
    /// * 启动前 `cancel` 已触发：返回 `Cancelled`，不占用并发槽位也不消耗令牌
    /// * 排队期间 `cancel` 触发：立即返回 `Cancelled`，并把任务移出队列
    pub fn enqueue<F, Fut, T>(
        &self,
        operation: F,
        cancel: Option<CancellationToken>,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, mut result_rx) = oneshot::channel();
        let job = Box::new(TaskSlot {
            operation,
            result_tx,
        });
        let watch = cancel.clone();
        let accepted = self.push(QueuedTask { job, cancel });
        let inner = Arc::clone(&self.inner);

        async move {
            accepted?;
            let received = match watch {
                Some(token) => tokio::select! {
                    biased;
                    received = &mut result_rx => received,
                    _ = token.cancelled() => {
                        Inner::prune_cancelled(&inner);
                        return Err(TranslationError::Cancelled);
                    }
                },
                None => result_rx.await,
            };
            received.unwrap_or_else(|_| {
                Err(TranslationError::Custom(
                    "scheduled task dropped before completion".into(),
                ))
            })
        }
    }

    fn push(&self, task: QueuedTask) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(TranslationError::SchedulerClosed);
            }
            state.queue.push_back(task);
        }
        Inner::pump(&self.inner);
        Ok(())
    }

    /// 热更新配置。已排队任务的顺序不受影响；并发上限调大后立即派发更多任务。
    pub fn update_config(&self, update: SchedulerUpdate) {
        {
            let mut state = self.inner.state.lock();
            if let Some(max) = update.max_concurrent {
                state.max_concurrent = max.max(1);
            }
            if let Some(range) = update.jitter_ms {
                state.jitter_ms = normalize_jitter(range);
            }
        }
        if update.rps.is_some() || update.burst.is_some() {
            let rps = update.rps.unwrap_or_else(|| self.inner.limiter.rate());
            let burst = update.burst.unwrap_or_else(|| self.inner.limiter.capacity());
            self.inner.limiter.set_rate(rps, burst);
        }
        debug!(?update, "scheduler config updated");
        Inner::pump(&self.inner);
    }

    /// 进入临时限流：`duration` 内即将启动的任务都先等待窗口结束。
    ///
    /// 多次调用以最后一次为准（不取最大值）。
    pub fn throttle_temporarily(&self, duration: Duration) {
        let until = Instant::now() + duration;
        {
            let mut state = self.inner.state.lock();
            state.throttle_until = Some(until);
            state.throttle_activations += 1;
        }
        info!(duration_ms = duration.as_millis() as u64, "scheduler throttled temporarily");
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        let throttled_for_ms = state
            .throttle_until
            .map(|until| until.saturating_duration_since(Instant::now()).as_millis() as u64)
            .unwrap_or(0);
        SchedulerStats {
            running: state.running,
            queued: state.queue.len(),
            effective_rate: self.inner.limiter.rate(),
            burst_capacity: self.inner.limiter.capacity(),
            throttled_for_ms,
            throttle_activations: state.throttle_activations,
            closed: state.closed,
        }
    }

    /// 停止接收新任务，并以 `SchedulerClosed` 拒绝所有尚未启动的任务。
    /// 正在运行的任务不受影响。
    pub fn close(&self) {
        let drained: Vec<QueuedTask> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.queue.drain(..).collect()
        };
        info!(rejected = drained.len(), "scheduler closed");
        for task in drained {
            task.job.reject(TranslationError::SchedulerClosed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }
}

/// 任务结束（含 panic）时释放并发槽位并继续派发。
struct SlotGuard {
    inner: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.state.lock().running -= 1;
        Inner::pump(&self.inner);
    }
}

impl Inner {
    /// 在有空闲槽位且队列非空时，按FIFO顺序启动任务。
    fn pump(self: &Arc<Self>) {
        let mut to_start = Vec::new();
        let mut cancelled = Vec::new();
        {
            let mut state = self.state.lock();
            while state.running < state.max_concurrent {
                let Some(task) = state.queue.pop_front() else {
                    break;
                };
                if task.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                    cancelled.push(task);
                    continue;
                }
                state.running += 1;
                to_start.push(task);
            }
        }

        for task in cancelled {
            task.job.reject(TranslationError::Cancelled);
        }
        for task in to_start {
            let guard = SlotGuard {
                inner: Arc::clone(self),
            };
            tokio::spawn(async move {
                let _guard = guard;
                let inner = Arc::clone(&_guard.inner);
                let admitted = match &task.cancel {
                    Some(token) => tokio::select! {
                        biased;
                        _ = token.cancelled() => false,
                        _ = inner.admit() => true,
                    },
                    None => {
                        inner.admit().await;
                        true
                    }
                };
                if admitted {
                    task.job.run().await;
                } else {
                    task.job.reject(TranslationError::Cancelled);
                }
            });
        }
    }

    /// 把令牌已触发的排队任务移出队列并以 `Cancelled` 拒绝。
    /// 已启动的任务由各自的取消分支处理。
    fn prune_cancelled(&self) {
        let cancelled: Vec<QueuedTask> = {
            let mut state = self.state.lock();
            let (cancelled, kept): (VecDeque<_>, VecDeque<_>) = state
                .queue
                .drain(..)
                .partition(|task| task.cancel.as_ref().is_some_and(|c| c.is_cancelled()));
            state.queue = kept;
            cancelled.into_iter().collect()
        };
        if !cancelled.is_empty() {
            debug!(removed = cancelled.len(), "cancelled tasks removed from queue");
        }
        for task in cancelled {
            task.job.reject(TranslationError::Cancelled);
        }
    }

    /// 启动前的等待：临时限流窗口 -> 随机抖动 -> 令牌。
    async fn admit(&self) {
        loop {
            let until = self.state.lock().throttle_until;
            match until {
                Some(until) if until > Instant::now() => sleep_until(until).await,
                _ => break,
            }
        }

        let (min, max) = self.state.lock().jitter_ms;
        if max > 0 {
            let delay = rand::thread_rng().gen_range(min..=max);
            sleep(Duration::from_millis(delay)).await;
        }

        if let Err(e) = self.limiter.take(1).await {
            debug!(error = %e, "rate limiter rejected take(1)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limits(max_concurrent: usize) -> LimitsConfig {
        LimitsConfig {
            max_concurrent,
            rps: 1_000.0,
            burst: 1_000,
            jitter_ms: [0, 0],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_concurrent() {
        let scheduler = ConcurrencyScheduler::new(&limits(3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..20u64)
            .map(|i| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                scheduler.enqueue(
                    move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(10 + (i % 4) * 7)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(i)
                    },
                    None,
                )
            })
            .collect();

        let results = futures_util::future::join_all(futures).await;
        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_start_in_fifo_order() {
        let scheduler = ConcurrencyScheduler::new(&limits(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let futures: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                scheduler.enqueue(
                    move || async move {
                        order.lock().push(i);
                        Ok(())
                    },
                    None,
                )
            })
            .collect();
        futures_util::future::join_all(futures).await;
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_rejects_queued_and_keeps_running() {
        let scheduler = ConcurrencyScheduler::new(&limits(1));
        let running = scheduler.enqueue(
            || async {
                sleep(Duration::from_millis(100)).await;
                Ok("done")
            },
            None,
        );
        let queued = scheduler.enqueue(|| async { Ok("never") }, None);

        // 让第一个任务进入运行状态
        tokio::task::yield_now().await;
        sleep(Duration::from_millis(1)).await;
        assert_eq!(scheduler.stats().running, 1);

        scheduler.close();
        assert_eq!(queued.await, Err(TranslationError::SchedulerClosed));
        assert_eq!(running.await, Ok("done"));

        let late = scheduler.enqueue(|| async { Ok(()) }, None).await;
        assert_eq!(late, Err(TranslationError::SchedulerClosed));
        assert!(scheduler.stats().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_does_not_consume_token() {
        let mut config = limits(1);
        config.rps = 1.0;
        config.burst = 1;
        let scheduler = ConcurrencyScheduler::new(&config);

        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let result = scheduler
            .enqueue(
                move || async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                Some(token),
            )
            .await;

        assert_eq!(result, Err(TranslationError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.rate_limiter().tokens(), 1.0);
        assert_eq!(scheduler.stats().running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_while_waiting_for_throttle_rejects() {
        let scheduler = ConcurrencyScheduler::new(&limits(2));
        scheduler.throttle_temporarily(Duration::from_secs(30));

        let token = CancellationToken::new();
        let pending = scheduler.enqueue(|| async { Ok(1) }, Some(token.clone()));
        let canceller = async {
            sleep(Duration::from_millis(50)).await;
            token.cancel();
        };
        let (result, ()) = tokio::join!(pending, canceller);
        assert_eq!(result, Err(TranslationError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_queued_task_releases_it_without_a_free_slot() {
        let scheduler = ConcurrencyScheduler::new(&limits(1));
        let gate = CancellationToken::new();
        let blocker = {
            let gate = gate.clone();
            scheduler.enqueue(
                move || async move {
                    gate.cancelled().await;
                    Ok(())
                },
                None,
            )
        };

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let token = CancellationToken::new();
        let queued = scheduler.enqueue(
            move || async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Some(token.clone()),
        );

        sleep(Duration::from_millis(1)).await;
        assert_eq!(scheduler.stats().running, 1);
        assert_eq!(scheduler.stats().queued, 1);

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), queued).await;
        assert_eq!(result, Ok(Err(TranslationError::Cancelled)));
        assert_eq!(scheduler.stats().queued, 0);
        assert_eq!(scheduler.stats().running, 1);

        gate.cancel();
        assert_eq!(blocker.await, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_delays_task_start() {
        let scheduler = ConcurrencyScheduler::new(&limits(2));
        scheduler.throttle_temporarily(Duration::from_millis(500));
        assert!(scheduler.stats().throttled_for_ms > 0);
        assert_eq!(scheduler.stats().throttle_activations, 1);

        let start = Instant::now();
        scheduler.enqueue(|| async { Ok(()) }, None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(scheduler.stats().throttled_for_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn raising_max_concurrent_dispatches_queued_tasks() {
        let scheduler = ConcurrencyScheduler::new(&limits(1));
        let gate = CancellationToken::new();
        let blocked: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                scheduler.enqueue(
                    move || async move {
                        gate.cancelled().await;
                        Ok(())
                    },
                    None,
                )
            })
            .collect();

        sleep(Duration::from_millis(1)).await;
        assert_eq!(scheduler.stats().running, 1);
        assert_eq!(scheduler.stats().queued, 2);

        scheduler.update_config(SchedulerUpdate {
            max_concurrent: Some(3),
            rps: Some(5.0),
            ..Default::default()
        });
        sleep(Duration::from_millis(1)).await;
        let stats = scheduler.stats();
        assert_eq!(stats.running, 3);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.effective_rate, 5.0);

        gate.cancel();
        for result in futures_util::future::join_all(blocked).await {
            assert!(result.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_stays_within_range() {
        let mut config = limits(1);
        config.jitter_ms = [100, 200];
        let scheduler = ConcurrencyScheduler::new(&config);
        for _ in 0..5 {
            let start = Instant::now();
            scheduler.enqueue(|| async { Ok(()) }, None).await.unwrap();
            let waited = start.elapsed();
            assert!(waited >= Duration::from_millis(100), "waited {waited:?}");
            assert!(waited <= Duration::from_millis(201), "waited {waited:?}");
        }
    }
}
