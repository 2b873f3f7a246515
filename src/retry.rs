//! 重试策略
//!
//! 指数退避 + 抖动的有限次重试，可插拔的可重试判定，以及与调度器组合的
//! [`scheduled_fetch`]：遇到限流/服务端错误时让整个调度器进入临时限流。

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, TranslationError};
use crate::scheduler::ConcurrencyScheduler;
use crate::types::RetryConfig;

/// `retry.throttle_on` 的默认值
pub const THROTTLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// 自定义可重试判定：`(错误, 即将进行的重试序号)`，序号从1开始
pub type RetryPredicate = Arc<dyn Fn(&TranslationError, u32) -> bool + Send + Sync>;

/// 每次重试前的观察回调
pub type RetryObserver = Arc<dyn Fn(&RetryEvent<'_>) + Send + Sync>;

/// 一次即将发生的重试
#[derive(Debug)]
pub struct RetryEvent<'a> {
    pub attempt: u32,
    pub delay_ms: u64,
    pub status: Option<u16>,
    pub error: &'a TranslationError,
}

/// 重试选项
#[derive(Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub retryable_status_codes: HashSet<u16>,
    /// 在 [`scheduled_fetch`] 中触发临时限流的状态码
    pub throttle_status_codes: HashSet<u16>,
    pub is_retriable: Option<RetryPredicate>,
    pub on_retry: Option<RetryObserver>,
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("jitter", &self.jitter)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("throttle_status_codes", &self.throttle_status_codes)
            .field("is_retriable", &self.is_retriable.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryOptions {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms.max(config.base_delay_ms),
            jitter: config.jitter,
            retryable_status_codes: config.retry_on.iter().copied().collect(),
            throttle_status_codes: config.throttle_on.iter().copied().collect(),
            is_retriable: None,
            on_retry: None,
        }
    }
}

impl RetryOptions {
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&TranslationError, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_retriable = Some(Arc::new(predicate));
        self
    }

    pub fn with_on_retry(mut self, observer: impl Fn(&RetryEvent<'_>) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// 默认判定：带状态码的错误看是否在 `retryable_status_codes` 中；
    /// 无状态码的网络错误可重试；取消、解析失败等其余错误不可重试。
    pub fn default_is_retriable(&self, error: &TranslationError) -> bool {
        match error {
            TranslationError::Status { code, .. } => self.retryable_status_codes.contains(code),
            TranslationError::Network(_) => true,
            TranslationError::Cancelled
            | TranslationError::Parse(_)
            | TranslationError::RetriesExhausted { .. }
            | TranslationError::SchedulerClosed
            | TranslationError::Config(_)
            | TranslationError::Custom(_) => false,
        }
    }

    /// 取消类错误无论自定义判定如何都不重试。
    fn should_retry(&self, error: &TranslationError, attempt: u32) -> bool {
        if error.is_cancelled() {
            return false;
        }
        match &self.is_retriable {
            Some(predicate) => predicate(error, attempt),
            None => self.default_is_retriable(error),
        }
    }
}

/// 计算第 `attempt` 次重试（从1开始）的退避延迟，单位毫秒。
///
/// `min(base * 2^(attempt-1), max)`；开启抖动时再随机上下浮动 10%~30%。
pub fn compute_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter: bool) -> u64 {
    let exponent = attempt.saturating_sub(1).min(63);
    let raw = base_delay_ms.saturating_mul(1u64 << exponent);
    let capped = raw.min(max_delay_ms);
    if !jitter || capped == 0 {
        return capped;
    }

    let mut rng = rand::thread_rng();
    let magnitude: f64 = rng.gen_range(0.1..=0.3);
    let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    (capped as f64 * (1.0 + sign * magnitude)).round().max(0.0) as u64
}

/// 带指数退避的重试
///
/// # 返回
///
/// * `Ok(T)` - 某次尝试成功
/// * `Err(RetriesExhausted)` - 可重试错误在用尽 `max_retries` 后仍失败
/// * `Err(e)` - 不可重试的错误，原样返回
pub async fn with_retry<F, Fut, T>(operation: F, options: &RetryOptions) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_loop(operation, options, None, |_| {}).await
}

/// 同 [`with_retry`]，退避等待期间响应取消。
pub async fn with_retry_cancellable<F, Fut, T>(
    operation: F,
    options: &RetryOptions,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_loop(operation, options, Some(cancel), |_| {}).await
}

async fn retry_loop<F, Fut, T, B>(
    mut operation: F,
    options: &RetryOptions,
    cancel: Option<&CancellationToken>,
    mut before_retry: B,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    B: FnMut(&TranslationError),
{
    let mut retries_done: u32 = 0;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let next_attempt = retries_done + 1;
        if !options.should_retry(&error, next_attempt) {
            return Err(error);
        }
        if retries_done >= options.max_retries {
            warn!(attempts = next_attempt, error = %error, "retries exhausted");
            return Err(TranslationError::RetriesExhausted {
                attempts: next_attempt,
                last: Box::new(error),
            });
        }

        retries_done = next_attempt;
        let delay_ms = compute_backoff_delay(
            retries_done,
            options.base_delay_ms,
            options.max_delay_ms,
            options.jitter,
        );
        before_retry(&error);
        if let Some(observer) = &options.on_retry {
            observer(&RetryEvent {
                attempt: retries_done,
                delay_ms,
                status: error.status(),
                error: &error,
            });
        }
        debug!(attempt = retries_done, delay_ms, error = %error, "retrying after backoff");

        let delay = Duration::from_millis(delay_ms);
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(TranslationError::Cancelled),
                    _ = sleep(delay) => {}
                }
            }
            None => sleep(delay).await,
        }
    }
}

/// 通过调度器执行带重试的操作
///
/// 每次尝试都重新排队；若失败状态码属于限流/服务端错误，在退避之前让调度器
/// 进入 `throttle_window` 的临时限流，从而保护所有并发任务。
pub async fn scheduled_fetch<F, Fut, T>(
    scheduler: &ConcurrencyScheduler,
    operation: F,
    options: &RetryOptions,
    throttle_window: Duration,
    cancel: Option<CancellationToken>,
) -> Result<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let operation = Arc::new(operation);
    retry_loop(
        || {
            let operation = Arc::clone(&operation);
            scheduler.enqueue(move || (*operation)(), cancel.clone())
        },
        options,
        cancel.as_ref(),
        |error| {
            if let Some(code) = error.status() {
                if options.throttle_status_codes.contains(&code) && !throttle_window.is_zero() {
                    scheduler.throttle_temporarily(throttle_window);
                }
            }
        },
    )
    .await
}
