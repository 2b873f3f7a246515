//! 令牌桶速率限制器
//!
//! 控制持续吞吐（每秒请求数）与突发容量。令牌只会随时间补充而增加，
//! 只会在 `take` 成功时减少，任何时刻都满足 `0 <= tokens <= capacity`。

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::error::{Result, TranslationError};

/// 单次等待的最长时间；等待被切片以便及时感知速率变化。
const MAX_WAIT_SLICE: Duration = Duration::from_millis(250);

/// 速率下限，防止除零或无限等待。
const MIN_RATE: f64 = 0.001;

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// 速率限制器
///
/// 用于控制API请求频率，防止超出服务提供商的速率限制。
///
/// # 示例
///
/// ```rust
/// use translate_dispatch::RateLimiter;
///
/// # tokio_test::block_on(async {
/// let limiter = RateLimiter::new(10.0, 2); // 每秒10个请求，突发2个
/// limiter.take(1).await.unwrap();
/// assert!(limiter.tokens() <= 2.0);
/// # });
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

fn sanitize_rate(rate_per_sec: f64) -> f64 {
    if rate_per_sec.is_finite() && rate_per_sec > 0.0 {
        rate_per_sec
    } else {
        warn!(rate_per_sec, floor = MIN_RATE, "invalid refill rate, using floor");
        MIN_RATE
    }
}

impl RateLimiter {
    /// 创建新的速率限制器，初始令牌为满桶
    ///
    /// # 参数
    ///
    /// * `rate_per_sec` - 每秒补充的令牌数
    /// * `burst` - 桶容量，至少为1
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                capacity,
                refill_per_sec: sanitize_rate(rate_per_sec),
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 更新速率与容量。当前令牌数被截断到新容量以内，不会凭空增加。
    pub fn set_rate(&self, rate_per_sec: f64, burst: u32) {
        let mut bucket = self.bucket.lock();
        // 先按旧速率结算已流逝的时间
        bucket.refill(Instant::now());
        bucket.refill_per_sec = sanitize_rate(rate_per_sec);
        bucket.capacity = f64::from(burst.max(1));
        bucket.tokens = bucket.tokens.min(bucket.capacity);
    }

    /// 获取 `n` 个令牌，不足时等待补充。
    ///
    /// # 返回
    ///
    /// * `Ok(())` - 已扣除 `n` 个令牌
    /// * `Err(TranslationError::Config)` - `n` 为0
    pub async fn take(&self, n: u32) -> Result<()> {
        if n == 0 {
            return Err(TranslationError::Config("take(n) requires n > 0".into()));
        }
        let needed = f64::from(n);

        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                bucket.refill(Instant::now());
                if bucket.tokens >= needed {
                    bucket.tokens -= needed;
                    return Ok(());
                }
                // 大于容量的请求只能等到满桶后一次性扣除
                let target = needed.min(bucket.capacity);
                if bucket.tokens >= target {
                    bucket.tokens = 0.0;
                    return Ok(());
                }
                let shortfall = target - bucket.tokens;
                Duration::from_secs_f64(shortfall / bucket.refill_per_sec)
            };
            sleep(wait.min(MAX_WAIT_SLICE).max(Duration::from_millis(1))).await;
        }
    }

    /// 当前令牌数（会先结算补充）
    pub fn tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }

    pub fn rate(&self) -> f64 {
        self.bucket.lock().refill_per_sec
    }

    pub fn capacity(&self) -> u32 {
        self.bucket.lock().capacity as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_served_immediately() {
        let limiter = RateLimiter::new(1.0, 3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.take(1).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(limiter.tokens() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_refill_when_empty() {
        let limiter = RateLimiter::new(2.0, 1);
        limiter.take(1).await.unwrap();
        let start = Instant::now();
        limiter.take(1).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(490), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(600), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_stay_within_bounds() {
        let limiter = RateLimiter::new(50.0, 5);
        for i in 0..40 {
            limiter.take(1 + i % 2).await.unwrap();
            let tokens = limiter.tokens();
            assert!((0.0..=5.0).contains(&tokens), "tokens {tokens}");
        }
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.tokens(), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn set_rate_clamps_tokens_to_new_capacity() {
        let limiter = RateLimiter::new(1.0, 10);
        limiter.set_rate(1.0, 2);
        assert_eq!(limiter.tokens(), 2.0);
        assert_eq!(limiter.capacity(), 2);

        // 扩容不会凭空增加令牌
        limiter.set_rate(1.0, 20);
        assert_eq!(limiter.tokens(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_take_eventually_resolves() {
        let limiter = RateLimiter::new(4.0, 2);
        limiter.take(2).await.unwrap();
        limiter.take(5).await.unwrap();
        assert!(limiter.tokens() >= 0.0);
    }

    #[tokio::test]
    async fn zero_take_is_rejected() {
        let limiter = RateLimiter::new(1.0, 1);
        assert!(limiter.take(0).await.is_err());
    }

    #[test]
    fn invalid_rate_falls_back_to_floor() {
        let limiter = RateLimiter::new(0.0, 0);
        assert_eq!(limiter.rate(), MIN_RATE);
        assert_eq!(limiter.capacity(), 1);
    }
}
