//! # Translate Dispatch
//!
//! 翻译请求调度库：在限速、限并发、可重试、可中止的前提下，把大量文本片段
//! 分批交给翻译提供方，并缓存结果。
//!
//! ## 主要特性
//!
//! - **令牌桶限速**: 每秒速率与突发容量可热更新
//! - **并发调度**: FIFO 排队、并发上限、派发抖动，遇到限流时整体暂停
//! - **重试策略**: 指数退避加抖动，可自定义重试判定与重试回调
//! - **结果缓存**: LRU + TTL，容量与过期时间可热更新
//! - **按预算分批**: 条数、字符数与估算token数三重上限
//! - **作业中止**: 按作业ID一次取消所有排队中与进行中的请求
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use translate_dispatch::{DispatchConfig, Orchestrator, TranslateParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatchConfig::load_from_default_locations();
//!     let orchestrator = Orchestrator::from_config(&config)?;
//!
//!     let params = TranslateParams::new("en", "zh", "page-1");
//!     let inputs = vec!["Hello, world!".to_string(), "Goodbye".to_string()];
//!     for result in orchestrator.translate(&inputs, &params).await {
//!         match result {
//!             Ok(text) => println!("{text}"),
//!             Err(e) => eprintln!("failed: {e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## 配置文件支持
//!
//! ```toml
//! [limits]
//! max_concurrent = 4
//! rps = 2.0
//! burst = 4
//! jitter_ms = [50, 250]
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 500
//! max_delay_ms = 8000
//!
//! [provider]
//! kind = "endpoint"
//! api_url = "http://localhost:1188/translate"
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use batch::{split_by_budget, BatchBudget};
pub use cache::{cache_key, CacheStats, CacheUpdate, ResultCache};
pub use config::DispatchConfig;
pub use error::{Result, TranslationError};
pub use orchestrator::{same_language, Orchestrator, OrchestratorStats, TranslateParams};
pub use provider::{build_provider, ProviderRequest, TranslationProvider};
pub use rate_limiter::RateLimiter;
pub use registry::{JobGuard, JobRegistry};
pub use retry::{
    compute_backoff_delay, scheduled_fetch, with_retry, with_retry_cancellable, RetryEvent,
    RetryOptions,
};
pub use scheduler::{ConcurrencyScheduler, SchedulerStats, SchedulerUpdate};
pub use types::{
    BatchingConfig, CacheConfig, LimitsConfig, ProviderConfig, ProviderKind, RetryConfig,
};
