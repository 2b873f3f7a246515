//! 翻译编排器
//!
//! 对一次翻译调用：跳过无需翻译的片段，命中缓存的直接返回，其余按内容去重、
//! 按预算分批，经调度器与重试策略交给提供方；批量响应解析失败时仅对该批次
//! 回退为逐条请求。新结果先写入缓存，再放回所有原始位置，输出与输入逐项对齐。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::batch::{is_skippable_segment, split_by_budget, BatchBudget};
use crate::cache::{cache_key, CacheStats, ResultCache};
use crate::config::DispatchConfig;
use crate::error::{Result, TranslationError};
use crate::provider::{build_provider, ProviderRequest, TranslationProvider};
use crate::registry::JobRegistry;
use crate::retry::{scheduled_fetch, RetryOptions};
use crate::scheduler::{ConcurrencyScheduler, SchedulerStats};
use crate::types::BatchingConfig;

/// 一次翻译调用的参数
#[derive(Debug, Clone)]
pub struct TranslateParams {
    pub source_lang: String,
    pub target_lang: String,
    pub job_id: String,
}

impl TranslateParams {
    pub fn new(source_lang: &str, target_lang: &str, job_id: &str) -> Self {
        Self {
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            job_id: job_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Settings {
    retry: RetryOptions,
    throttle_window: Duration,
    batching: BatchingConfig,
}

impl From<&DispatchConfig> for Settings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            retry: RetryOptions::from(&config.retry),
            throttle_window: Duration::from_millis(config.retry.throttle_window_ms),
            batching: config.batching.clone(),
        }
    }
}

/// 编排器状态快照
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub scheduler: SchedulerStats,
    pub cache: CacheStats,
    pub active_jobs: usize,
}

/// 判断两个语言标签是否指同一语言
///
/// 比较主语言子标签（忽略大小写）；两边都带地区/文字子标签时还要求其一致，
/// 因此 `en` 与 `en-US` 相同，`zh-CN` 与 `zh-TW` 不同。`auto` 从不相同。
pub fn same_language(a: &str, b: &str) -> bool {
    fn split(tag: &str) -> (String, Option<String>) {
        let normalized = tag.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.split_once('-') {
            Some((primary, rest)) => (primary.to_string(), Some(rest.to_string())),
            None => (normalized, None),
        }
    }

    let (primary_a, rest_a) = split(a);
    let (primary_b, rest_b) = split(b);
    if primary_a.is_empty() || primary_a == "auto" || primary_a != primary_b {
        return false;
    }
    match (rest_a, rest_b) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

struct Pending {
    text: String,
    key: String,
    positions: Vec<usize>,
}

/// 翻译编排器
///
/// 调度器、缓存、作业注册表与提供方都由外部显式构造后传入，可在多个
/// 编排器之间共享。
pub struct Orchestrator {
    scheduler: ConcurrencyScheduler,
    cache: Arc<ResultCache<String>>,
    registry: Arc<JobRegistry>,
    provider: Arc<dyn TranslationProvider>,
    settings: RwLock<Settings>,
}

impl Orchestrator {
    pub fn new(
        scheduler: ConcurrencyScheduler,
        cache: Arc<ResultCache<String>>,
        registry: Arc<JobRegistry>,
        provider: Arc<dyn TranslationProvider>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            scheduler,
            cache,
            registry,
            provider,
            settings: RwLock::new(Settings::from(config)),
        }
    }

    /// 按配置构造全部服务对象与提供方
    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        config.validate()?;
        let provider = build_provider(&config.provider)?;
        Ok(Self::with_provider(config, provider))
    }

    /// 按配置构造服务对象，使用给定的提供方
    pub fn with_provider(config: &DispatchConfig, provider: Arc<dyn TranslationProvider>) -> Self {
        Self::new(
            ConcurrencyScheduler::new(&config.limits),
            Arc::new(ResultCache::new(&config.cache)),
            Arc::new(JobRegistry::new()),
            provider,
            config,
        )
    }

    /// 热更新 limits/retry/batching/cache 四个分组，不影响排队与进行中的任务。
    /// 提供方配置不参与热更新。
    pub fn apply_config(&self, config: &DispatchConfig) {
        self.scheduler.update_config((&config.limits).into());
        self.cache.update_options((&config.cache).into());
        *self.settings.write() = Settings::from(config);
        info!("configuration applied");
    }

    pub fn scheduler(&self) -> &ConcurrencyScheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &Arc<ResultCache<String>> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// 中止作业的所有排队与进行中的请求
    pub fn abort(&self, job_id: &str) -> usize {
        self.registry.abort(job_id)
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            scheduler: self.scheduler.stats(),
            cache: self.cache.stats(),
            active_jobs: self.registry.active_jobs().len(),
        }
    }

    /// 翻译单条文本
    pub async fn translate_text(&self, text: &str, params: &TranslateParams) -> Result<String> {
        let mut outputs = self.translate(&[text.to_string()], params).await;
        outputs.pop().unwrap_or(Err(TranslationError::Custom("no output produced".into())))
    }

    /// 翻译一组文本，返回与输入逐项对齐的结果。
    ///
    /// 单项失败不会影响其他项；同一内容的多个位置共享同一个结果。
    /// 作业被中止时，排队中与进行中的请求返回 `Cancelled` 且不写缓存；
    /// 中止前已完成的批次保留其结果。
    #[instrument(skip_all, fields(job_id = %params.job_id, inputs = inputs.len()))]
    pub async fn translate(&self, inputs: &[String], params: &TranslateParams) -> Vec<Result<String>> {
        let settings = self.settings.read().clone();
        let mut outputs: Vec<Option<Result<String>>> = vec![None; inputs.len()];

        let skip_all = settings.batching.skip_if_source_equals_target
            && same_language(&params.source_lang, &params.target_lang);

        let mut pending: Vec<Pending> = Vec::new();
        let mut pending_index: HashMap<&str, usize> = HashMap::new();
        let mut skipped = 0usize;
        let mut hits = 0usize;

        for (position, input) in inputs.iter().enumerate() {
            if skip_all || is_skippable_segment(input, settings.batching.min_segment_len) {
                outputs[position] = Some(Ok(input.clone()));
                skipped += 1;
                continue;
            }
            if let Some(&slot) = pending_index.get(input.as_str()) {
                pending[slot].positions.push(position);
                continue;
            }
            let key = cache_key(
                self.provider.id(),
                self.provider.model(),
                &params.source_lang,
                &params.target_lang,
                input,
            );
            if let Some(hit) = self.cache.get(&key) {
                outputs[position] = Some(Ok(hit));
                hits += 1;
                continue;
            }
            pending_index.insert(input.as_str(), pending.len());
            pending.push(Pending {
                text: input.clone(),
                key,
                positions: vec![position],
            });
        }

        info!(skipped, cache_hits = hits, unique_pending = pending.len(), "translation planned");

        if !pending.is_empty() {
            let guard = self.registry.track(&params.job_id);
            let cancel = guard.token().clone();
            let texts: Vec<String> = pending.iter().map(|p| p.text.clone()).collect();

            let results = if settings.batching.enabled && self.provider.supports_batch() {
                self.run_batched(texts, params, &settings, &cancel).await
            } else {
                self.run_each(texts, params, &settings, &cancel).await
            };
            drop(guard);

            for (item, result) in pending.into_iter().zip(results) {
                if let Ok(value) = &result {
                    self.cache.set(item.key, value.clone());
                }
                for position in item.positions {
                    outputs[position] = Some(result.clone());
                }
            }
        }

        outputs
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(TranslationError::Custom("no output produced".into()))))
            .collect()
    }

    async fn run_batched(
        &self,
        texts: Vec<String>,
        params: &TranslateParams,
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> Vec<Result<String>> {
        let chunks = split_by_budget(&texts, &BatchBudget::from(&settings.batching));
        debug!(chunks = chunks.len(), "split pending texts into chunks");
        let per_chunk = join_all(
            chunks
                .into_iter()
                .map(|chunk| self.run_chunk(chunk, params, settings, cancel)),
        )
        .await;
        per_chunk.into_iter().flatten().collect()
    }

    async fn run_chunk(
        &self,
        chunk: Vec<String>,
        params: &TranslateParams,
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> Vec<Result<String>> {
        let expected = chunk.len();
        let outcome = self
            .fetch::<Vec<String>, _>(chunk.clone(), params, settings, cancel, |provider, request| {
                Box::pin(async move { provider.translate_batch(request).await })
            })
            .await;

        match outcome {
            Ok(outputs) if outputs.len() == expected => outputs.into_iter().map(Ok).collect(),
            Ok(outputs) => {
                warn!(expected, got = outputs.len(), "batch length mismatch, falling back per item");
                self.run_each(chunk, params, settings, cancel).await
            }
            Err(e) if e.is_parse_failure() => {
                warn!(items = expected, error = %e, "batch parse failed, falling back per item");
                self.run_each(chunk, params, settings, cancel).await
            }
            Err(e) => vec![Err(e); expected],
        }
    }

    async fn run_each(
        &self,
        texts: Vec<String>,
        params: &TranslateParams,
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> Vec<Result<String>> {
        join_all(texts.into_iter().map(|text| {
            self.fetch::<String, _>(vec![text], params, settings, cancel, |provider, request| {
                Box::pin(async move { provider.translate_one(request).await })
            })
        }))
        .await
    }

    /// 经调度器与重试策略调用一次提供方；中止后才返回的成功结果按取消处理。
    async fn fetch<T, C>(
        &self,
        texts: Vec<String>,
        params: &TranslateParams,
        settings: &Settings,
        cancel: &CancellationToken,
        call: C,
    ) -> Result<T>
    where
        T: Send + 'static,
        C: Fn(
                Arc<dyn TranslationProvider>,
                ProviderRequest,
            ) -> BoxFuture<'static, Result<T>>
            + Send
            + Sync
            + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let request = ProviderRequest {
            texts,
            source_lang: params.source_lang.clone(),
            target_lang: params.target_lang.clone(),
            job_id: params.job_id.clone(),
            cancel: cancel.clone(),
        };
        let outcome = scheduled_fetch(
            &self.scheduler,
            move || call(Arc::clone(&provider), request.clone()),
            &settings.retry,
            settings.throttle_window,
            Some(cancel.clone()),
        )
        .await;
        match outcome {
            Ok(_) if cancel.is_cancelled() => Err(TranslationError::Cancelled),
            other => other,
        }
    }
}
