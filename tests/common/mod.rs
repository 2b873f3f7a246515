//! 集成测试公共工具
//!
//! 提供可编排的内存提供方与快速测试配置。

#![allow(dead_code)]

use std::collections::VecDeque;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use translate_dispatch::{
    DispatchConfig, LimitsConfig, ProviderRequest, Result, TranslationError, TranslationProvider,
};

/// 预设的单次调用行为，按调用顺序消费
pub enum Step {
    /// 正常翻译
    Succeed,
    Fail(TranslationError),
    /// 模拟无法解析的批量响应
    Malformed,
    /// 一直挂起直到请求被取消
    Hang,
}

/// 内存提供方：译文为 `<目标语言>:<原文>`，并记录每次调用的输入
#[derive(Default)]
pub struct ScriptedProvider {
    batch: bool,
    /// 包含该文本的调用返回 400
    poison: Option<&'static str>,
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            batch: true,
            ..Self::default()
        }
    }

    pub fn with_script(steps: Vec<Step>) -> Self {
        let provider = Self::new();
        provider.script.lock().extend(steps);
        provider
    }

    pub fn poisoned(text: &'static str) -> Self {
        Self {
            poison: Some(text),
            ..Self::new()
        }
    }

    /// 不支持批量请求的提供方
    pub fn single_only() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl TranslationProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "test"
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    fn translate_batch(&self, request: ProviderRequest) -> BoxFuture<'_, Result<Vec<String>>> {
        self.calls.lock().push(request.texts.clone());
        let step = self.script.lock().pop_front();
        Box::pin(async move {
            match step {
                Some(Step::Fail(error)) => return Err(error),
                Some(Step::Malformed) => {
                    return Err(TranslationError::Parse("not a JSON array".into()))
                }
                Some(Step::Hang) => {
                    request.cancel.cancelled().await;
                    return Err(TranslationError::Cancelled);
                }
                Some(Step::Succeed) | None => {}
            }
            if let Some(poison) = self.poison {
                if request.texts.iter().any(|t| t == poison) {
                    return Err(status(400));
                }
            }
            Ok(request
                .texts
                .iter()
                .map(|t| translated(&request.target_lang, t))
                .collect())
        })
    }
}

pub fn translated(target_lang: &str, text: &str) -> String {
    format!("{target_lang}:{text}")
}

pub fn status(code: u16) -> TranslationError {
    TranslationError::Status {
        code,
        message: format!("HTTP {code}"),
    }
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// 无抖动、高速率、短退避的配置，配合 `start_paused` 使用
pub fn test_config() -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.limits = LimitsConfig {
        max_concurrent: 4,
        rps: 1_000.0,
        burst: 100,
        jitter_ms: [0, 0],
    };
    config.retry.base_delay_ms = 100;
    config.retry.max_delay_ms = 1_000;
    config.retry.jitter = false;
    config.retry.throttle_window_ms = 500;
    config
}
