//! 类型定义模块
//!
//! 定义配置分组与各个提供方的请求/响应数据结构。

use serde::{Deserialize, Serialize};

/// 并发与速率限制配置
///
/// # 字段说明
///
/// * `max_concurrent` - 同时运行的最大请求数
/// * `rps` - 每秒持续请求数（令牌补充速率）
/// * `burst` - 突发容量（令牌桶上限）
/// * `jitter_ms` - 每个任务启动前的随机延迟区间 `[min, max]`，单位毫秒
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_concurrent: usize,
    pub rps: f64,
    pub burst: u32,
    pub jitter_ms: [u64; 2],
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            rps: 2.0,
            burst: 4,
            jitter_ms: [50, 250],
        }
    }
}

/// 重试配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// 视为可重试的状态码
    pub retry_on: Vec<u16>,
    /// 重试前让整个调度器进入临时限流的状态码
    pub throttle_on: Vec<u16>,
    /// 遇到限流/服务端错误时，整个调度器暂停的时长
    pub throttle_window_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: true,
            retry_on: vec![429, 500, 502, 503, 504],
            throttle_on: crate::retry::THROTTLE_STATUS_CODES.to_vec(),
            throttle_window_ms: 5_000,
        }
    }
}

/// 批处理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub enabled: bool,
    pub max_items: usize,
    pub max_chars: usize,
    pub token_budget: usize,
    /// 去除首尾空白后短于该长度的片段直接原样返回
    pub min_segment_len: usize,
    /// 源语言与目标语言相同时跳过翻译
    pub skip_if_source_equals_target: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_items: 20,
            max_chars: 4_000,
            token_budget: 1_500,
            min_segment_len: 1,
            skip_if_source_equals_target: true,
        }
    }
}

/// 结果缓存配置
///
/// `ttl_ms <= 0` 表示永不过期。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub size: usize,
    pub ttl_ms: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 1_000,
            ttl_ms: 3_600_000,
        }
    }
}

/// 提供方类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// 自定义端点：`{inputs, sourceLang, targetLang, model}` -> `{outputs}` 或 `{data}`
    Endpoint,
    /// chat/completions 风格端点
    Chat,
}

/// 提供方配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// 提供方标识，参与缓存键计算
    pub id: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// 该提供方是否接受批量请求
    pub batch: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Endpoint,
            id: "endpoint".to_string(),
            api_url: "http://localhost:1188/translate".to_string(),
            api_key: None,
            model: "default".to_string(),
            timeout_secs: 30,
            batch: true,
        }
    }
}

/// 自定义端点请求体
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRequest {
    pub inputs: Vec<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub model: String,
}

/// 自定义端点响应体，`outputs` 与 `data` 二选一
#[derive(Debug, Deserialize)]
pub struct EndpointResponse {
    #[serde(default)]
    pub outputs: Option<Vec<String>>,
    #[serde(default)]
    pub data: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatReply,
}

#[derive(Debug, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub content: Option<String>,
}
