//! 错误处理模块
//!
//! 定义调度、重试、缓存与批处理过程中使用的错误类型。
//! 重试分类与批次回退都依赖这里的变体，而不是对错误消息做字符串匹配。

use std::fmt::Display;

use thiserror::Error;
use tracing::{debug, warn};

/// 翻译错误类型
///
/// # 变体说明
///
/// * `Cancelled` - 所属任务被取消，永不重试
/// * `Network` - 传输层失败（无状态码），默认可重试
/// * `Status` - 服务端返回了非成功状态码
/// * `Parse` - 批量响应无法解析为等长数组，触发逐条回退
/// * `RetriesExhausted` - 重试次数耗尽，携带最后一次错误
/// * `SchedulerClosed` - 调度器已关闭
/// * `Config` - 配置无效
/// * `Custom` - 自定义错误消息
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationError {
    /// 任务被取消
    #[error("operation cancelled")]
    Cancelled,
    /// 网络请求失败
    #[error("network error: {0}")]
    Network(String),
    /// API响应错误
    #[error("API error {code}: {message}")]
    Status {
        /// HTTP状态码
        code: u16,
        /// 错误消息
        message: String,
    },
    /// 解析错误
    #[error("parse error: {0}")]
    Parse(String),
    /// 重试耗尽
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// 总尝试次数（含首次）
        attempts: u32,
        /// 最后一次失败
        last: Box<TranslationError>,
    },
    /// 调度器已关闭
    #[error("scheduler closed")]
    SchedulerClosed,
    /// 配置错误
    #[error("config error: {0}")]
    Config(String),
    /// 自定义错误消息
    #[error("{0}")]
    Custom(String),
}

impl TranslationError {
    /// 错误携带的HTTP状态码；对 `RetriesExhausted` 返回最后一次失败的状态码。
    pub fn status(&self) -> Option<u16> {
        match self {
            TranslationError::Status { code, .. } => Some(*code),
            TranslationError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            TranslationError::Cancelled => true,
            TranslationError::RetriesExhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }

    /// 是否为批量响应解析失败（触发逐条回退）
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, TranslationError::Parse(_))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, TranslationError::RetriesExhausted { .. })
    }

    /// 去掉 `RetriesExhausted` 包装，返回原始错误
    pub fn into_last(self) -> TranslationError {
        match self {
            TranslationError::RetriesExhausted { last, .. } => last.into_last(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for TranslationError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => TranslationError::Status {
                code: status.as_u16(),
                message: error.to_string(),
            },
            None => TranslationError::Network(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for TranslationError {
    fn from(error: serde_json::Error) -> Self {
        TranslationError::Parse(error.to_string())
    }
}

impl From<String> for TranslationError {
    fn from(error: String) -> Self {
        TranslationError::Custom(error)
    }
}

impl From<&str> for TranslationError {
    fn from(error: &str) -> Self {
        TranslationError::Custom(error.to_string())
    }
}

/// 翻译结果类型别名
///
/// # 示例
///
/// ```rust
/// use translate_dispatch::{Result, TranslationError};
///
/// fn example_function() -> Result<String> {
///     Err(TranslationError::Cancelled)
/// }
///
/// assert!(example_function().unwrap_err().is_cancelled());
/// ```
pub type Result<T> = std::result::Result<T, TranslationError>;

/// 尽力而为：失败只记录日志，调用方继续执行。
///
/// 用于那些失败不影响正确性的副作用（例如向已放弃等待的接收方投递结果）。
pub fn log_best_effort<E: Display>(context: &str, result: std::result::Result<(), E>) {
    if let Err(e) = result {
        debug!(context, error = %e, "best-effort operation failed, continuing");
    }
}

/// 同 [`log_best_effort`]，但以 `warn` 级别记录，用于用户可能关心的失败。
pub fn warn_best_effort<E: Display>(context: &str, result: std::result::Result<(), E>) {
    if let Err(e) = result {
        warn!(context, error = %e, "best-effort operation failed, continuing");
    }
}
