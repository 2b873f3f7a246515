//! 翻译提供方
//!
//! 编排器只依赖 [`TranslationProvider`]：给定一批文本与语言参数，返回等长的
//! 译文数组。具体的请求格式、提示词与响应解析由各实现负责，并以结构化错误
//! 报告失败：带状态码的错误用于重试判定，`Parse` 触发逐条回退，`Cancelled`
//! 表示作业被中止。

mod chat;
mod endpoint;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TranslationError};
use crate::types::{ProviderConfig, ProviderKind};

pub use chat::{parse_json_array, ChatProvider};
pub use endpoint::{parse_endpoint_response, EndpointProvider};

/// 一次提供方调用
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub texts: Vec<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub job_id: String,
    pub cancel: CancellationToken,
}

/// 请求构造/响应解析协作者
pub trait TranslationProvider: Send + Sync {
    /// 提供方标识，参与缓存键
    fn id(&self) -> &str;

    /// 模型标识，参与缓存键
    fn model(&self) -> &str;

    /// 是否接受批量请求
    fn supports_batch(&self) -> bool {
        true
    }

    /// 批量翻译，成功时返回与 `texts` 等长的数组
    fn translate_batch(&self, request: ProviderRequest) -> BoxFuture<'_, Result<Vec<String>>>;

    /// 单条翻译；默认实现复用批量接口
    fn translate_one(&self, request: ProviderRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut outputs = self.translate_batch(request).await?;
            match outputs.len() {
                1 => Ok(outputs.remove(0)),
                n => Err(TranslationError::Parse(format!(
                    "expected 1 output for single request, got {n}"
                ))),
            }
        })
    }
}

/// 按配置构造提供方
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn TranslationProvider>> {
    let client = build_client(config.timeout_secs)?;
    Ok(match config.kind {
        ProviderKind::Endpoint => Arc::new(EndpointProvider::new(client, config.clone())),
        ProviderKind::Chat => Arc::new(ChatProvider::new(client, config.clone())),
    })
}

fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| TranslationError::Config(format!("failed to build HTTP client: {e}")))
}

/// 把HTTP调用与取消令牌赛跑
pub(crate) async fn race_cancel<T>(
    cancel: &CancellationToken,
    call: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TranslationError::Cancelled),
        result = call => result,
    }
}

/// 非2xx响应转为 `Status` 错误，截断过长的响应体
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
    Err(TranslationError::Status {
        code: status.as_u16(),
        message: body.chars().take(200).collect(),
    })
}

/// 检查译文数量与输入一致
pub(crate) fn expect_len(outputs: Vec<String>, expected: usize) -> Result<Vec<String>> {
    if outputs.len() == expected {
        Ok(outputs)
    } else {
        Err(TranslationError::Parse(format!(
            "expected {expected} outputs, got {}",
            outputs.len()
        )))
    }
}
