//! 自定义端点提供方
//!
//! 请求体 `{inputs, sourceLang, targetLang, model}`，响应 `{outputs}` 或 `{data}`。

use futures_util::future::BoxFuture;
use reqwest::Client;
use tracing::debug;

use super::{check_status, expect_len, race_cancel, ProviderRequest, TranslationProvider};
use crate::error::{Result, TranslationError};
use crate::types::{EndpointRequest, EndpointResponse, ProviderConfig};

pub struct EndpointProvider {
    client: Client,
    config: ProviderConfig,
}

impl EndpointProvider {
    pub fn new(client: Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    async fn send(&self, request: &ProviderRequest) -> Result<Vec<String>> {
        let body = EndpointRequest {
            inputs: request.texts.clone(),
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
            model: self.config.model.clone(),
        };

        let mut builder = self
            .client
            .post(&self.config.api_url)
            .header("Accept", "application/json")
            .json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = check_status(builder.send().await?).await?;
        let text = response.text().await?;
        debug!(
            job_id = %request.job_id,
            inputs = request.texts.len(),
            bytes = text.len(),
            "endpoint responded"
        );
        parse_endpoint_response(&text, request.texts.len())
    }
}

/// 解析 `{outputs: [...]}` 或 `{data: [...]}`，并检查数量
pub fn parse_endpoint_response(text: &str, expected: usize) -> Result<Vec<String>> {
    let response: EndpointResponse = serde_json::from_str(text)?;
    let outputs = response
        .outputs
        .or(response.data)
        .ok_or_else(|| TranslationError::Parse("response has neither `outputs` nor `data`".into()))?;
    expect_len(outputs, expected)
}

impl TranslationProvider for EndpointProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_batch(&self) -> bool {
        self.config.batch
    }

    fn translate_batch(&self, request: ProviderRequest) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { race_cancel(&request.cancel, self.send(&request)).await })
    }
}
