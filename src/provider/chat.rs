//! chat/completions 风格提供方
//!
//! 以 system + user 两条消息发送整批文本，要求模型只回复一个等长的JSON字符串数组。

use futures_util::future::BoxFuture;
use reqwest::Client;
use tracing::debug;

use super::{check_status, expect_len, race_cancel, ProviderRequest, TranslationProvider};
use crate::error::{Result, TranslationError};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, ProviderConfig};

const SYSTEM_PROMPT: &str = "You are a translation engine. Translate every element of the JSON array \
the user sends and reply with only a JSON array of strings of the same length and order.";

pub struct ChatProvider {
    client: Client,
    config: ProviderConfig,
}

impl ChatProvider {
    pub fn new(client: Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    fn build_body(&self, request: &ProviderRequest) -> Result<ChatRequest> {
        let payload = serde_json::to_string(&request.texts)?;
        Ok(ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Source language: {}\nTarget language: {}\n{}",
                        request.source_lang, request.target_lang, payload
                    ),
                },
            ],
            temperature: 0.1,
        })
    }

    async fn send(&self, request: &ProviderRequest) -> Result<Vec<String>> {
        let body = self.build_body(request)?;
        let mut builder = self.client.post(&self.config.api_url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = check_status(builder.send().await?).await?;
        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::Parse(e.to_string()))?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| TranslationError::Parse("empty completion".into()))?;
        debug!(job_id = %request.job_id, chars = content.len(), "chat completion received");
        expect_len(parse_json_array(&content)?, request.texts.len())
    }
}

/// 从模型回复中解析JSON字符串数组，容忍 ```json 代码围栏与前后说明文字。
pub fn parse_json_array(content: &str) -> Result<Vec<String>> {
    let trimmed = content.trim();
    let start = trimmed.find('[');
    let end = trimmed.rfind(']');
    match (start, end) {
        (Some(start), Some(end)) if start < end => {
            Ok(serde_json::from_str(&trimmed[start..=end])?)
        }
        _ => Err(TranslationError::Parse(format!(
            "no JSON array in reply: {}",
            trimmed.chars().take(80).collect::<String>()
        ))),
    }
}

impl TranslationProvider for ChatProvider {
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
