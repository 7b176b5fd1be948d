//! OpenAI 兼容的 HTTP 提供商
//!
//! 走 chat/completions 协议，适配 DeepSeek / OpenAI / 各类兼容网关。
//! 超时由 reqwest 客户端设置；429 与 5xx 归为瞬时错误交给重试策略。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{ProviderDescriptor, TaskType};

use super::traits::{AiProvider, InvokePayload, Invocation, ProviderError};

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI 兼容提供商
pub struct OpenAiCompatProvider {
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        descriptor: ProviderDescriptor,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(descriptor.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            descriptor,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl AiProvider for OpenAiCompatProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        task_type: TaskType,
        payload: &InvokePayload,
    ) -> Result<Invocation, ProviderError> {
        if !self.descriptor.supports(task_type) {
            return Err(ProviderError::Unsupported(task_type));
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: payload.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: payload.user_content.clone(),
                },
            ],
            stream: false,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let output = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("empty choices".to_string()))?;
        let usage = parsed.usage.unwrap_or_default();

        Ok(Invocation {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
            output,
        })
    }
}
