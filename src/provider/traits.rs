//! 提供商抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 AiProvider：invoke 一次调用，
//! 返回输出与 token/延迟计量。调用方不关心后端细节，只看描述与错误分类。

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{ProviderDescriptor, TaskType};

/// 一次调用的输入：系统提示 + 用户内容（提示词拼装在 worker 完成）
#[derive(Debug, Clone)]
pub struct InvokePayload {
    pub system_prompt: String,
    pub user_content: String,
}

/// 一次调用的计量结果
#[derive(Debug, Clone)]
pub struct Invocation {
    pub output: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
}

impl Invocation {
    pub fn tokens_used(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// 提供商错误，is_transient 决定重试还是终态失败
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("provider rate limited")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("task type not supported: {0:?}")]
    Unsupported(TaskType),
}

impl ProviderError {
    /// 网络 / 限流 / 服务端错误可重试；协议与能力错误不可
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::RateLimited => true,
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::InvalidResponse(_) | ProviderError::Unsupported(_) => false,
        }
    }
}

/// AI 能力提供商
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// 只读描述（能力、语言、限流参数、单价）
    fn descriptor(&self) -> &ProviderDescriptor;

    /// 执行一次调用
    async fn invoke(
        &self,
        task_type: TaskType,
        payload: &InvokePayload,
    ) -> Result<Invocation, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(ProviderError::RateLimited.is_transient());
        assert!(ProviderError::Http { status: 503, body: String::new() }.is_transient());
        assert!(ProviderError::Http { status: 429, body: String::new() }.is_transient());
        assert!(!ProviderError::Http { status: 400, body: String::new() }.is_transient());
        assert!(!ProviderError::InvalidResponse("bad json".into()).is_transient());
    }
}
