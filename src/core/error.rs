//! 错误类型
//!
//! TaskError 是任务执行期错误，留在任务记录里（转为 ErrorDescriptor），
//! 不跨调度器边界传播；EngineError 是对外 API 错误。

use thiserror::Error;

use crate::model::{ErrorDescriptor, ProjectStatus, TaskType};
use crate::provider::ProviderError;

/// 任务执行错误
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("provider call timed out after {0}s")]
    Timeout(u64),

    #[error("chapter not found in content store")]
    ChapterNotFound,

    #[error("dependency task result missing")]
    DependencyResultMissing,

    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("worker lost, claim expired")]
    WorkerLost,
}

impl TaskError {
    /// 瞬时错误走重试；其余直接终态失败
    pub fn is_transient(&self) -> bool {
        match self {
            TaskError::Provider(e) => e.is_transient(),
            TaskError::Timeout(_) | TaskError::WorkerLost => true,
            TaskError::ChapterNotFound
            | TaskError::DependencyResultMissing
            | TaskError::InvalidPayload(_) => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TaskError::Provider(ProviderError::Network(_)) => "provider_network",
            TaskError::Provider(ProviderError::RateLimited) => "provider_rate_limited",
            TaskError::Provider(ProviderError::Http { .. }) => "provider_http",
            TaskError::Provider(ProviderError::InvalidResponse(_)) => "provider_invalid_response",
            TaskError::Provider(ProviderError::Unsupported(_)) => "provider_unsupported",
            TaskError::Timeout(_) => "timeout",
            TaskError::ChapterNotFound => "chapter_not_found",
            TaskError::DependencyResultMissing => "dependency_result_missing",
            TaskError::InvalidPayload(_) => "invalid_payload",
            TaskError::WorkerLost => "worker_lost",
        }
    }

    /// 转为随任务保存的结构化描述
    pub fn descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// 引擎对外 API 错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("project not found")]
    ProjectNotFound,

    #[error("task not found")]
    TaskNotFound,

    #[error("project is {status:?}, cannot {action}")]
    InvalidProjectState {
        status: ProjectStatus,
        action: &'static str,
    },

    #[error("no provider available for {0:?}")]
    NoProviderAvailable(TaskType),

    #[error("chapter range selects no chapters")]
    EmptyChapterRange,

    #[error("character mapping not found")]
    MappingNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TaskError::Timeout(30).is_transient());
        assert!(TaskError::WorkerLost.is_transient());
        assert!(TaskError::Provider(ProviderError::RateLimited).is_transient());
        assert!(!TaskError::ChapterNotFound.is_transient());
        assert!(!TaskError::InvalidPayload("x".into()).is_transient());
    }

    #[test]
    fn test_descriptor_carries_code() {
        let d = TaskError::Timeout(30).descriptor();
        assert_eq!(d.code, "timeout");
        assert!(d.message.contains("30"));
    }
}
