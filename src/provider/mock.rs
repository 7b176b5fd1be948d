//! Mock 提供商（测试与演示用）
//!
//! 可配置延迟、脚本化失败（按内容标记触发）、并发观测。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::model::{MappingCandidate, ProviderDescriptor, TaskType};

use super::traits::{AiProvider, InvokePayload, Invocation, ProviderError};

/// Mock 提供商
pub struct MockProvider {
    descriptor: ProviderDescriptor,
    /// 模拟调用耗时
    latency: Duration,
    /// 内容包含 key 时返回瞬时错误，最多触发 value 次（u32::MAX 表示始终失败）
    fail_markers: Mutex<HashMap<String, u32>>,
    /// 角色识别任务返回的候选
    characters: Vec<MappingCandidate>,
    /// 质量检查返回的分数
    quality_score: f64,
    current: AtomicU32,
    max_seen: AtomicU32,
}

impl MockProvider {
    pub fn new(descriptor: ProviderDescriptor) -> Self {
        Self {
            descriptor,
            latency: Duration::from_millis(10),
            fail_markers: Mutex::new(HashMap::new()),
            characters: Vec::new(),
            quality_score: 4.2,
            current: AtomicU32::new(0),
            max_seen: AtomicU32::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 内容包含 marker 的调用失败 times 次（瞬时错误）
    pub fn fail_on(self, marker: impl Into<String>, times: u32) -> Self {
        self.fail_markers
            .lock()
            .expect("mock lock poisoned")
            .insert(marker.into(), times);
        self
    }

    pub fn with_characters(mut self, characters: Vec<MappingCandidate>) -> Self {
        self.characters = characters;
        self
    }

    pub fn with_quality_score(mut self, score: f64) -> Self {
        self.quality_score = score;
        self
    }

    /// 历史最大并发（并发上限断言用）
    pub fn max_concurrent_seen(&self) -> u32 {
        self.max_seen.load(Ordering::SeqCst)
    }

    fn should_fail(&self, content: &str) -> bool {
        let mut markers = self.fail_markers.lock().expect("mock lock poisoned");
        for (marker, remaining) in markers.iter_mut() {
            if content.contains(marker.as_str()) && *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        task_type: TaskType,
        payload: &InvokePayload,
    ) -> Result<Invocation, ProviderError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        let started = Instant::now();
        tokio::time::sleep(self.latency).await;
        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.should_fail(&payload.user_content) {
            return Err(ProviderError::Network("simulated transient error".into()));
        }

        let output = match task_type {
            TaskType::Outline => format!(
                "- Key events of the chapter\n- Characters on stage\n- Theme summary ({} chars source)",
                payload.user_content.len()
            ),
            TaskType::CharacterMap => {
                serde_json::to_string(&self.characters).unwrap_or_else(|_| "[]".to_string())
            }
            TaskType::Translate => format!("[translated] {}", payload.user_content),
            TaskType::QualityCheck => serde_json::json!({
                "score": self.quality_score,
                "issues": [],
            })
            .to_string(),
            TaskType::Review => String::new(),
        };

        // 粗略 token 计量：4 字符 1 token（与原估算一致）
        Ok(Invocation {
            input_tokens: (payload.user_content.len() / 4) as u64,
            output_tokens: (output.len() / 4) as u64,
            latency_ms: started.elapsed().as_millis() as u64,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(content: &str) -> InvokePayload {
        InvokePayload {
            system_prompt: "test".to_string(),
            user_content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripted_failure_is_bounded() {
        let provider = MockProvider::new(ProviderDescriptor::new("mock")).fail_on("第二章", 2);

        assert!(provider.invoke(TaskType::Translate, &payload("第二章正文")).await.is_err());
        assert!(provider.invoke(TaskType::Translate, &payload("第二章正文")).await.is_err());
        // 两次之后恢复
        assert!(provider.invoke(TaskType::Translate, &payload("第二章正文")).await.is_ok());
        // 其它内容不受影响
        assert!(provider.invoke(TaskType::Translate, &payload("第一章正文")).await.is_ok());
    }

    #[tokio::test]
    async fn test_quality_check_output_parses() {
        let provider = MockProvider::new(ProviderDescriptor::new("mock")).with_quality_score(3.0);
        let inv = provider
            .invoke(TaskType::QualityCheck, &payload("译文"))
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&inv.output).unwrap();
        assert!((v["score"].as_f64().unwrap() - 3.0).abs() < 1e-9);
    }
}
