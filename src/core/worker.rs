//! worker 池与任务执行
//!
//! 固定大小的执行槽（Semaphore），每个任务在独立 tokio task 里执行：
//! 取内容 → 拼 payload → 带超时调用提供商 → 解析 → 释放限流 → 上报聚合器。
//! 限流许可由调度器在派发前取得，worker 无论成败都负责释放。
//! 审核阶段是本地质量闸，不调用提供商。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::content::SharedContentStore;
use crate::model::{ProjectSettings, TaskType, TranslationTask};
use crate::provider::{AiProvider, InvokePayload, Invocation, ProviderRegistry, RateLimiter};
use crate::store::{CharacterMappingRegistry, TaskStore};

use super::aggregator::{ProjectAggregator, TaskOutcome, TaskSuccess};
use super::error::TaskError;

static NEXT_WORKER: AtomicU64 = AtomicU64::new(1);

/// worker 池
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    tasks: Arc<TaskStore>,
    aggregator: Arc<ProjectAggregator>,
    providers: Arc<ProviderRegistry>,
    limiter: Arc<RateLimiter>,
    mappings: Arc<CharacterMappingRegistry>,
    content: SharedContentStore,
    /// 任务落账后唤醒调度器
    wake: Arc<Notify>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slot_count: usize,
        tasks: Arc<TaskStore>,
        aggregator: Arc<ProjectAggregator>,
        providers: Arc<ProviderRegistry>,
        limiter: Arc<RateLimiter>,
        mappings: Arc<CharacterMappingRegistry>,
        content: SharedContentStore,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(slot_count)),
            tasks,
            aggregator,
            providers,
            limiter,
            mappings,
            content,
            wake,
        }
    }

    /// 非阻塞取执行槽
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }

    pub fn next_worker_id() -> String {
        format!("worker-{}", NEXT_WORKER.fetch_add(1, Ordering::Relaxed))
    }

    /// 在独立 tokio task 中执行已认领的任务（限流许可已由调度器取得）
    pub fn spawn_execute(
        self: &Arc<Self>,
        permit: OwnedSemaphorePermit,
        task: TranslationTask,
        worker_id: String,
    ) {
        let pool = self.clone();
        tokio::spawn(async move {
            let provider_id = task.provider_id.clone();
            let task_id = task.id;
            let result = pool.run_task(&task).await;

            // 审核阶段没有取过限流许可，也无需释放
            if task.task_type.calls_provider() {
                if let Ok(success) = &result {
                    pool.limiter
                        .record_usage(&provider_id, success.tokens_used, success.cost);
                }
                pool.limiter.release(&provider_id);
            }

            pool.aggregator
                .apply(TaskOutcome {
                    task_id,
                    worker_id,
                    result,
                })
                .await;
            pool.wake.notify_one();
            drop(permit);
        });
    }

    async fn run_task(&self, task: &TranslationTask) -> Result<TaskSuccess, TaskError> {
        let settings = self
            .aggregator
            .settings(task.project_id)
            .await
            .ok_or_else(|| TaskError::InvalidPayload("project missing".to_string()))?;

        // 审核是本地质量闸
        if task.task_type == TaskType::Review {
            return self.handle_review(task, &settings).await;
        }

        let provider = self
            .providers
            .get(&task.provider_id)
            .ok_or_else(|| TaskError::InvalidPayload("provider not registered".to_string()))?;

        let payload = match task.task_type {
            TaskType::Outline => self.outline_payload(task).await?,
            TaskType::CharacterMap => self.character_map_payload(task, &settings).await?,
            TaskType::Translate => self.translate_payload(task, &settings).await?,
            TaskType::QualityCheck => self.quality_check_payload(task, &settings).await?,
            TaskType::Review => unreachable!("review handled above"),
        };

        let timeout_secs = provider.descriptor().timeout_secs;
        let invocation = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            provider.invoke(task.task_type, &payload),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(TaskError::Timeout(timeout_secs)),
        };

        let cost = provider
            .descriptor()
            .cost_of(invocation.input_tokens, invocation.output_tokens);
        let result_payload = parse_result(task.task_type, &invocation);
        Ok(TaskSuccess {
            payload: result_payload,
            tokens_used: invocation.tokens_used(),
            cost,
            latency_ms: invocation.latency_ms,
        })
    }

    async fn chapter_content(&self, task: &TranslationTask) -> Result<String, TaskError> {
        self.content
            .chapter(task.chapter_id)
            .await
            .map(|c| c.content)
            .ok_or(TaskError::ChapterNotFound)
    }

    async fn outline_payload(&self, task: &TranslationTask) -> Result<InvokePayload, TaskError> {
        let content = self.chapter_content(task).await?;
        Ok(InvokePayload {
            system_prompt: "You are a literary analyst. Summarize the chapter as a concise \
                            bullet outline of key events, characters on stage and themes."
                .to_string(),
            user_content: content,
        })
    }

    async fn character_map_payload(
        &self,
        task: &TranslationTask,
        settings: &ProjectSettings,
    ) -> Result<InvokePayload, TaskError> {
        let content = self.chapter_content(task).await?;
        Ok(InvokePayload {
            system_prompt: format!(
                "Identify character, place and organization names in the chapter and propose \
                 {} translations. Reply with a JSON array of objects with keys original_name, \
                 translated_name, character_type, confidence.",
                settings.target_language
            ),
            user_content: content,
        })
    }

    async fn translate_payload(
        &self,
        task: &TranslationTask,
        settings: &ProjectSettings,
    ) -> Result<InvokePayload, TaskError> {
        let content = self.chapter_content(task).await?;

        // 已收敛的角色译名作为术语表带入，保证跨章节一致
        let glossary: Vec<String> = self
            .mappings
            .list(task.project_id)
            .await
            .iter()
            .map(|m| format!("{} => {}", m.original_name, m.translated_name))
            .collect();
        let glossary_block = if glossary.is_empty() {
            String::new()
        } else {
            format!("\nUse these fixed name translations:\n{}", glossary.join("\n"))
        };

        Ok(InvokePayload {
            system_prompt: format!(
                "Translate the novel chapter from {} to {}. Preserve tone and formatting.{}",
                settings.source_language, settings.target_language, glossary_block
            ),
            user_content: content,
        })
    }

    async fn quality_check_payload(
        &self,
        task: &TranslationTask,
        settings: &ProjectSettings,
    ) -> Result<InvokePayload, TaskError> {
        let translated = self
            .dependency_result(task)
            .await?
            .get("translated_text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or(TaskError::DependencyResultMissing)?;

        Ok(InvokePayload {
            system_prompt: format!(
                "Rate this {} translation on a 1-5 scale. Reply with JSON: \
                 {{\"score\": <f64>, \"issues\": [<string>...]}}.",
                settings.target_language
            ),
            user_content: translated,
        })
    }

    /// 审核闸：按前置质量分自动通过或标记待修订，不消耗提供商额度
    async fn handle_review(
        &self,
        task: &TranslationTask,
        settings: &ProjectSettings,
    ) -> Result<TaskSuccess, TaskError> {
        let score = self
            .dependency_result(task)
            .await?
            .get("score")
            .and_then(|v| v.as_f64())
            .ok_or(TaskError::DependencyResultMissing)?;

        let status = if score >= settings.quality_threshold {
            "approved"
        } else {
            "needs_revision"
        };
        Ok(TaskSuccess {
            payload: serde_json::json!({ "review_status": status, "score": score }),
            tokens_used: 0,
            cost: 0.0,
            latency_ms: 0,
        })
    }

    async fn dependency_result(
        &self,
        task: &TranslationTask,
    ) -> Result<serde_json::Value, TaskError> {
        let dep_id = task.depends_on.ok_or(TaskError::DependencyResultMissing)?;
        self.tasks
            .get(dep_id)
            .await
            .and_then(|t| t.result)
            .ok_or(TaskError::DependencyResultMissing)
    }
}

/// 按任务类型把原始输出整理为结果 JSON；解析宽容，坏输出降级不报错
fn parse_result(task_type: TaskType, invocation: &Invocation) -> serde_json::Value {
    match task_type {
        TaskType::Outline => serde_json::json!({ "outline": invocation.output }),
        TaskType::CharacterMap => {
            let candidates: serde_json::Value = serde_json::from_str(&invocation.output)
                .unwrap_or_else(|_| serde_json::json!([]));
            serde_json::json!({ "characters": candidates })
        }
        TaskType::Translate => serde_json::json!({ "translated_text": invocation.output }),
        TaskType::QualityCheck => serde_json::from_str::<serde_json::Value>(&invocation.output)
            .ok()
            .filter(|v| v.get("score").map(|s| s.is_number()).unwrap_or(false))
            .unwrap_or_else(|| {
                serde_json::json!({ "score": 3.0, "issues": ["unparseable quality report"] })
            }),
        TaskType::Review => serde_json::Value::Null,
    }
}
