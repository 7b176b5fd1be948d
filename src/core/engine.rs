//! 流水线引擎门面
//!
//! 对外暴露项目命令与查询；启动时做初始化分析（章节清点、范围裁剪、
//! 成本估算）、为每个阶段选提供商、生成按章节的线性任务链，然后交给
//! 后台调度循环。所有命令 / 查询同步返回当前状态，不阻塞流水线执行。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::content::SharedContentStore;
use crate::model::{
    CharacterMapping, ProjectId, ProjectProgress, ProjectSettings, TaskId, TaskType,
    TranslationProject, TranslationTask,
};
use crate::provider::{MockProvider, OpenAiCompatProvider, ProviderRegistry, RateLimiter};
use crate::store::{CharacterMappingRegistry, TaskStore};

use super::aggregator::{AggregatorPolicy, ProjectAggregator};
use super::error::EngineError;
use super::events::{EventBus, StateChange};
use super::scheduler::Scheduler;
use super::worker::WorkerPool;

/// 翻译流水线引擎
pub struct PipelineEngine {
    config: AppConfig,
    tasks: Arc<TaskStore>,
    mappings: Arc<CharacterMappingRegistry>,
    aggregator: Arc<ProjectAggregator>,
    providers: Arc<ProviderRegistry>,
    limiter: Arc<RateLimiter>,
    events: Arc<EventBus>,
    content: SharedContentStore,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl PipelineEngine {
    /// 组装引擎并启动后台调度循环
    pub fn start(
        config: AppConfig,
        providers: ProviderRegistry,
        content: SharedContentStore,
    ) -> Arc<Self> {
        let providers = Arc::new(providers);
        let limiter = Arc::new(RateLimiter::new(&providers.descriptors()));
        let events = Arc::new(EventBus::default());
        let tasks = Arc::new(TaskStore::new());
        let mappings = Arc::new(CharacterMappingRegistry::new());
        let aggregator = Arc::new(ProjectAggregator::new(
            tasks.clone(),
            mappings.clone(),
            events.clone(),
            AggregatorPolicy {
                failure_ratio_threshold: config.pipeline.failure_ratio_threshold,
                retry: config.retry.to_policy(),
            },
        ));
        let wake = Arc::new(Notify::new());
        let workers = Arc::new(WorkerPool::new(
            config.pipeline.worker_slots,
            tasks.clone(),
            aggregator.clone(),
            providers.clone(),
            limiter.clone(),
            mappings.clone(),
            content.clone(),
            wake.clone(),
        ));
        let cancel = CancellationToken::new();

        let scheduler = Scheduler::new(
            tasks.clone(),
            aggregator.clone(),
            workers,
            limiter.clone(),
            events.clone(),
            wake.clone(),
            Duration::from_millis(config.pipeline.tick_interval_ms),
            config.pipeline.claim_timeout_secs,
            cancel.clone(),
        );
        tokio::spawn(scheduler.run());

        Arc::new(Self {
            config,
            tasks,
            mappings,
            aggregator,
            providers,
            limiter,
            events,
            content,
            wake,
            cancel,
        })
    }

    /// 创建项目（created 状态，不生成任务）
    pub async fn create_project(
        &self,
        name: impl Into<String>,
        novel_id: Uuid,
        settings: ProjectSettings,
    ) -> ProjectId {
        let project = TranslationProject::new(name, novel_id, settings);
        let id = project.id;
        self.aggregator.insert_project(project).await;
        id
    }

    /// 启动项目：清点章节、估算成本、选提供商、生成任务链
    pub async fn start_project(&self, project_id: ProjectId) -> Result<(), EngineError> {
        let project = self
            .aggregator
            .project(project_id)
            .await
            .ok_or(EngineError::ProjectNotFound)?;
        let settings = project.settings.clone();

        // 初始化分析：按配置范围裁剪章节
        let chapters: Vec<_> = self
            .content
            .chapters_of(project.novel_id)
            .await
            .into_iter()
            .filter(|c| {
                c.number >= settings.start_chapter
                    && settings.end_chapter.map(|end| c.number <= end).unwrap_or(true)
            })
            .collect();
        if chapters.is_empty() {
            return Err(EngineError::EmptyChapterRange);
        }

        let stages = chapter_stages(&settings);
        let mut providers_by_stage = Vec::with_capacity(stages.len());
        for &stage in &stages {
            providers_by_stage.push(self.provider_for(stage, &settings)?);
        }

        let mut new_tasks = Vec::with_capacity(chapters.len() * stages.len());
        for chapter in &chapters {
            let mut previous: Option<TaskId> = None;
            for (&stage, provider_id) in stages.iter().zip(&providers_by_stage) {
                let mut task = TranslationTask::new(
                    project_id,
                    stage,
                    chapter.id,
                    chapter.number,
                    provider_id.clone(),
                )
                .with_priority(stage_priority(stage))
                .with_max_retries(settings.max_retries);
                if let Some(prev) = previous {
                    task = task.with_depends_on(prev);
                }
                previous = Some(task.id);
                new_tasks.push(task);
            }
        }

        let total_chapters = chapters.len() as u32;
        let estimated_cost =
            total_chapters as f64 * self.config.pipeline.estimated_cost_per_chapter;
        // created → analyzing 先行：重复 / 并发的 start 在这里被拒，
        // 任务图只在赢得状态迁移后插入，不会重复生成
        self.aggregator
            .mark_started(project_id, total_chapters, estimated_cost)
            .await?;
        self.tasks.insert_many(new_tasks).await;
        tracing::info!(
            project_id = %project_id,
            chapters = total_chapters,
            stages = stages.len(),
            estimated_cost,
            "Project started"
        );
        self.wake.notify_one();
        Ok(())
    }

    fn provider_for(
        &self,
        stage: TaskType,
        settings: &ProjectSettings,
    ) -> Result<String, EngineError> {
        if let Some(id) = self.providers.select(
            stage,
            &settings.source_language,
            &settings.target_language,
            &self.limiter,
        ) {
            return Ok(id);
        }
        // 审核不调用提供商，缺专属提供商时借用翻译的
        if stage == TaskType::Review {
            if let Some(id) = self.providers.select(
                TaskType::Translate,
                &settings.source_language,
                &settings.target_language,
                &self.limiter,
            ) {
                return Ok(id);
            }
        }
        Err(EngineError::NoProviderAvailable(stage))
    }

    pub async fn pause_project(&self, project_id: ProjectId) -> Result<(), EngineError> {
        self.aggregator.pause(project_id).await
    }

    pub async fn resume_project(&self, project_id: ProjectId) -> Result<(), EngineError> {
        self.aggregator.resume(project_id).await?;
        self.wake.notify_one();
        Ok(())
    }

    pub async fn cancel_project(&self, project_id: ProjectId) -> Result<(), EngineError> {
        self.aggregator.cancel(project_id).await
    }

    pub async fn project_progress(
        &self,
        project_id: ProjectId,
    ) -> Result<ProjectProgress, EngineError> {
        self.aggregator.progress(project_id).await
    }

    pub async fn task_detail(&self, task_id: TaskId) -> Result<TranslationTask, EngineError> {
        self.tasks.get(task_id).await.ok_or(EngineError::TaskNotFound)
    }

    /// 项目的全部任务快照（创建序）
    pub async fn project_tasks(&self, project_id: ProjectId) -> Vec<TranslationTask> {
        self.tasks.project_tasks(project_id).await
    }

    pub async fn list_character_mappings(&self, project_id: ProjectId) -> Vec<CharacterMapping> {
        self.mappings.list(project_id).await
    }

    /// 人工验证角色译名（可同时改写）
    pub async fn verify_character_mapping(
        &self,
        project_id: ProjectId,
        original_name: &str,
        translated_name: Option<String>,
    ) -> Result<CharacterMapping, EngineError> {
        self.mappings
            .verify(project_id, original_name, translated_name)
            .await
            .ok_or(EngineError::MappingNotFound)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// 停止后台调度循环
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// 按项目配置展开单章节的阶段链
fn chapter_stages(settings: &ProjectSettings) -> Vec<TaskType> {
    let mut stages = Vec::with_capacity(5);
    if settings.generate_outline {
        stages.push(TaskType::Outline);
    }
    stages.push(TaskType::CharacterMap);
    stages.push(TaskType::Translate);
    if settings.enable_quality_check {
        stages.push(TaskType::QualityCheck);
        stages.push(TaskType::Review);
    }
    stages
}

fn stage_priority(stage: TaskType) -> u8 {
    match stage {
        TaskType::Outline | TaskType::CharacterMap | TaskType::Translate => 5,
        TaskType::QualityCheck | TaskType::Review => 3,
    }
}

/// 按配置组装提供商注册表（mock / OpenAI 兼容）
pub fn build_providers(config: &AppConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (id, section) in &config.provider {
        let descriptor = section.to_descriptor(id);
        match section.kind.as_str() {
            "openai" => {
                let base_url = section
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
                let api_key = section.api_key.clone().unwrap_or_default();
                let model = section.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
                registry.register(Arc::new(OpenAiCompatProvider::new(
                    descriptor, base_url, api_key, model,
                )));
            }
            "mock" => {
                registry.register(Arc::new(MockProvider::new(descriptor)));
            }
            other => {
                tracing::warn!("Unknown provider kind '{}' for {}, skipping", other, id);
            }
        }
    }
    registry
}
