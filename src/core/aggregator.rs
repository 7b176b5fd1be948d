//! 项目聚合器
//!
//! 任务结果的唯一写入口：worker 把 TaskOutcome 交给 apply，在单写者
//! 互斥区内完成任务终态落账、依赖扇出、角色映射合并、项目计数与
//! 阶段推进。apply 幂等：已终态任务的重复结果与认领不匹配的结果
//! 直接丢弃（worker 失联恢复后迟到的结果走这条路）。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::model::{
    MappingCandidate, ProjectId, ProjectProgress, ProjectSettings, ProjectStatus, TaskId,
    TaskStatus, TaskType, TranslationProject, TranslationTask,
};
use crate::store::{CharacterMappingRegistry, TaskStore};

use super::error::{EngineError, TaskError};
use super::events::EventBus;
use super::retry::RetryPolicy;

/// 聚合策略
#[derive(Debug, Clone, Copy)]
pub struct AggregatorPolicy {
    /// 终态失败章节占比超过该值（严格大于）时项目转 failed
    pub failure_ratio_threshold: f64,
    pub retry: RetryPolicy,
}

impl Default for AggregatorPolicy {
    fn default() -> Self {
        Self {
            failure_ratio_threshold: 0.5,
            retry: RetryPolicy::default(),
        }
    }
}

/// 任务成功载荷
#[derive(Debug, Clone)]
pub struct TaskSuccess {
    /// 按任务类型约定的 JSON 结果
    pub payload: serde_json::Value,
    pub tokens_used: u64,
    pub cost: f64,
    pub latency_ms: u64,
}

/// worker 上报的执行结果
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub worker_id: String,
    pub result: Result<TaskSuccess, TaskError>,
}

/// 项目聚合器
pub struct ProjectAggregator {
    projects: RwLock<HashMap<ProjectId, TranslationProject>>,
    tasks: Arc<TaskStore>,
    mappings: Arc<CharacterMappingRegistry>,
    events: Arc<EventBus>,
    policy: AggregatorPolicy,
    /// 单写者互斥区：apply 与项目操作串行
    apply_lock: Mutex<()>,
}

impl ProjectAggregator {
    pub fn new(
        tasks: Arc<TaskStore>,
        mappings: Arc<CharacterMappingRegistry>,
        events: Arc<EventBus>,
        policy: AggregatorPolicy,
    ) -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            tasks,
            mappings,
            events,
            policy,
            apply_lock: Mutex::new(()),
        }
    }

    pub async fn insert_project(&self, project: TranslationProject) {
        self.projects.write().await.insert(project.id, project);
    }

    pub async fn project(&self, project_id: ProjectId) -> Option<TranslationProject> {
        self.projects.read().await.get(&project_id).cloned()
    }

    pub async fn settings(&self, project_id: ProjectId) -> Option<ProjectSettings> {
        self.projects
            .read()
            .await
            .get(&project_id)
            .map(|p| p.settings.clone())
    }

    /// 任务不可调度的项目集合（paused / created / 终态）
    pub async fn unschedulable_projects(&self) -> HashSet<ProjectId> {
        self.projects
            .read()
            .await
            .iter()
            .filter(|(_, p)| !p.status.is_schedulable())
            .map(|(id, _)| *id)
            .collect()
    }

    /// 落账一个任务结果
    pub async fn apply(&self, outcome: TaskOutcome) {
        let _guard = self.apply_lock.lock().await;

        let Some(task) = self.tasks.get(outcome.task_id).await else {
            tracing::warn!("Outcome for unknown task {}", outcome.task_id);
            return;
        };
        // 幂等：终态任务的重复结果丢弃
        if task.status.is_terminal() {
            return;
        }
        // 认领不匹配：失联恢复后旧 worker 迟到的结果丢弃
        if task.worker_id.as_deref() != Some(outcome.worker_id.as_str()) {
            tracing::debug!(
                "Dropping outcome from stale worker {} for task {}",
                outcome.worker_id,
                outcome.task_id
            );
            return;
        }

        match outcome.result {
            Ok(success) => self.complete_task(task, success).await,
            Err(error) => self.fail_task(task, error).await,
        }
    }

    async fn complete_task(&self, task: TranslationTask, success: TaskSuccess) {
        let old_status = task.status;
        let payload = success.payload.clone();
        let updated = self
            .tasks
            .update(task.id, |t| {
                t.status = TaskStatus::Completed;
                t.result = Some(success.payload);
                t.tokens_used = success.tokens_used;
                t.actual_cost = success.cost;
                t.retry_at = None;
                t.error = None;
                t.completed_at = Some(Utc::now());
            })
            .await;
        if updated.is_none() {
            return;
        }
        self.events
            .task_changed(task.project_id, task.id, old_status.as_str(), "completed");
        tracing::info!(
            task_id = %task.id,
            task_type = task.task_type.as_str(),
            chapter = task.chapter_number,
            latency_ms = success.latency_ms,
            "Task completed"
        );

        // 角色映射提案并入注册表
        if task.task_type == TaskType::CharacterMap {
            self.merge_mapping_proposals(task.project_id, &payload).await;
        }

        // 依赖扇出：后继 pending → ready
        for dependent_id in self.tasks.dependents_of(task.id).await {
            let promoted = self
                .tasks
                .update(dependent_id, |t| {
                    if t.status == TaskStatus::Pending {
                        t.status = TaskStatus::Ready;
                    }
                })
                .await;
            if let Some(dep) = promoted {
                if dep.status == TaskStatus::Ready {
                    self.events
                        .task_changed(dep.project_id, dep.id, "pending", "ready");
                }
            }
        }

        // 项目计数
        let project_tasks = self.tasks.project_tasks(task.project_id).await;
        let mut projects = self.projects.write().await;
        let Some(project) = projects.get_mut(&task.project_id) else {
            return;
        };
        project.cost.actual_cost += success.cost;
        project.cost.tokens_used += success.tokens_used;

        if task.task_type == TaskType::QualityCheck {
            let score = payload.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let issues = payload
                .get("issues")
                .and_then(|v| v.as_array())
                .map(|a| a.len() as u32)
                .unwrap_or(0);
            project.quality.absorb(score, issues);
        }

        // 链尾任务完成即章节完成
        let final_stage = if project.settings.enable_quality_check {
            TaskType::Review
        } else {
            TaskType::Translate
        };
        if task.task_type == final_stage {
            project.completed_chapters += 1;
            project.recompute_progress();
        }

        self.maybe_advance(project, &project_tasks);
    }

    async fn fail_task(&self, task: TranslationTask, error: TaskError) {
        let old_status = task.status;
        let transient = error.is_transient();
        let next_retry = task.retry_count + 1;

        if transient && next_retry < task.max_retries {
            let delay = self.policy.retry.next_delay(next_retry);
            let retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            self.tasks
                .update(task.id, |t| {
                    t.status = TaskStatus::Failed;
                    t.retry_count = next_retry;
                    t.retry_at = Some(retry_at);
                    t.error = Some(error.descriptor());
                    t.worker_id = None;
                    t.claimed_at = None;
                })
                .await;
            self.events
                .task_changed(task.project_id, task.id, old_status.as_str(), "failed");
            tracing::warn!(
                task_id = %task.id,
                retry_count = next_retry,
                retry_in_secs = delay.as_secs(),
                "Task failed transiently: {}",
                error
            );
            return;
        }

        // 重试耗尽或不可恢复
        self.tasks
            .update(task.id, |t| {
                t.status = TaskStatus::FailedTerminal;
                t.retry_count = next_retry;
                t.retry_at = None;
                t.error = Some(error.descriptor());
                t.completed_at = Some(Utc::now());
            })
            .await;
        self.events.task_changed(
            task.project_id,
            task.id,
            old_status.as_str(),
            "failed_terminal",
        );
        tracing::error!(
            task_id = %task.id,
            task_type = task.task_type.as_str(),
            chapter = task.chapter_number,
            "Task failed terminally: {}",
            error
        );

        // 取消只向下游传染
        self.cascade_cancel(task.id).await;

        let project_tasks = self.tasks.project_tasks(task.project_id).await;
        let mut projects = self.projects.write().await;
        let Some(project) = projects.get_mut(&task.project_id) else {
            return;
        };
        project.failed_chapters += 1;
        project.recompute_progress();

        if project.failure_ratio() > self.policy.failure_ratio_threshold
            && !project.status.is_terminal()
        {
            let old = project.status;
            project.status = ProjectStatus::Failed;
            project.failed_at = Some(Utc::now());
            self.events
                .project_changed(project.id, old.as_str(), "failed");
            tracing::error!(
                project_id = %project.id,
                failed_chapters = project.failed_chapters,
                total_chapters = project.total_chapters,
                "Project failure ratio exceeded, aborting"
            );
            let project_id = project.id;
            drop(projects);
            self.cancel_all_tasks(project_id).await;
            return;
        }

        self.maybe_advance(project, &project_tasks);
    }

    async fn merge_mapping_proposals(&self, project_id: ProjectId, payload: &serde_json::Value) {
        let candidates: Vec<MappingCandidate> = payload
            .get("characters")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        for candidate in &candidates {
            let (_, outcome) = self.mappings.propose_or_merge(project_id, candidate).await;
            tracing::debug!(
                project_id = %project_id,
                name = %candidate.original_name,
                ?outcome,
                "Character mapping proposal merged"
            );
        }
    }

    /// 终态失败向下游传染：非终态后继（连同其后继）全部取消
    async fn cascade_cancel(&self, from: TaskId) {
        let mut queue: VecDeque<TaskId> = self.tasks.dependents_of(from).await.into();
        while let Some(id) = queue.pop_front() {
            let mut old_status = None;
            let cancelled = self
                .tasks
                .update(id, |t| {
                    if !t.status.is_terminal() {
                        old_status = Some(t.status);
                        t.status = TaskStatus::Cancelled;
                        t.completed_at = Some(Utc::now());
                    }
                })
                .await;
            if let (Some(t), Some(old)) = (cancelled, old_status) {
                self.events
                    .task_changed(t.project_id, t.id, old.as_str(), "cancelled");
            }
            queue.extend(self.tasks.dependents_of(id).await);
        }
    }

    async fn cancel_all_tasks(&self, project_id: ProjectId) {
        for task in self.tasks.project_tasks(project_id).await {
            if task.status.is_terminal() {
                continue;
            }
            let old = task.status;
            self.tasks
                .update(task.id, |t| {
                    if !t.status.is_terminal() {
                        t.status = TaskStatus::Cancelled;
                        t.completed_at = Some(Utc::now());
                    }
                })
                .await;
            self.events
                .task_changed(project_id, task.id, old.as_str(), "cancelled");
        }
    }

    /// 阶段推进：以阶段内任务全部到达终态为准（失败章节不卡住阶段）
    fn maybe_advance(&self, project: &mut TranslationProject, tasks: &[TranslationTask]) {
        let all_terminal = |filter: &dyn Fn(&TranslationTask) -> bool| {
            tasks.iter().filter(|t| filter(t)).all(|t| t.is_terminal())
        };

        loop {
            let next = match project.status {
                ProjectStatus::Analyzing if all_terminal(&|t| t.task_type.is_analysis_stage()) => {
                    ProjectStatus::Translating
                }
                ProjectStatus::Translating
                    if all_terminal(&|t| {
                        matches!(t.task_type, TaskType::Translate | TaskType::QualityCheck)
                    }) =>
                {
                    ProjectStatus::Reviewing
                }
                ProjectStatus::Reviewing if all_terminal(&|_| true) => ProjectStatus::Completed,
                _ => break,
            };
            let old = project.status;
            project.status = next;
            if next == ProjectStatus::Completed {
                project.completed_at = Some(Utc::now());
            }
            self.events
                .project_changed(project.id, old.as_str(), next.as_str());
            tracing::info!(project_id = %project.id, from = old.as_str(), to = next.as_str(), "Project stage advanced");
        }
    }

    /// 项目启动：created → analyzing，写入章节总数与成本估算
    pub async fn mark_started(
        &self,
        project_id: ProjectId,
        total_chapters: u32,
        estimated_cost: f64,
    ) -> Result<(), EngineError> {
        let _guard = self.apply_lock.lock().await;
        let mut projects = self.projects.write().await;
        let project = projects.get_mut(&project_id).ok_or(EngineError::ProjectNotFound)?;
        if project.status != ProjectStatus::Created {
            return Err(EngineError::InvalidProjectState {
                status: project.status,
                action: "start",
            });
        }
        project.status = ProjectStatus::Analyzing;
        project.total_chapters = total_chapters;
        project.cost.estimated_cost = estimated_cost;
        project.started_at = Some(Utc::now());
        self.events
            .project_changed(project_id, "created", "analyzing");
        Ok(())
    }

    /// 暂停：冻结调度，已在跑的任务自然跑完
    pub async fn pause(&self, project_id: ProjectId) -> Result<(), EngineError> {
        let _guard = self.apply_lock.lock().await;
        let mut projects = self.projects.write().await;
        let project = projects.get_mut(&project_id).ok_or(EngineError::ProjectNotFound)?;
        if !project.status.is_schedulable() {
            return Err(EngineError::InvalidProjectState {
                status: project.status,
                action: "pause",
            });
        }
        let old = project.status;
        project.paused_from = Some(old);
        project.status = ProjectStatus::Paused;
        project.paused_at = Some(Utc::now());
        self.events
            .project_changed(project_id, old.as_str(), "paused");
        Ok(())
    }

    /// 恢复到暂停前的阶段
    pub async fn resume(&self, project_id: ProjectId) -> Result<(), EngineError> {
        let _guard = self.apply_lock.lock().await;
        let project_tasks = self.tasks.project_tasks(project_id).await;
        let mut projects = self.projects.write().await;
        let project = projects.get_mut(&project_id).ok_or(EngineError::ProjectNotFound)?;
        if project.status != ProjectStatus::Paused {
            return Err(EngineError::InvalidProjectState {
                status: project.status,
                action: "resume",
            });
        }
        let resumed = project.paused_from.take().unwrap_or(ProjectStatus::Translating);
        project.status = resumed;
        project.paused_at = None;
        self.events
            .project_changed(project_id, "paused", resumed.as_str());
        // 暂停期间收尾的在跑任务可能已满足推进条件
        self.maybe_advance(project, &project_tasks);
        Ok(())
    }

    /// 取消项目与全部非终态任务
    pub async fn cancel(&self, project_id: ProjectId) -> Result<(), EngineError> {
        let _guard = self.apply_lock.lock().await;
        {
            let mut projects = self.projects.write().await;
            let project = projects.get_mut(&project_id).ok_or(EngineError::ProjectNotFound)?;
            if project.status.is_terminal() {
                return Err(EngineError::InvalidProjectState {
                    status: project.status,
                    action: "cancel",
                });
            }
            let old = project.status;
            project.status = ProjectStatus::Cancelled;
            project.cancelled_at = Some(Utc::now());
            self.events
                .project_changed(project_id, old.as_str(), "cancelled");
        }
        self.cancel_all_tasks(project_id).await;
        Ok(())
    }

    /// 到期的 failed 任务提升为 ready；返回提升数
    pub async fn promote_due_retries(&self) -> usize {
        let _guard = self.apply_lock.lock().await;
        let due = self.tasks.due_retries(Utc::now()).await;
        let mut promoted = 0;
        for task_id in due {
            let updated = self
                .tasks
                .update(task_id, |t| {
                    if t.status == TaskStatus::Failed {
                        t.status = TaskStatus::Ready;
                        t.retry_at = None;
                    }
                })
                .await;
            if let Some(t) = updated {
                if t.status == TaskStatus::Ready {
                    self.events.task_changed(t.project_id, t.id, "failed", "ready");
                    promoted += 1;
                }
            }
        }
        promoted
    }

    /// 进度快照（允许落后一个调度 tick）
    pub async fn progress(&self, project_id: ProjectId) -> Result<ProjectProgress, EngineError> {
        let project = self
            .project(project_id)
            .await
            .ok_or(EngineError::ProjectNotFound)?;
        let tasks = self.tasks.project_tasks(project_id).await;

        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count() as u32;
        Ok(ProjectProgress {
            project_id,
            status: project.status,
            overall_progress: project.progress,
            total_chapters: project.total_chapters,
            completed_chapters: project.completed_chapters,
            failed_chapters: project.failed_chapters,
            total_tasks: tasks.len() as u32,
            completed_tasks: count(TaskStatus::Completed),
            failed_tasks: count(TaskStatus::Failed) + count(TaskStatus::FailedTerminal),
            running_tasks: count(TaskStatus::Running),
            ready_tasks: count(TaskStatus::Ready),
            average_quality_score: project.quality.average_score,
            quality_issues_count: project.quality.issues_count,
            tokens_used: project.cost.tokens_used,
            estimated_cost: project.cost.estimated_cost,
            actual_cost: project.cost.actual_cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProjectSettings;
    use uuid::Uuid;

    fn aggregator() -> (Arc<ProjectAggregator>, Arc<TaskStore>) {
        let tasks = Arc::new(TaskStore::new());
        let agg = Arc::new(ProjectAggregator::new(
            tasks.clone(),
            Arc::new(CharacterMappingRegistry::new()),
            Arc::new(EventBus::default()),
            AggregatorPolicy::default(),
        ));
        (agg, tasks)
    }

    fn success() -> Result<TaskSuccess, TaskError> {
        Ok(TaskSuccess {
            payload: serde_json::json!({"text": "done"}),
            tokens_used: 100,
            cost: 0.01,
            latency_ms: 5,
        })
    }

    async fn seeded_project(agg: &ProjectAggregator, total_chapters: u32) -> ProjectId {
        let mut project = TranslationProject::new("t", Uuid::new_v4(), ProjectSettings::default());
        project.status = ProjectStatus::Translating;
        project.total_chapters = total_chapters;
        let id = project.id;
        agg.insert_project(project).await;
        id
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let (agg, tasks) = aggregator();
        let project_id = seeded_project(&agg, 1).await;
        let task = TranslationTask::new(project_id, TaskType::Outline, Uuid::new_v4(), 1, "mock");
        let task_id = task.id;
        tasks.insert_many(vec![task]).await;
        assert!(tasks.try_claim(task_id, "worker-1").await);

        agg.apply(TaskOutcome {
            task_id,
            worker_id: "worker-1".to_string(),
            result: success(),
        })
        .await;
        let first = tasks.get(task_id).await.unwrap();
        assert_eq!(first.status, TaskStatus::Completed);

        // 重复结果不改变任何账目
        agg.apply(TaskOutcome {
            task_id,
            worker_id: "worker-1".to_string(),
            result: success(),
        })
        .await;
        let project = agg.project(project_id).await.unwrap();
        assert!((project.cost.actual_cost - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stale_worker_outcome_dropped() {
        let (agg, tasks) = aggregator();
        let project_id = seeded_project(&agg, 1).await;
        let task = TranslationTask::new(project_id, TaskType::Translate, Uuid::new_v4(), 1, "mock");
        let task_id = task.id;
        tasks.insert_many(vec![task]).await;
        assert!(tasks.try_claim(task_id, "worker-1").await);

        agg.apply(TaskOutcome {
            task_id,
            worker_id: "worker-2".to_string(),
            result: success(),
        })
        .await;
        assert_eq!(tasks.get(task_id).await.unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_retry_then_terminal() {
        let (agg, tasks) = aggregator();
        let project_id = seeded_project(&agg, 10).await;
        let task = TranslationTask::new(project_id, TaskType::Translate, Uuid::new_v4(), 1, "mock")
            .with_max_retries(2);
        let task_id = task.id;
        tasks.insert_many(vec![task]).await;

        // 第一次瞬时失败：failed，计划重试
        assert!(tasks.try_claim(task_id, "worker-1").await);
        agg.apply(TaskOutcome {
            task_id,
            worker_id: "worker-1".to_string(),
            result: Err(TaskError::Timeout(30)),
        })
        .await;
        let after_first = tasks.get(task_id).await.unwrap();
        assert_eq!(after_first.status, TaskStatus::Failed);
        assert_eq!(after_first.retry_count, 1);
        assert!(after_first.retry_at.is_some());

        // 手动提升并第二次失败：重试耗尽
        tasks
            .update(task_id, |t| {
                t.status = TaskStatus::Ready;
                t.retry_at = None;
            })
            .await;
        assert!(tasks.try_claim(task_id, "worker-2").await);
        agg.apply(TaskOutcome {
            task_id,
            worker_id: "worker-2".to_string(),
            result: Err(TaskError::Timeout(30)),
        })
        .await;
        let after_second = tasks.get(task_id).await.unwrap();
        assert_eq!(after_second.status, TaskStatus::FailedTerminal);
        assert_eq!(after_second.retry_count, 2);
    }

    #[tokio::test]
    async fn test_terminal_failure_cascades_downstream() {
        let (agg, tasks) = aggregator();
        let project_id = seeded_project(&agg, 10).await;
        let chapter = Uuid::new_v4();
        let translate =
            TranslationTask::new(project_id, TaskType::Translate, chapter, 1, "mock");
        let quality = TranslationTask::new(project_id, TaskType::QualityCheck, chapter, 1, "mock")
            .with_depends_on(translate.id);
        let review = TranslationTask::new(project_id, TaskType::Review, chapter, 1, "mock")
            .with_depends_on(quality.id);
        let (t_id, q_id, r_id) = (translate.id, quality.id, review.id);
        tasks.insert_many(vec![translate, quality, review]).await;

        assert!(tasks.try_claim(t_id, "worker-1").await);
        agg.apply(TaskOutcome {
            task_id: t_id,
            worker_id: "worker-1".to_string(),
            result: Err(TaskError::InvalidPayload("bad".into())),
        })
        .await;

        assert_eq!(tasks.get(t_id).await.unwrap().status, TaskStatus::FailedTerminal);
        assert_eq!(tasks.get(q_id).await.unwrap().status, TaskStatus::Cancelled);
        assert_eq!(tasks.get(r_id).await.unwrap().status, TaskStatus::Cancelled);
        assert_eq!(agg.project(project_id).await.unwrap().failed_chapters, 1);
    }

    #[tokio::test]
    async fn test_failure_ratio_fails_project() {
        let (agg, tasks) = aggregator();
        // 阈值 0.5，两章项目：1 章失败就超过 0.5
        let mut project = TranslationProject::new("t", Uuid::new_v4(), ProjectSettings::default());
        project.status = ProjectStatus::Translating;
        project.total_chapters = 1;
        let project_id = project.id;
        agg.insert_project(project).await;

        let task = TranslationTask::new(project_id, TaskType::Translate, Uuid::new_v4(), 1, "mock");
        let task_id = task.id;
        tasks.insert_many(vec![task]).await;
        assert!(tasks.try_claim(task_id, "worker-1").await);
        agg.apply(TaskOutcome {
            task_id,
            worker_id: "worker-1".to_string(),
            result: Err(TaskError::ChapterNotFound),
        })
        .await;

        assert_eq!(agg.project(project_id).await.unwrap().status, ProjectStatus::Failed);
    }

    #[tokio::test]
    async fn test_reviewing_waits_for_quality_checks() {
        let (agg, tasks) = aggregator();
        let project_id = seeded_project(&agg, 1).await;
        let chapter = Uuid::new_v4();
        let translate = TranslationTask::new(project_id, TaskType::Translate, chapter, 1, "mock");
        let quality = TranslationTask::new(project_id, TaskType::QualityCheck, chapter, 1, "mock")
            .with_depends_on(translate.id);
        let review = TranslationTask::new(project_id, TaskType::Review, chapter, 1, "mock")
            .with_depends_on(quality.id);
        let (t_id, q_id, r_id) = (translate.id, quality.id, review.id);
        tasks.insert_many(vec![translate, quality, review]).await;

        assert!(tasks.try_claim(t_id, "worker-1").await);
        agg.apply(TaskOutcome {
            task_id: t_id,
            worker_id: "worker-1".to_string(),
            result: success(),
        })
        .await;
        // 翻译已终态但质量检查还没跑完：不得进入 reviewing
        assert_eq!(
            agg.project(project_id).await.unwrap().status,
            ProjectStatus::Translating
        );

        assert!(tasks.try_claim(q_id, "worker-2").await);
        agg.apply(TaskOutcome {
            task_id: q_id,
            worker_id: "worker-2".to_string(),
            result: success(),
        })
        .await;
        assert_eq!(
            agg.project(project_id).await.unwrap().status,
            ProjectStatus::Reviewing
        );

        assert!(tasks.try_claim(r_id, "worker-3").await);
        agg.apply(TaskOutcome {
            task_id: r_id,
            worker_id: "worker-3".to_string(),
            result: success(),
        })
        .await;
        assert_eq!(
            agg.project(project_id).await.unwrap().status,
            ProjectStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_resume_advances_when_tasks_finished_while_paused() {
        let (agg, tasks) = aggregator();
        let project_id = seeded_project(&agg, 1).await;
        let task = TranslationTask::new(project_id, TaskType::Translate, Uuid::new_v4(), 1, "mock");
        let task_id = task.id;
        tasks.insert_many(vec![task]).await;
        assert!(tasks.try_claim(task_id, "worker-1").await);

        agg.pause(project_id).await.unwrap();
        // 暂停不拦截在跑任务的收尾，但推进在 paused 下不发生
        agg.apply(TaskOutcome {
            task_id,
            worker_id: "worker-1".to_string(),
            result: success(),
        })
        .await;
        assert_eq!(tasks.get(task_id).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(
            agg.project(project_id).await.unwrap().status,
            ProjectStatus::Paused
        );

        // 恢复时补算推进，项目不得卡在中间阶段
        agg.resume(project_id).await.unwrap();
        assert_eq!(
            agg.project(project_id).await.unwrap().status,
            ProjectStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_cascade_cancel_reports_prior_status() {
        let tasks = Arc::new(TaskStore::new());
        let events = Arc::new(EventBus::default());
        let agg = ProjectAggregator::new(
            tasks.clone(),
            Arc::new(CharacterMappingRegistry::new()),
            events.clone(),
            AggregatorPolicy::default(),
        );
        let mut project = TranslationProject::new("t", Uuid::new_v4(), ProjectSettings::default());
        project.status = ProjectStatus::Translating;
        project.total_chapters = 10;
        let project_id = project.id;
        agg.insert_project(project).await;

        let chapter = Uuid::new_v4();
        let translate = TranslationTask::new(project_id, TaskType::Translate, chapter, 1, "mock");
        let quality = TranslationTask::new(project_id, TaskType::QualityCheck, chapter, 1, "mock")
            .with_depends_on(translate.id);
        let (t_id, q_id) = (translate.id, quality.id);
        tasks.insert_many(vec![translate, quality]).await;
        // 后继已处于 ready（上一轮扇出后还没被派发）
        tasks.update(q_id, |t| t.status = TaskStatus::Ready).await;

        let mut rx = events.subscribe();
        assert!(tasks.try_claim(t_id, "worker-1").await);
        agg.apply(TaskOutcome {
            task_id: t_id,
            worker_id: "worker-1".to_string(),
            result: Err(TaskError::InvalidPayload("bad".into())),
        })
        .await;

        let mut seen = None;
        while let Ok(event) = rx.try_recv() {
            if event.task_id == Some(q_id) && event.new_status == "cancelled" {
                seen = Some(event.old_status);
            }
        }
        // 取消事件要报出被取消前的真实状态
        assert_eq!(seen.as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn test_pause_resume_roundtrip() {
        let (agg, _) = aggregator();
        let project_id = seeded_project(&agg, 1).await;

        agg.pause(project_id).await.unwrap();
        assert_eq!(agg.project(project_id).await.unwrap().status, ProjectStatus::Paused);
        assert!(agg.unschedulable_projects().await.contains(&project_id));

        agg.resume(project_id).await.unwrap();
        assert_eq!(
            agg.project(project_id).await.unwrap().status,
            ProjectStatus::Translating
        );
    }
}
