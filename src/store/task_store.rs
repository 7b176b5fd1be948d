//! 任务表
//!
//! 内存任务记录 + 项目索引 + 依赖反向索引；认领是对 status+worker_id 的
//! CAS（在写锁内完成），保证同一任务只被一个 worker 执行。
//! 可选 sqlite 持久化（feature = "persist"）：写入尽力而为，重启时恢复
//! 未终态任务。

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::model::{ProjectId, TaskId, TaskStatus, TranslationTask};

/// 任务存储
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, TranslationTask>>,
    /// 项目 -> 任务（创建序）
    project_tasks: RwLock<HashMap<ProjectId, Vec<TaskId>>>,
    /// 前置任务 -> 后继任务
    dependents: RwLock<HashMap<TaskId, Vec<TaskId>>>,
    #[cfg(feature = "persist")]
    pool: Option<sqlx::sqlite::SqlitePool>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            project_tasks: RwLock::new(HashMap::new()),
            dependents: RwLock::new(HashMap::new()),
            #[cfg(feature = "persist")]
            pool: None,
        }
    }

    /// 批量插入（项目启动时生成整张任务图）
    pub async fn insert_many(&self, new_tasks: Vec<TranslationTask>) {
        let mut tasks = self.tasks.write().await;
        let mut project_tasks = self.project_tasks.write().await;
        let mut dependents = self.dependents.write().await;

        for task in new_tasks {
            if let Some(dep) = task.depends_on {
                dependents.entry(dep).or_default().push(task.id);
            }
            project_tasks
                .entry(task.project_id)
                .or_default()
                .push(task.id);

            // 持久化走后台尽力而为，不在持锁期间等数据库
            #[cfg(feature = "persist")]
            self.persist_async(task.clone());

            tasks.insert(task.id, task);
        }
    }

    pub async fn get(&self, task_id: TaskId) -> Option<TranslationTask> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    /// 项目的全部任务（创建序）
    pub async fn project_tasks(&self, project_id: ProjectId) -> Vec<TranslationTask> {
        let tasks = self.tasks.read().await;
        let index = self.project_tasks.read().await;
        index
            .get(&project_id)
            .map(|ids| ids.iter().filter_map(|id| tasks.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// 后继任务 ID
    pub async fn dependents_of(&self, task_id: TaskId) -> Vec<TaskId> {
        self.dependents
            .read()
            .await
            .get(&task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 收集可调度候选：ready 状态且项目未被排除，按（优先级升序，创建时间升序）排好
    pub async fn collect_ready(&self, excluded_projects: &HashSet<ProjectId>) -> Vec<TranslationTask> {
        let tasks = self.tasks.read().await;
        let mut ready: Vec<TranslationTask> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Ready && !excluded_projects.contains(&t.project_id))
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        ready
    }

    /// 原子认领：ready 且无认领者时置为 running 并登记 worker_id
    pub async fn try_claim(&self, task_id: TaskId, worker_id: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&task_id) else {
            return false;
        };
        if task.status != TaskStatus::Ready || task.worker_id.is_some() {
            return false;
        }
        task.status = TaskStatus::Running;
        task.worker_id = Some(worker_id.to_string());
        let now = Utc::now();
        task.claimed_at = Some(now);
        task.started_at = Some(now);

        #[cfg(feature = "persist")]
        self.persist_async(task.clone());

        true
    }

    /// 更新任务并返回更新后的快照（持写锁执行闭包）
    pub async fn update<F>(&self, task_id: TaskId, f: F) -> Option<TranslationTask>
    where
        F: FnOnce(&mut TranslationTask),
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id)?;
        f(task);
        let snapshot = task.clone();

        #[cfg(feature = "persist")]
        self.persist_async(snapshot.clone());

        Some(snapshot)
    }

    /// failed 且重试到期的任务
    pub async fn due_retries(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let tasks = self.tasks.read().await;
        tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Failed
                    && t.retry_at.map(|at| at <= now).unwrap_or(true)
            })
            .map(|t| t.id)
            .collect()
    }

    /// 认领超过活性超时仍在 running 的任务（worker 失联恢复）
    pub async fn stale_claims(&self, now: DateTime<Utc>, timeout_secs: u64) -> Vec<TranslationTask> {
        let tasks = self.tasks.read().await;
        tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Running
                    && t.claimed_at
                        .map(|at| (now - at).num_seconds() as u64 > timeout_secs)
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    #[cfg(feature = "persist")]
    fn persist_async(&self, task: TranslationTask) {
        if let Some(pool) = &self.pool {
            let pool = pool.clone();
            tokio::spawn(async move {
                if let Err(e) = save_task(&pool, &task).await {
                    tracing::warn!("Task persistence failed for {}: {}", task.id, e);
                }
            });
        }
    }

    /// 打开 sqlite 持久化存储并恢复未终态任务
    #[cfg(feature = "persist")]
    pub async fn with_persistence(db_path: impl AsRef<std::path::Path>) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(3)
            .connect(&db_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS translation_tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                record TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_project ON translation_tasks(project_id)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON translation_tasks(status)")
            .execute(&pool)
            .await?;

        let store = Self {
            tasks: RwLock::new(HashMap::new()),
            project_tasks: RwLock::new(HashMap::new()),
            dependents: RwLock::new(HashMap::new()),
            pool: Some(pool),
        };
        store.restore().await?;
        Ok(store)
    }

    /// 从数据库恢复未终态任务；running 任务的认领跨进程不保留，回退为 ready
    #[cfg(feature = "persist")]
    async fn restore(&self) -> Result<(), sqlx::Error> {
        use sqlx::Row;

        let pool = match &self.pool {
            Some(p) => p,
            None => return Ok(()),
        };
        let rows = sqlx::query(
            "SELECT record FROM translation_tasks
             WHERE status NOT IN ('completed', 'failed_terminal', 'cancelled')
             ORDER BY created_at ASC",
        )
        .fetch_all(pool)
        .await?;

        let mut tasks = self.tasks.write().await;
        let mut project_tasks = self.project_tasks.write().await;
        let mut dependents = self.dependents.write().await;

        for row in rows {
            let record: String = row.get("record");
            let mut task: TranslationTask = match serde_json::from_str(&record) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("Skipping unreadable task record: {}", e);
                    continue;
                }
            };
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Ready;
                task.worker_id = None;
                task.claimed_at = None;
            }
            if let Some(dep) = task.depends_on {
                dependents.entry(dep).or_default().push(task.id);
            }
            project_tasks.entry(task.project_id).or_default().push(task.id);
            tasks.insert(task.id, task);
        }

        if !tasks.is_empty() {
            tracing::info!("Restored {} pipeline tasks from database", tasks.len());
        }
        Ok(())
    }
}

#[cfg(feature = "persist")]
async fn save_task(
    pool: &sqlx::sqlite::SqlitePool,
    task: &TranslationTask,
) -> Result<(), sqlx::Error> {
    let record = serde_json::to_string(task).unwrap_or_default();
    sqlx::query(
        "INSERT OR REPLACE INTO translation_tasks (id, project_id, record, status, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(task.id.to_string())
    .bind(task.project_id.to_string())
    .bind(&record)
    .bind(task.status.as_str())
    .bind(task.created_at.timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskType;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = TaskStore::new();
        let task = TranslationTask::new(Uuid::new_v4(), TaskType::Translate, Uuid::new_v4(), 1, "mock");
        let id = task.id;
        store.insert_many(vec![task]).await;

        assert!(store.try_claim(id, "worker-1").await);
        // 第二次认领必须失败
        assert!(!store.try_claim(id, "worker-2").await);

        let claimed = store.get(id).await.unwrap();
        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn test_collect_ready_ordering() {
        let store = TaskStore::new();
        let project = Uuid::new_v4();
        let low = TranslationTask::new(project, TaskType::Translate, Uuid::new_v4(), 1, "mock")
            .with_priority(7);
        let high = TranslationTask::new(project, TaskType::Translate, Uuid::new_v4(), 2, "mock")
            .with_priority(2);
        store.insert_many(vec![low, high.clone()]).await;

        let ready = store.collect_ready(&HashSet::new()).await;
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].id, high.id);
    }

    #[tokio::test]
    async fn test_collect_ready_excludes_paused_projects() {
        let store = TaskStore::new();
        let paused = Uuid::new_v4();
        let active = Uuid::new_v4();
        store
            .insert_many(vec![
                TranslationTask::new(paused, TaskType::Outline, Uuid::new_v4(), 1, "mock"),
                TranslationTask::new(active, TaskType::Outline, Uuid::new_v4(), 1, "mock"),
            ])
            .await;

        let mut excluded = HashSet::new();
        excluded.insert(paused);
        let ready = store.collect_ready(&excluded).await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].project_id, active);
    }

    #[cfg(feature = "persist")]
    #[tokio::test]
    async fn test_restore_resets_running_claims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        let task = TranslationTask::new(Uuid::new_v4(), TaskType::Translate, Uuid::new_v4(), 1, "mock");
        let id = task.id;
        {
            let store = TaskStore::with_persistence(&path).await.unwrap();
            store.insert_many(vec![task]).await;
            assert!(store.try_claim(id, "worker-1").await);
            // 认领的持久化是后台写，稍等落盘
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        let store = TaskStore::with_persistence(&path).await.unwrap();
        let restored = store.get(id).await.unwrap();
        assert_eq!(restored.status, TaskStatus::Ready);
        assert!(restored.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_dependents_index() {
        let store = TaskStore::new();
        let project = Uuid::new_v4();
        let chapter = Uuid::new_v4();
        let outline = TranslationTask::new(project, TaskType::Outline, chapter, 1, "mock");
        let translate = TranslationTask::new(project, TaskType::Translate, chapter, 1, "mock")
            .with_depends_on(outline.id);
        let outline_id = outline.id;
        let translate_id = translate.id;
        store.insert_many(vec![outline, translate]).await;

        assert_eq!(store.dependents_of(outline_id).await, vec![translate_id]);
    }
}
