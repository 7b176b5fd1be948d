//! 翻译任务记录与任务状态机
//!
//! 每个任务是「一个章节 × 一个流水线阶段」；同章节的阶段通过 depends_on
//! 串成线性链（outline → character_map → translate → quality_check → review）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务 ID
pub type TaskId = Uuid;
/// 项目 ID
pub type ProjectId = Uuid;
/// 章节 ID
pub type ChapterId = Uuid;

/// 流水线阶段（封闭枚举，按变体查表分发到处理函数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// 章节大纲提取
    Outline,
    /// 角色名识别与映射提案
    CharacterMap,
    /// 正文翻译
    Translate,
    /// 翻译质量检查
    QualityCheck,
    /// 审核关卡（按质量分自动通过或标记待修订）
    Review,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Outline => "outline",
            TaskType::CharacterMap => "character_map",
            TaskType::Translate => "translate",
            TaskType::QualityCheck => "quality_check",
            TaskType::Review => "review",
        }
    }

    /// 分析阶段（analyzing 项目状态覆盖的任务类型）
    pub fn is_analysis_stage(self) -> bool {
        matches!(self, TaskType::Outline | TaskType::CharacterMap)
    }

    /// 该阶段是否调用外部提供商（审核是本地质量闸，不占限流额度）
    pub fn calls_provider(self) -> bool {
        !matches!(self, TaskType::Review)
    }
}

/// 任务状态
///
/// `pending → ready → running → {completed | failed → (retry→ready) | failed_terminal}`；
/// 任一非终态可转 `cancelled`。取消只向下游传染，不向上游。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 前置任务尚未完成
    Pending,
    /// 依赖满足，可被调度
    Ready,
    /// 已被唯一 worker 认领
    Running,
    /// 结果已存储（终态）
    Completed,
    /// 瞬时失败，等待重试计时
    Failed,
    /// 重试耗尽或不可恢复（终态）
    FailedTerminal,
    /// 已取消（终态）
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::FailedTerminal | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::FailedTerminal => "failed_terminal",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// 结构化错误描述（code + message），随任务记录保存，不跨调度器边界抛出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub code: String,
    pub message: String,
}

/// 翻译任务记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationTask {
    /// 任务 ID
    pub id: TaskId,
    /// 所属项目
    pub project_id: ProjectId,
    /// 流水线阶段
    pub task_type: TaskType,
    /// 目标章节
    pub chapter_id: ChapterId,
    /// 章节号（1 起）
    pub chapter_number: u32,
    /// 执行该任务的提供商
    pub provider_id: String,
    /// 优先级（1 最高 … 10 最低）
    pub priority: u8,
    /// 前置任务（线性链，至多一个）
    pub depends_on: Option<TaskId>,
    /// 任务状态
    pub status: TaskStatus,
    /// 当前认领者（与 status 一起 CAS 更新，防止重复执行）
    pub worker_id: Option<String>,
    /// 已重试次数
    pub retry_count: u32,
    /// 最大重试次数
    pub max_retries: u32,
    /// failed 状态下的重试到期时间
    pub retry_at: Option<DateTime<Utc>>,
    /// 结果载荷（按任务类型为 JSON 对象）
    pub result: Option<serde_json::Value>,
    /// 错误描述
    pub error: Option<ErrorDescriptor>,
    /// 本任务消耗的 tokens
    pub tokens_used: u64,
    /// 本任务实际成本
    pub actual_cost: f64,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 认领时间（活性超时判定用）
    pub claimed_at: Option<DateTime<Utc>>,
    /// 开始执行时间
    pub started_at: Option<DateTime<Utc>>,
    /// 完成时间
    pub completed_at: Option<DateTime<Utc>>,
}

impl TranslationTask {
    pub fn new(
        project_id: ProjectId,
        task_type: TaskType,
        chapter_id: ChapterId,
        chapter_number: u32,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            task_type,
            chapter_id,
            chapter_number,
            provider_id: provider_id.into(),
            priority: 5,
            depends_on: None,
            status: TaskStatus::Ready,
            worker_id: None,
            retry_count: 0,
            max_retries: 3,
            retry_at: None,
            result: None,
            error: None,
            tokens_used: 0,
            actual_cost: 0.0,
            created_at: Utc::now(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    /// 设置前置任务，同时状态回到 pending
    pub fn with_depends_on(mut self, predecessor: TaskId) -> Self {
        self.depends_on = Some(predecessor);
        self.status = TaskStatus::Pending;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
