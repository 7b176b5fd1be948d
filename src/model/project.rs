//! 翻译项目与项目状态机
//!
//! 项目记录只由 Aggregator 变更；终态不可变（手动重启除外）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::ProjectId;

/// 项目状态
///
/// `created → analyzing → translating → reviewing → completed`；
/// 旁路：`paused`（可恢复）、`failed`（需手动重启）、`cancelled`（终态）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Created,
    Analyzing,
    Translating,
    Reviewing,
    Completed,
    Paused,
    Failed,
    Cancelled,
}

impl ProjectStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProjectStatus::Completed | ProjectStatus::Failed | ProjectStatus::Cancelled
        )
    }

    /// 该状态下任务是否可被调度
    pub fn is_schedulable(self) -> bool {
        matches!(
            self,
            ProjectStatus::Analyzing | ProjectStatus::Translating | ProjectStatus::Reviewing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Created => "created",
            ProjectStatus::Analyzing => "analyzing",
            ProjectStatus::Translating => "translating",
            ProjectStatus::Reviewing => "reviewing",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Paused => "paused",
            ProjectStatus::Failed => "failed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }
}

/// 项目级流水线配置（原翻译配置模板中与调度相关的部分）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// 源语言（如 zh-CN）
    pub source_language: String,
    /// 目标语言（如 en-US）
    pub target_language: String,
    /// 是否生成章节大纲
    pub generate_outline: bool,
    /// 是否启用质量检查（同时决定是否创建审核任务）
    pub enable_quality_check: bool,
    /// 审核自动通过的质量分阈值
    pub quality_threshold: f64,
    /// 任务最大重试次数
    pub max_retries: u32,
    /// 翻译范围：起始章节（1 起）
    pub start_chapter: u32,
    /// 翻译范围：结束章节（None 表示到末尾）
    pub end_chapter: Option<u32>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            source_language: "zh-CN".to_string(),
            target_language: "en-US".to_string(),
            generate_outline: true,
            enable_quality_check: true,
            quality_threshold: 3.5,
            max_retries: 3,
            start_chapter: 1,
            end_chapter: None,
        }
    }
}

/// 成本累计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostStats {
    /// 启动时估算的成本
    pub estimated_cost: f64,
    /// 实际成本
    pub actual_cost: f64,
    /// 累计 tokens
    pub tokens_used: u64,
}

/// 质量聚合
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityStats {
    /// 已评分章节的平均质量分
    pub average_score: Option<f64>,
    /// 已评分章节数
    pub scored_chapters: u32,
    /// 质量问题总数
    pub issues_count: u32,
}

impl QualityStats {
    /// 并入一次质量检查结果（增量均值）
    pub fn absorb(&mut self, score: f64, issues: u32) {
        let n = self.scored_chapters as f64;
        let avg = self.average_score.unwrap_or(0.0);
        self.average_score = Some((avg * n + score) / (n + 1.0));
        self.scored_chapters += 1;
        self.issues_count += issues;
    }
}

/// 翻译项目：一部小说到一种目标语言的端到端翻译作业
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationProject {
    pub id: ProjectId,
    pub name: String,
    /// 源小说
    pub novel_id: Uuid,
    pub settings: ProjectSettings,
    pub status: ProjectStatus,
    /// paused 之前所处的阶段，resume 时恢复
    pub paused_from: Option<ProjectStatus>,
    /// 进度百分比（0-100，按完成章节计）
    pub progress: f64,
    pub total_chapters: u32,
    pub completed_chapters: u32,
    pub failed_chapters: u32,
    pub cost: CostStats,
    pub quality: QualityStats,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TranslationProject {
    pub fn new(name: impl Into<String>, novel_id: Uuid, settings: ProjectSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            novel_id,
            settings,
            status: ProjectStatus::Created,
            paused_from: None,
            progress: 0.0,
            total_chapters: 0,
            completed_chapters: 0,
            failed_chapters: 0,
            cost: CostStats::default(),
            quality: QualityStats::default(),
            created_at: Utc::now(),
            started_at: None,
            paused_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
        }
    }

    /// 按完成章节重算进度
    pub fn recompute_progress(&mut self) {
        if self.total_chapters > 0 {
            self.progress = self.completed_chapters as f64 / self.total_chapters as f64 * 100.0;
        }
    }

    /// 终态失败章节占比
    pub fn failure_ratio(&self) -> f64 {
        if self.total_chapters == 0 {
            return 0.0;
        }
        self.failed_chapters as f64 / self.total_chapters as f64
    }
}

/// 进度快照（对外查询 DTO，允许落后一个调度 tick）
#[derive(Debug, Clone, Serialize)]
pub struct ProjectProgress {
    pub project_id: ProjectId,
    pub status: ProjectStatus,
    pub overall_progress: f64,
    pub total_chapters: u32,
    pub completed_chapters: u32,
    pub failed_chapters: u32,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub running_tasks: u32,
    pub ready_tasks: u32,
    pub average_quality_score: Option<f64>,
    pub quality_issues_count: u32,
    pub tokens_used: u64,
    pub estimated_cost: f64,
    pub actual_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_recompute() {
        let mut p = TranslationProject::new("t", Uuid::new_v4(), ProjectSettings::default());
        p.total_chapters = 4;
        p.completed_chapters = 1;
        p.recompute_progress();
        assert!((p.progress - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quality_absorb() {
        let mut q = QualityStats::default();
        q.absorb(4.0, 1);
        q.absorb(3.0, 2);
        assert!((q.average_score.unwrap() - 3.5).abs() < 1e-9);
        assert_eq!(q.scored_chapters, 2);
        assert_eq!(q.issues_count, 3);
    }

    #[test]
    fn test_failure_ratio() {
        let mut p = TranslationProject::new("t", Uuid::new_v4(), ProjectSettings::default());
        p.total_chapters = 3;
        p.failed_chapters = 1;
        assert!(p.failure_ratio() > 0.33 && p.failure_ratio() < 0.34);
    }
}
