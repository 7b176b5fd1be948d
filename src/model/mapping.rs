//! 角色映射条目
//!
//! 项目范围内 (project_id, original_name) 唯一；落选的候选译名保留在
//! alternative_names 里供审计。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::ProjectId;

/// 实体类型（人物 / 地点 / 组织等）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterType {
    Protagonist,
    Antagonist,
    Supporting,
    Background,
    Place,
    Organization,
    Item,
}

impl Default for CharacterType {
    fn default() -> Self {
        Self::Supporting
    }
}

/// 映射候选（翻译任务或人工创建提出）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingCandidate {
    pub original_name: String,
    pub translated_name: String,
    #[serde(default)]
    pub character_type: CharacterType,
    /// 置信度 0-1
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// 是否自动检测（false 表示人工录入，录入即视为已验证）
    #[serde(default = "default_auto_detected")]
    pub auto_detected: bool,
}

fn default_confidence() -> f64 {
    1.0
}

fn default_auto_detected() -> bool {
    true
}

/// 角色映射条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterMapping {
    pub project_id: ProjectId,
    pub original_name: String,
    pub translated_name: String,
    /// 落选候选译名（审计用）
    pub alternative_names: Vec<String>,
    pub character_type: CharacterType,
    pub confidence: f64,
    /// 已验证条目不会被未验证候选覆盖
    pub is_verified: bool,
    pub auto_detected: bool,
    /// 被提案次数（近似出现频率）
    pub appearance_frequency: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CharacterMapping {
    pub fn from_candidate(project_id: ProjectId, candidate: &MappingCandidate) -> Self {
        let now = Utc::now();
        Self {
            project_id,
            original_name: candidate.original_name.clone(),
            translated_name: candidate.translated_name.clone(),
            alternative_names: Vec::new(),
            character_type: candidate.character_type,
            confidence: candidate.confidence.clamp(0.0, 1.0),
            is_verified: !candidate.auto_detected,
            auto_detected: candidate.auto_detected,
            appearance_frequency: 1,
            created_at: now,
            updated_at: now,
        }
    }
}
