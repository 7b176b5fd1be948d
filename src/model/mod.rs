//! 数据模型：任务、项目、提供商描述、角色映射

pub mod mapping;
pub mod project;
pub mod provider;
pub mod task;

pub use mapping::{CharacterMapping, CharacterType, MappingCandidate};
pub use project::{
    CostStats, ProjectProgress, ProjectSettings, ProjectStatus, QualityStats, TranslationProject,
};
pub use provider::ProviderDescriptor;
pub use task::{
    ChapterId, ErrorDescriptor, ProjectId, TaskId, TaskStatus, TaskType, TranslationTask,
};
