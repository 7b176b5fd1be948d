//! 状态存储：任务表与角色映射注册表

pub mod mapping_registry;
pub mod task_store;

pub use mapping_registry::{CharacterMappingRegistry, MergeOutcome};
pub use task_store::TaskStore;
