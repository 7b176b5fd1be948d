//! Yiliu（译流）- AI 小说翻译流水线编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **content**: 章节内容访问（trait + 内存实现）
//! - **core**: 错误、重试策略、事件、聚合器、调度器、worker 池与引擎门面
//! - **model**: 任务 / 项目 / 提供商描述 / 角色映射的数据模型
//! - **observability**: tracing 初始化
//! - **provider**: AI 提供商抽象、限流器、注册表（OpenAI 兼容 / Mock）
//! - **store**: 任务表与角色映射注册表

pub mod config;
pub mod content;
pub mod core;
pub mod model;
pub mod observability;
pub mod provider;
pub mod store;

pub use crate::core::PipelineEngine;
