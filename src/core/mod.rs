//! 流水线核心：错误、重试策略、事件、聚合、调度与执行

pub mod aggregator;
pub mod engine;
pub mod error;
pub mod events;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use aggregator::{AggregatorPolicy, ProjectAggregator, TaskOutcome, TaskSuccess};
pub use engine::PipelineEngine;
pub use error::{EngineError, TaskError};
pub use events::{EventBus, StateChange};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use worker::WorkerPool;
