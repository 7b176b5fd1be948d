//! 调度循环
//!
//! 事件驱动 tick：任务落账 / 项目启动恢复的唤醒、限流释放、重试与活性
//! 检查的定时器三路触发。每个 tick 先提升到期重试，再按（优先级，创建
//! 时间）遍历 ready 候选：无执行槽直接收手；限流拒绝只跳过该任务；CAS
//! 认领成功才派发。调度器自身从不阻塞等待。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::provider::RateLimiter;
use crate::store::TaskStore;

use super::aggregator::{ProjectAggregator, TaskOutcome};
use super::error::TaskError;
use super::events::EventBus;
use super::worker::WorkerPool;

/// 调度器
pub struct Scheduler {
    tasks: Arc<TaskStore>,
    aggregator: Arc<ProjectAggregator>,
    workers: Arc<WorkerPool>,
    limiter: Arc<RateLimiter>,
    events: Arc<EventBus>,
    /// 外部唤醒（任务落账、项目启动 / 恢复）
    wake: Arc<Notify>,
    tick_interval: Duration,
    /// running 超过该秒数视为 worker 失联
    claim_timeout_secs: u64,
    cancel: CancellationToken,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<TaskStore>,
        aggregator: Arc<ProjectAggregator>,
        workers: Arc<WorkerPool>,
        limiter: Arc<RateLimiter>,
        events: Arc<EventBus>,
        wake: Arc<Notify>,
        tick_interval: Duration,
        claim_timeout_secs: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tasks,
            aggregator,
            workers,
            limiter,
            events,
            wake,
            tick_interval,
            claim_timeout_secs,
            cancel,
        }
    }

    /// 主循环，直到取消令牌触发
    pub async fn run(self) {
        tracing::info!("Scheduler started");
        let mut timer = tokio::time::interval(self.tick_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.tick().await;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = self.limiter.released().notified() => {}
                _ = timer.tick() => {
                    self.recover_stale_claims().await;
                }
            }
        }
        tracing::info!("Scheduler stopped");
    }

    async fn tick(&self) {
        let promoted = self.aggregator.promote_due_retries().await;
        if promoted > 0 {
            tracing::debug!("Promoted {} retry-due tasks to ready", promoted);
        }

        let excluded = self.aggregator.unschedulable_projects().await;
        let candidates = self.tasks.collect_ready(&excluded).await;

        for task in candidates {
            // 无空闲执行槽：本 tick 到此为止
            let Some(permit) = self.workers.try_acquire() else {
                break;
            };
            // 限流拒绝：跳过该任务，别的提供商可能还有余量；
            // 本地阶段（审核）不调用提供商，不占限流额度
            let needs_permit = task.task_type.calls_provider();
            if needs_permit && !self.limiter.try_acquire(&task.provider_id) {
                drop(permit);
                continue;
            }
            let worker_id = WorkerPool::next_worker_id();
            if !self.tasks.try_claim(task.id, &worker_id).await {
                // 认领竞争失败，退还许可
                if needs_permit {
                    self.limiter.release(&task.provider_id);
                }
                drop(permit);
                continue;
            }
            self.events
                .task_changed(task.project_id, task.id, "ready", "running");
            tracing::debug!(
                task_id = %task.id,
                task_type = task.task_type.as_str(),
                chapter = task.chapter_number,
                provider = %task.provider_id,
                %worker_id,
                "Task dispatched"
            );
            self.workers.spawn_execute(permit, task, worker_id);
        }
    }

    /// worker 失联恢复：超时的认领按瞬时失败落账并退还限流许可
    async fn recover_stale_claims(&self) {
        let stale = self
            .tasks
            .stale_claims(Utc::now(), self.claim_timeout_secs)
            .await;
        for task in stale {
            tracing::warn!(
                task_id = %task.id,
                worker = task.worker_id.as_deref().unwrap_or("?"),
                "Reclaiming stale running task"
            );
            if task.task_type.calls_provider() {
                self.limiter.release(&task.provider_id);
            }
            self.aggregator
                .apply(TaskOutcome {
                    task_id: task.id,
                    worker_id: task.worker_id.clone().unwrap_or_default(),
                    result: Err(TaskError::WorkerLost),
                })
                .await;
        }
    }
}
