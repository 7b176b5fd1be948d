//! 状态变更事件
//!
//! 广播通道：任务与项目的每次状态迁移发一条 StateChange。
//! 无订阅者时发送失败被忽略，事件流是尽力而为的观察面。

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{ProjectId, TaskId};

/// 状态变更事件
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub project_id: ProjectId,
    /// None 表示项目级变更
    pub task_id: Option<TaskId>,
    pub old_status: String,
    pub new_status: String,
    pub timestamp: DateTime<Utc>,
}

/// 事件总线
pub struct EventBus {
    sender: broadcast::Sender<StateChange>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.sender.subscribe()
    }

    pub fn task_changed(&self, project_id: ProjectId, task_id: TaskId, old: &str, new: &str) {
        let _ = self.sender.send(StateChange {
            project_id,
            task_id: Some(task_id),
            old_status: old.to_string(),
            new_status: new.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn project_changed(&self, project_id: ProjectId, old: &str, new: &str) {
        let _ = self.sender.send(StateChange {
            project_id,
            task_id: None,
            old_status: old.to_string(),
            new_status: new.to_string(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let project = Uuid::new_v4();
        bus.project_changed(project, "created", "analyzing");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.project_id, project);
        assert!(event.task_id.is_none());
        assert_eq!(event.new_status, "analyzing");
    }

    #[test]
    fn test_send_without_subscriber_is_ignored() {
        let bus = EventBus::default();
        bus.task_changed(Uuid::new_v4(), Uuid::new_v4(), "ready", "running");
    }
}
