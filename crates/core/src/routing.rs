use std::collections::HashMap;

use crate::{config::TransportConfig, models::TaskMessage};

/// 作业执行入口任务
pub const ENTRY_POINT_TASK: &str = "riberry.core.app.entry_point";
/// 外部任务接收任务
pub const CHECK_EXTERNAL_TASK: &str = "riberry.core.app.check_external_task";
/// 作业执行完成回调任务
pub const EXECUTION_COMPLETE_TASK: &str = "riberry.core.execution_complete";

/// 按任务名路由到队列
#[derive(Debug, Clone)]
pub struct TaskRouter {
    default_queue: String,
    routes: HashMap<String, String>,
}

impl TaskRouter {
    pub fn new(default_queue: impl Into<String>) -> Self {
        Self {
            default_queue: default_queue.into(),
            routes: HashMap::new(),
        }
    }

    /// 外部任务接收任务总是路由到外部队列
    pub fn from_config(config: &TransportConfig) -> Self {
        let mut router = Self::new(config.default_queue.clone());
        for (task, queue) in &config.routes {
            router.add_route(task.clone(), queue.clone());
        }
        router.add_route(CHECK_EXTERNAL_TASK, config.external_queue.clone());
        router
    }

    pub fn add_route(&mut self, task_name: impl Into<String>, queue: impl Into<String>) {
        self.routes.insert(task_name.into(), queue.into());
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    pub fn queue_for(&self, message: &TaskMessage) -> String {
        if let Some(queue) = &message.queue {
            return queue.clone();
        }
        self.routes
            .get(&message.task_name)
            .cloned()
            .unwrap_or_else(|| self.default_queue.clone())
    }

    /// 所有已知队列（去重、排序）
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self.routes.values().cloned().collect();
        queues.push(self.default_queue.clone());
        queues.sort();
        queues.dedup();
        queues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_external_task_is_routed_to_external_queue() {
        let router = TaskRouter::from_config(&TransportConfig::default());
        let message = TaskMessage::new(CHECK_EXTERNAL_TASK, json!({}));
        assert_eq!(router.queue_for(&message), "rib.external");

        let other = TaskMessage::new("demo.work", json!({}));
        assert_eq!(router.queue_for(&other), "rib.default");
    }

    #[test]
    fn test_explicit_queue_wins() {
        let mut router = TaskRouter::new("default");
        router.add_route("demo.work", "slow");
        let message = TaskMessage::new("demo.work", json!({})).with_queue("urgent");
        assert_eq!(router.queue_for(&message), "urgent");
        assert_eq!(router.queues(), vec!["default".to_string(), "slow".to_string()]);
    }
}
