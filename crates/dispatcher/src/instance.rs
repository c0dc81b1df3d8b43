use chrono::{DateTime, Utc};
use riberry_core::{RiberryError, RiberryResult};
use riberry_domain::{ApplicationInstance, InstanceStatus, Repositories, ScheduleEvaluator};

/// 单次循环内使用的实例快照
///
/// 每个周期加载一次实例和它的调度，之后的判断都基于同一时刻 `now`。
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub instance: ApplicationInstance,
    pub evaluator: ScheduleEvaluator,
    pub now: DateTime<Utc>,
}

impl InstanceSnapshot {
    pub async fn load(repos: &Repositories, instance_name: &str) -> RiberryResult<Self> {
        let instance = repos
            .instances
            .find_by_internal_name(instance_name)
            .await?
            .ok_or_else(|| RiberryError::InstanceNotFound {
                name: instance_name.to_string(),
            })?;
        Self::for_instance(repos, instance).await
    }

    pub async fn for_instance(
        repos: &Repositories,
        instance: ApplicationInstance,
    ) -> RiberryResult<Self> {
        let schedules = repos.schedules.find_by_instance(instance.id).await?;
        Ok(Self {
            instance,
            evaluator: ScheduleEvaluator::new(schedules),
            now: Utc::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.instance.internal_name
    }

    pub fn status(&self, offline_after_seconds: i64) -> InstanceStatus {
        self.evaluator
            .instance_status(&self.instance, self.now, offline_after_seconds)
    }

    pub fn value(&self, parameter: &str) -> Option<String> {
        self.evaluator.active_value(parameter, self.now)
    }

    pub fn value_or(&self, parameter: &str, default: &str) -> String {
        self.evaluator.active_value_or(parameter, self.now, default)
    }
}
