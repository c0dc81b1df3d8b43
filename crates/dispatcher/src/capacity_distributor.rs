//! 容量分配
//!
//! 把消费者实例的权重请求换算成每个实例的 `capacity` 与 `producer` 调度。
//! 每次运行都覆盖上一次的分配，相同输入得到相同的调度记录。

use async_trait::async_trait;
use chrono::Utc;
use riberry_core::RiberryResult;
use riberry_domain::{
    allocate, CapacityAllocation, CapacityConfiguration, CapacityConsumer, ExecutionStatus,
    InstanceStatus, Repositories,
};
use tracing::{debug, info, instrument};

use crate::instance::InstanceSnapshot;
use crate::loop_runner::PeriodicStep;

/// 容量分配的锁槽位
pub const CAPACITY_DISTRIBUTOR_LOCK: &str = "step:capacity-distributor";

pub struct CapacityDistributor {
    repos: Repositories,
    offline_after_seconds: i64,
}

impl CapacityDistributor {
    pub fn new(repos: Repositories, offline_after_seconds: i64) -> Self {
        Self {
            repos,
            offline_after_seconds,
        }
    }

    /// 对所有容量配置执行一次分配
    #[instrument(skip(self))]
    pub async fn run(&self) -> RiberryResult<Vec<CapacityAllocation>> {
        let mut allocations = Vec::new();
        for configuration in self.repos.capacities.list().await? {
            allocations.extend(self.distribute(&configuration).await?);
        }
        Ok(allocations)
    }

    pub async fn distribute(
        &self,
        configuration: &CapacityConfiguration,
    ) -> RiberryResult<Vec<CapacityAllocation>> {
        let consumers = self.consumers(&configuration.weight_parameter).await?;
        if consumers.is_empty() {
            debug!(weight = %configuration.weight_parameter, "没有声明权重的实例");
            return Ok(Vec::new());
        }

        let allocations = allocate(
            configuration.distribution_strategy,
            &configuration.producers,
            &consumers,
        );

        let parameters = vec![
            configuration.capacity_parameter.clone(),
            configuration.producer_parameter.clone(),
        ];
        for allocation in &allocations {
            let schedules = allocation.schedules(
                &configuration.capacity_parameter,
                &configuration.producer_parameter,
            );
            self.repos
                .schedules
                .replace_parameters(allocation.instance_id, &parameters, &schedules)
                .await?;
            info!(
                instance = %allocation.name,
                capacity = allocation.capacity,
                producers = %allocation.producer_value(),
                "容量分配已更新"
            );
        }

        Ok(allocations)
    }

    async fn consumers(&self, weight_parameter: &str) -> RiberryResult<Vec<CapacityConsumer>> {
        let instances = self.repos.instances.find_with_parameter(weight_parameter).await?;
        let now = Utc::now();

        let mut consumers = Vec::with_capacity(instances.len());
        for instance in instances {
            let mut snapshot = InstanceSnapshot::for_instance(&self.repos, instance).await?;
            snapshot.now = now;

            let requested = snapshot
                .value(weight_parameter)
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .map(|value| value as i64);

            let online = snapshot.status(self.offline_after_seconds) == InstanceStatus::Online;
            let active = online
                && self
                    .repos
                    .executions
                    .count_by_instance_and_status(
                        snapshot.instance.id,
                        &[ExecutionStatus::Active, ExecutionStatus::Ready],
                    )
                    .await?
                    > 0;

            consumers.push(CapacityConsumer {
                instance_id: snapshot.instance.id,
                name: snapshot.instance.internal_name.clone(),
                requested,
                active,
            });
        }

        Ok(consumers)
    }
}

#[async_trait]
impl PeriodicStep for CapacityDistributor {
    fn name(&self) -> &str {
        CAPACITY_DISTRIBUTOR_LOCK
    }

    async fn run_once(&self) -> RiberryResult<()> {
        self.run().await.map(|_| ())
    }
}
