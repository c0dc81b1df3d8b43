//! 指标导出
//!
//! 控制循环直接使用 `metrics` 宏记录，这里只负责名称、描述和 Prometheus 导出器。

use std::net::SocketAddr;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use riberry_core::{config::ObservabilityConfig, RiberryError, RiberryResult};
use tracing::info;

pub const EXECUTIONS_DISPATCHED: &str = "riberry_executions_dispatched_total";
pub const EXECUTIONS_COMPLETED: &str = "riberry_executions_completed_total";
pub const EXECUTIONS_STALE: &str = "riberry_executions_stale_total";
pub const EVENTS_PROCESSED: &str = "riberry_events_processed_total";
pub const EVENTS_RETAINED: &str = "riberry_events_retained_total";
pub const EVENTS_MALFORMED: &str = "riberry_events_malformed_total";
pub const LOCK_ACQUISITIONS: &str = "riberry_lock_acquisitions_total";
pub const TASKS_EXECUTED: &str = "riberry_tasks_executed_total";
pub const TASK_DURATION: &str = "riberry_task_duration_seconds";
pub const TASK_RETRIES: &str = "riberry_task_retries_total";
pub const WORKER_CONCURRENCY: &str = "riberry_worker_concurrency";
pub const SCALE_TARGET: &str = "riberry_scale_target";
pub const CAPACITY_UPDATES: &str = "riberry_capacity_updates_total";

/// 注册指标描述
pub fn describe_metrics() {
    describe_counter!(EXECUTIONS_DISPATCHED, "Job executions submitted to the transport");
    describe_counter!(EXECUTIONS_COMPLETED, "Job executions that reached a terminal state");
    describe_counter!(EXECUTIONS_STALE, "Executions failed by the stale watchdog");
    describe_counter!(EVENTS_PROCESSED, "Events folded into persistent state");
    describe_counter!(EVENTS_RETAINED, "Events kept for the next batch after a handler error");
    describe_counter!(EVENTS_MALFORMED, "Events dropped because their data could not be decoded");
    describe_counter!(LOCK_ACQUISITIONS, "Throttled distributed lock acquisitions");
    describe_counter!(TASKS_EXECUTED, "Worker task invocations by outcome");
    describe_histogram!(TASK_DURATION, Unit::Seconds, "Worker task duration");
    describe_counter!(TASK_RETRIES, "Worker task retries scheduled");
    describe_gauge!(WORKER_CONCURRENCY, "Current worker pool size");
    describe_gauge!(SCALE_TARGET, "Last computed scale target");
    describe_counter!(CAPACITY_UPDATES, "Priority queue versions published");
}

/// 启用时安装 Prometheus 导出器
pub fn init_metrics(config: &ObservabilityConfig) -> RiberryResult<()> {
    if !config.metrics_enabled {
        return Ok(());
    }

    let address: SocketAddr = config.metrics_bind_address.parse().map_err(|e| {
        RiberryError::Configuration(format!(
            "无效的指标监听地址 {}: {}",
            config.metrics_bind_address, e
        ))
    })?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| RiberryError::Configuration(format!("安装Prometheus导出器失败: {e}")))?;

    describe_metrics();
    info!("Prometheus指标导出已启动: {}", address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = ObservabilityConfig::default();
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_bind_address_rejected() {
        let config = ObservabilityConfig {
            metrics_enabled: true,
            metrics_bind_address: "not-an-address".to_string(),
            ..ObservabilityConfig::default()
        };
        assert!(matches!(
            init_metrics(&config),
            Err(RiberryError::Configuration(_))
        ));
    }
}
