mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use riberry_core::{
    config::{EmailConfig, TransportConfig},
    MessageQueue, RiberryError, RiberryResult, TaskMessage, TaskRouter, ENTRY_POINT_TASK,
};
use riberry_dispatcher::{
    BackgroundTasks, EventIngestor, ExecutionDispatcher, InstanceSnapshot, StaleExecutionWatchdog,
    TransportLauncher,
};
use riberry_domain::*;

async fn snapshot(fixture: &Fixture) -> InstanceSnapshot {
    InstanceSnapshot::load(&fixture.repos, INSTANCE).await.unwrap()
}

#[tokio::test]
async fn test_single_execution_happy_path() {
    let fixture = Fixture::new().await;
    fixture.online().await;
    let execution = fixture.execution(64).await;

    let dispatched = fixture.dispatcher().poll(&snapshot(&fixture).await).await.unwrap();
    assert_eq!(dispatched, 1);

    let ready = fixture.reload(&execution).await;
    assert_eq!(ready.status, ExecutionStatus::Ready);
    let root_id = ready.task_id.clone().unwrap();
    assert!(fixture.tracker().is_tracked(INSTANCE, &root_id).await.unwrap());

    let message = fixture
        .infra
        .transport
        .consume_message("rib.default")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.task_name, ENTRY_POINT_TASK);
    assert_eq!(message.root_id, root_id);
    assert_eq!(message.args["execution_id"], execution.id);
    assert_eq!(message.args["entry_point"], ENTRY_POINT);

    let lifecycle = fixture.lifecycle();
    lifecycle
        .execution_started(execution.id, &root_id, PRIMARY_STREAM)
        .await
        .unwrap();
    assert!(lifecycle
        .execution_complete(&root_id, ExecutionStatus::Success, Some(PRIMARY_STREAM))
        .await
        .unwrap());

    let ingestor = EventIngestor::new(
        fixture.repos.clone(),
        Arc::new(RecordingEmailSender::default()),
        EmailConfig::default(),
        None,
    );
    let report = ingestor.process().await.unwrap();
    assert_eq!(report.retained, 0);

    let done = fixture.reload(&execution).await;
    assert_eq!(done.status, ExecutionStatus::Success);

    let stream = fixture
        .repos
        .streams
        .find_stream(execution.id, PRIMARY_STREAM)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stream.status, StreamStatus::Success);
    assert!(stream.started.is_some());
    assert!(stream.completed >= stream.started);

    let notifications = fixture
        .repos
        .notifications
        .list_for_user(fixture.user.id)
        .await
        .unwrap();
    let completed: Vec<_> = notifications
        .iter()
        .filter(|n| n.notification_type == NotificationType::Success)
        .collect();
    assert_eq!(completed.len(), 1);
    assert!(completed[0].message.contains("with status success"));
}

#[tokio::test]
async fn test_dispatch_order_follows_priority() {
    let fixture = Fixture::new().await;
    fixture.online().await;
    let low = fixture.execution(1).await;
    let high = fixture.execution(5).await;

    fixture.dispatcher().poll(&snapshot(&fixture).await).await.unwrap();

    let first = fixture
        .infra
        .transport
        .consume_message("rib.default")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.args["execution_id"], high.id);
    assert_eq!(fixture.reload(&low).await.status, ExecutionStatus::Ready);
}

#[tokio::test]
async fn test_offline_instance_is_not_polled() {
    let fixture = Fixture::new().await;
    let execution = fixture.execution(1).await;

    let dispatched = fixture.dispatcher().poll(&snapshot(&fixture).await).await.unwrap();
    assert_eq!(dispatched, 0);
    assert_eq!(fixture.reload(&execution).await.status, ExecutionStatus::Received);
}

#[tokio::test]
async fn test_accept_and_limit_parameters() {
    let fixture = Fixture::new().await;
    fixture.online().await;
    fixture.execution(1).await;
    fixture.execution(1).await;

    fixture.schedule("accept", "N").await;
    assert_eq!(
        fixture.dispatcher().poll(&snapshot(&fixture).await).await.unwrap(),
        0
    );

    let fixture = Fixture::new().await;
    fixture.online().await;
    fixture.execution(1).await;
    fixture.execution(1).await;
    fixture.schedule("limit", "1").await;
    assert_eq!(
        fixture.dispatcher().poll(&snapshot(&fixture).await).await.unwrap(),
        1
    );
    assert_eq!(
        fixture.dispatcher().poll(&snapshot(&fixture).await).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_submission_failure_fails_execution() {
    let fixture = Fixture::new().await;
    fixture.online().await;
    let execution = fixture.execution(1).await;

    let launcher = TransportLauncher::new(
        fixture.infra.transport.clone(),
        TaskRouter::from_config(&TransportConfig::default()),
        fixture.lifecycle(),
    );
    let dispatcher = ExecutionDispatcher::new(
        fixture.lifecycle(),
        fixture.tracker(),
        Arc::new(launcher),
        10,
    );

    assert_eq!(dispatcher.poll(&snapshot(&fixture).await).await.unwrap(), 0);
    let failed = fixture.reload(&execution).await;
    assert_eq!(failed.status, ExecutionStatus::Failure);
    let root_id = failed.task_id.clone().unwrap();
    assert!(!fixture.tracker().is_tracked(INSTANCE, &root_id).await.unwrap());

    let artifacts = fixture
        .repos
        .artifacts
        .list_by_execution(execution.id)
        .await
        .unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "Error on Startup");
    assert_eq!(artifacts[0].category, "Fatal");
    assert_eq!(artifacts[0].filename, "startup-error.log");
}

/// 拒绝所有提交的传输
struct RejectingTransport;

#[async_trait]
impl MessageQueue for RejectingTransport {
    async fn publish_message(&self, _queue: &str, _message: &TaskMessage) -> RiberryResult<()> {
        Err(RiberryError::Transport("连接已断开".into()))
    }

    async fn publish_delayed(
        &self,
        _queue: &str,
        _message: &TaskMessage,
        _delay: Duration,
    ) -> RiberryResult<()> {
        Err(RiberryError::Transport("连接已断开".into()))
    }

    async fn consume_message(&self, _queue: &str) -> RiberryResult<Option<TaskMessage>> {
        Ok(None)
    }

    async fn get_queue_size(&self, _queue: &str) -> RiberryResult<u64> {
        Ok(0)
    }

    async fn purge_queue(&self, _queue: &str) -> RiberryResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_publish_failure_leaves_no_queued_stream() {
    let fixture = Fixture::new().await;
    fixture.online().await;
    let execution = fixture.execution(1).await;

    let launcher = TransportLauncher::new(
        Arc::new(RejectingTransport),
        TaskRouter::from_config(&TransportConfig::default()),
        fixture.lifecycle(),
    )
    .with_entry_point(ENTRY_POINT, PRIMARY_STREAM);
    let dispatcher = ExecutionDispatcher::new(
        fixture.lifecycle(),
        fixture.tracker(),
        Arc::new(launcher),
        10,
    );

    assert_eq!(dispatcher.poll(&snapshot(&fixture).await).await.unwrap(), 0);
    let failed = fixture.reload(&execution).await;
    assert_eq!(failed.status, ExecutionStatus::Failure);
    let root_id = failed.task_id.clone().unwrap();
    assert!(!fixture.tracker().is_tracked(INSTANCE, &root_id).await.unwrap());

    let events = fixture.repos.events.fetch_batch(None).await.unwrap();
    assert!(events
        .iter()
        .all(|e| !(e.root_id == root_id && e.name == event_names::STREAM)));
}

#[tokio::test]
async fn test_stale_execution_is_cancelled() {
    let fixture = Fixture::new().await;
    let execution = fixture.execution(1).await;
    let now = chrono::Utc::now();
    fixture
        .repos
        .executions
        .mark_ready(execution.id, "lost-root", now)
        .await
        .unwrap();
    fixture.repos.executions.mark_active(execution.id, now).await.unwrap();

    let watchdog = StaleExecutionWatchdog::new(fixture.tracker(), fixture.lifecycle());
    assert_eq!(watchdog.check(&fixture.instance).await.unwrap(), 1);
    assert_eq!(fixture.reload(&execution).await.status, ExecutionStatus::Failure);

    let artifacts = fixture
        .repos
        .artifacts
        .list_by_execution(execution.id)
        .await
        .unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "Workflow Cancelled");
    assert_eq!(artifacts[0].category, "Fatal");
    assert_eq!(artifacts[0].filename, "fatal.log");

    assert_eq!(watchdog.check(&fixture.instance).await.unwrap(), 0);
}

#[tokio::test]
async fn test_tracked_execution_survives_watchdog() {
    let fixture = Fixture::new().await;
    fixture.online().await;
    let execution = fixture.execution(1).await;

    fixture.dispatcher().poll(&snapshot(&fixture).await).await.unwrap();
    let watchdog = StaleExecutionWatchdog::new(fixture.tracker(), fixture.lifecycle());
    assert_eq!(watchdog.check(&fixture.instance).await.unwrap(), 0);
    assert_eq!(fixture.reload(&execution).await.status, ExecutionStatus::Ready);
}

#[tokio::test]
async fn test_background_tasks_echo_then_dispatch() {
    use riberry_dispatcher::PeriodicStep;

    let fixture = Fixture::new().await;
    let execution = fixture.execution(1).await;

    let background = BackgroundTasks::new(INSTANCE, fixture.lifecycle(), fixture.dispatcher())
        .with_watchdog(StaleExecutionWatchdog::new(
            fixture.tracker(),
            fixture.lifecycle(),
        ));
    background.run_once().await.unwrap();

    assert_eq!(fixture.reload(&execution).await.status, ExecutionStatus::Ready);
}
