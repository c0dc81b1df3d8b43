//! 月度报表示例应用
//!
//! 入口 `monthly_report` 把工作拆成 `collect` -> `publish` 两步，
//! 汇总数据写入共享执行数据，发布时生成报表产物。

use riberry_core::RiberryResult;
use riberry_domain::{ArtifactType, NewArtifact};
use riberry_worker::{
    flow, handler_fn, task_fn, HandlerOutcome, RegistryEvent, RetryLimit, RiberryApp,
    TaskError, TaskOptions,
};
use serde_json::{json, Value};
use tracing::{info, warn};

pub const ENTRY_POINT: &str = "monthly_report";
pub const STREAM: &str = "Overall";
pub const COLLECT_STREAM: &str = "Collect";
pub const SUMMARY: &str = "summary";

pub fn app() -> RiberryResult<RiberryApp> {
    let mut app = RiberryApp::new("reports");

    app.entry_point(
        ENTRY_POINT,
        STREAM,
        task_fn(|ctx| {
            Box::pin(async move {
                let regions: Vec<String> = ctx
                    .arg("regions")
                    .unwrap_or_else(|_| vec!["default".to_string()]);

                let mut chain = Vec::with_capacity(regions.len() + 1);
                for (index, region) in regions.iter().enumerate() {
                    let args = json!({ "region": region });
                    let step = if index == 0 {
                        flow::start("collect", args, COLLECT_STREAM)?
                    } else {
                        flow::step("collect", args, COLLECT_STREAM, region)?
                    };
                    chain.push(step);
                }
                chain.push(flow::end("publish", json!({}), COLLECT_STREAM)?);

                ctx.replace(chain).await?;
                Ok(json!({ "regions": regions.len() }))
            })
        }),
    )?;

    app.task(
        "collect",
        task_fn(|ctx| {
            Box::pin(async move {
                let region: String = ctx.arg("region")?;
                let data = ctx.data().await?;
                let summary = data
                    .update(SUMMARY, |current| {
                        let mut summary = current.unwrap_or_else(|| json!({ "regions": [] }));
                        if let Some(list) = summary["regions"].as_array_mut() {
                            list.push(Value::String(region.clone()));
                        }
                        summary
                    })
                    .await?;
                Ok(summary)
            })
        }),
        TaskOptions::default()
            .retry_for("IOError")
            .max_retries(RetryLimit::Limited(3)),
    )?;

    app.task(
        "publish",
        task_fn(|ctx| {
            Box::pin(async move {
                let data = ctx.data().await?;
                let summary = data.get(SUMMARY).await?.unwrap_or(Value::Null);
                let content = serde_json::to_vec_pretty(&summary)
                    .map_err(|e| TaskError::raised("SerializationError", e.to_string()))?;

                ctx.create_artifact(
                    NewArtifact::new("summary.json", content)
                        .named("月度汇总")
                        .of_type(ArtifactType::Report)
                        .in_category("Summary"),
                )
                .await?;
                Ok(summary)
            })
        }),
        TaskOptions::default(),
    )?;

    let events = app.events_mut();
    events.data_updated(
        SUMMARY,
        handler_fn(|event| {
            Box::pin(async move {
                if let RegistryEvent::DataUpdated { execution, name } = event {
                    info!("执行 {} 的共享数据 {} 已更新", execution.id, name);
                }
                Ok(HandlerOutcome::Done)
            })
        }),
    )?;
    events.execution_failed(handler_fn(|event| {
        Box::pin(async move {
            if let RegistryEvent::Completion { execution, .. } = event {
                warn!("月度报表执行 {} 失败", execution.id);
            }
            Ok(HandlerOutcome::Done)
        })
    }))?;

    Ok(app)
}
