use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use riberry::app::{build_cli, Application, RunOptions};
use riberry::apps;
use riberry::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use riberry_core::init_logging;
use riberry_infrastructure::{describe_metrics, init_metrics};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let Some(("run", run_matches)) = matches.subcommand() else {
        return Err(anyhow::anyhow!("未知的子命令"));
    };
    let options = RunOptions::from_matches(run_matches)?;
    let config = options.load_config()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    describe_metrics();
    init_metrics(&config.observability)?;

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    info!("启动 Riberry 工作进程");
    info!("主机: {host}");
    info!("应用模块: {}", options.module);
    info!("应用实例: {}", config.instance_name()?);

    let registry = apps::registry();
    let app = Arc::new(Application::new(config, &registry, &options.module).await?);

    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(60), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("Riberry 工作进程已退出");
    Ok(())
}
