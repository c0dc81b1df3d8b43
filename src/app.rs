use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use riberry_core::AppConfig;
use riberry_infrastructure::Infrastructure;
use riberry_worker::{AppRegistry, Worker, WorkerBuilder};
use tokio::sync::broadcast;
use tracing::info;

/// 命令行定义
pub fn build_cli() -> Command {
    Command::new("riberry")
        .version(env!("CARGO_PKG_VERSION"))
        .about("作业执行控制平面")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("以工作进程身份运行一个应用")
                .arg(
                    Arg::new("module")
                        .short('m')
                        .long("module")
                        .value_name("APP")
                        .help("应用模块名")
                        .required(true),
                )
                .arg(
                    Arg::new("instance")
                        .short('i')
                        .long("instance")
                        .value_name("NAME")
                        .help("应用实例名，默认读取 RIBERRY_INSTANCE"),
                )
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("配置文件路径"),
                )
                .arg(
                    Arg::new("log-level")
                        .short('l')
                        .long("log-level")
                        .value_name("LEVEL")
                        .help("日志级别")
                        .value_parser(["trace", "debug", "info", "warn", "error"]),
                )
                .arg(
                    Arg::new("log-format")
                        .long("log-format")
                        .value_name("FORMAT")
                        .help("日志格式")
                        .value_parser(["json", "pretty"]),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .value_name("N")
                        .help("初始并发数")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("scale")
                        .long("scale")
                        .help("启用自动扩缩容")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("scale-group")
                        .long("scale-group")
                        .value_name("GROUP")
                        .help("扩缩容组"),
                )
                .arg(
                    Arg::new("scale-min")
                        .long("scale-min")
                        .value_name("N")
                        .help("最小并发数")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("scale-max")
                        .long("scale-max")
                        .value_name("N")
                        .help("最大并发数")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("receiver")
                        .long("receiver")
                        .help("同时消费外部任务结果队列")
                        .action(ArgAction::SetTrue),
                ),
        )
}

/// `run` 子命令的参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub module: String,
    pub instance: Option<String>,
    pub config: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub concurrency: Option<u32>,
    pub scale: bool,
    pub scale_group: Option<String>,
    pub scale_min: Option<u32>,
    pub scale_max: Option<u32>,
    pub receiver: bool,
}

impl RunOptions {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let module = matches
            .get_one::<String>("module")
            .cloned()
            .context("缺少 --module 参数")?;

        Ok(Self {
            module,
            instance: matches.get_one::<String>("instance").cloned(),
            config: matches.get_one::<String>("config").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            log_format: matches.get_one::<String>("log-format").cloned(),
            concurrency: matches.get_one::<u32>("concurrency").copied(),
            scale: matches.get_flag("scale"),
            scale_group: matches.get_one::<String>("scale-group").cloned(),
            scale_min: matches.get_one::<u32>("scale-min").copied(),
            scale_max: matches.get_one::<u32>("scale-max").copied(),
            receiver: matches.get_flag("receiver"),
        })
    }

    /// 命令行参数覆盖配置文件和环境变量
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(instance) = &self.instance {
            config.instance = Some(instance.clone());
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.observability.log_format = format.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.worker.concurrency = concurrency;
        }
        if self.receiver {
            config.worker.receiver = true;
        }

        let scale = &mut config.worker.scale;
        if self.scale {
            scale.enabled = true;
        }
        if let Some(group) = &self.scale_group {
            scale.group = group.clone();
        }
        if self.scale_min.is_some() {
            scale.minimum_concurrency = self.scale_min;
        }
        if self.scale_max.is_some() {
            scale.maximum_concurrency = self.scale_max;
        }
    }

    /// 加载配置并叠加命令行参数
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())
            .with_context(|| format!("加载配置失败: {:?}", self.config))?;
        self.apply(&mut config);
        config.validate()?;
        config.instance_name()?;
        Ok(config)
    }
}

/// 一个运行中的工作进程
pub struct Application {
    module: String,
    infrastructure: Infrastructure,
    worker: Worker,
}

impl Application {
    pub async fn new(config: AppConfig, registry: &AppRegistry, module: &str) -> Result<Self> {
        let infrastructure = Infrastructure::connect(&config)
            .await
            .context("初始化基础设施失败")?;
        Self::with_infrastructure(config, infrastructure, registry, module)
    }

    pub fn with_infrastructure(
        config: AppConfig,
        infrastructure: Infrastructure,
        registry: &AppRegistry,
        module: &str,
    ) -> Result<Self> {
        let app = registry.build(module)?;
        let worker = WorkerBuilder::new(config, infrastructure.clone(), app).build()?;

        Ok(Self {
            module: module.to_string(),
            infrastructure,
            worker,
        })
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// 启动工作进程，收到关闭信号后停止并释放连接
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.worker.start().await?;
        info!(
            "应用 {} 已在实例 {} 上启动",
            self.module,
            self.worker.instance_name()
        );

        let _ = shutdown_rx.recv().await;

        info!("停止应用 {}", self.module);
        self.worker.stop().await?;
        self.infrastructure.close().await;
        Ok(())
    }
}
