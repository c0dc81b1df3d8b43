use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    background::{BackgroundConfig, CapacityConfig, EmailConfig},
    database::DatabaseConfig,
    observability::ObservabilityConfig,
    transport::{RedisConfig, TransportConfig},
    worker::WorkerConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 当前进程代表的应用实例（`RIBERRY_INSTANCE`）
    pub instance: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub transport: TransportConfig,
    pub worker: WorkerConfig,
    pub background: BackgroundConfig,
    pub capacity: CapacityConfig,
    pub email: EmailConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: RIBERRY_, nested separator: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder()
            .set_default("database.url", "postgresql://localhost/riberry")?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("transport.backend", "redis")?
            .set_default("observability.log_level", "info")?;

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/riberry.toml",
                "riberry.toml",
                "/etc/riberry/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("RIBERRY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 当前实例名，缺失时报错
    pub fn instance_name(&self) -> Result<&str> {
        self.instance
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| anyhow::anyhow!("未指定应用实例，请设置 RIBERRY_INSTANCE 或 --instance"))
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.redis.validate().context("Redis配置验证失败")?;
        self.transport.validate().context("传输配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.background
            .validate()
            .context("后台任务配置验证失败")?;
        self.capacity.validate().context("容量配置验证失败")?;
        self.email.validate().context("邮件配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.external_queue, "rib.external");
        assert_eq!(config.background.heartbeat_offline_seconds, 10);
        assert!(config.instance_name().is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_routes() {
        let mut config = AppConfig::default();
        config.instance = Some("demo".to_string());
        config
            .transport
            .routes
            .insert("demo.slow".to_string(), "rib.slow".to_string());

        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();

        assert_eq!(parsed.instance_name().unwrap(), "demo");
        assert_eq!(
            parsed.transport.routes.get("demo.slow").map(String::as_str),
            Some("rib.slow")
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            instance = "reports"

            [worker]
            concurrency = 4

            [worker.scale]
            enabled = true
            maximum_concurrency = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.concurrency, 4);
        assert!(config.worker.scale.enabled);
        assert_eq!(config.worker.scale.maximum_concurrency, Some(8));
        assert_eq!(config.worker.scale.max_step, 8);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_validate_rejects_inverted_scale_bounds() {
        let result = AppConfig::from_toml(
            r#"
            [worker.scale]
            minimum_concurrency = 5
            maximum_concurrency = 2
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_transport() {
        let mut config = AppConfig::default();
        config.transport.backend = "amqp".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            instance = "from-file"

            [database]
            url = "memory://"

            [redis]
            url = "memory://"
            "#
        )
        .unwrap();

        let path = file.path().with_extension("toml");
        std::fs::copy(file.path(), &path).unwrap();

        let config = AppConfig::load(path.to_str()).unwrap();
        assert!(config.database.is_memory());
        assert!(config.redis.is_memory());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/riberry.toml")).is_err());
    }
}
