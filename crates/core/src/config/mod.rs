//! 配置管理
//!
//! 配置按以下顺序合并：
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. `RIBERRY_` 前缀的环境变量（嵌套字段使用 `__` 分隔，如 `RIBERRY_DATABASE__URL`）
//!
//! 工作进程所代表的应用实例名来自 `RIBERRY_INSTANCE`，命令行参数可以覆盖。

pub mod models;

pub use models::*;
