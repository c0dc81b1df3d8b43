//! 应用定义
//!
//! 一个应用由入口（表单提交时运行的任务及其主执行流）、用户任务和事件处理器组成。
//! 应用编译进二进制，按模块名在 [`AppRegistry`] 中查找。

use std::collections::BTreeMap;
use std::sync::Arc;

use riberry_core::{RiberryError, RiberryResult};

use crate::events::EventRegistry;
use crate::task::{TaskHandler, TaskOptions, TaskRegistry};

#[derive(Clone)]
pub struct EntryPoint {
    pub name: String,
    /// 主执行流
    pub stream: String,
    pub handler: Arc<dyn TaskHandler>,
}

pub struct RiberryApp {
    name: String,
    entry_points: BTreeMap<String, EntryPoint>,
    tasks: TaskRegistry,
    events: EventRegistry,
}

impl RiberryApp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_points: BTreeMap::new(),
            tasks: TaskRegistry::new(),
            events: EventRegistry::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_point(
        &mut self,
        name: impl Into<String>,
        stream: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> RiberryResult<()> {
        let name = name.into();
        let stream = stream.into();
        if stream.trim().is_empty() {
            return Err(RiberryError::Configuration(format!(
                "入口 {name} 缺少主执行流"
            )));
        }
        if self.entry_points.contains_key(&name) {
            return Err(RiberryError::Configuration(format!("入口重复注册: {name}")));
        }
        self.entry_points.insert(
            name.clone(),
            EntryPoint {
                name,
                stream,
                handler,
            },
        );
        Ok(())
    }

    pub fn task(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        options: TaskOptions,
    ) -> RiberryResult<()> {
        self.tasks.register(name, handler, options)
    }

    pub fn events_mut(&mut self) -> &mut EventRegistry {
        &mut self.events
    }

    pub fn entry_points(&self) -> &BTreeMap<String, EntryPoint> {
        &self.entry_points
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    pub fn into_parts(self) -> (BTreeMap<String, EntryPoint>, TaskRegistry, EventRegistry) {
        (self.entry_points, self.tasks, self.events)
    }
}

pub type AppFactory = fn() -> RiberryResult<RiberryApp>;

/// 模块名 -> 应用构造函数
#[derive(Default)]
pub struct AppRegistry {
    apps: BTreeMap<String, AppFactory>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, module: impl Into<String>, factory: AppFactory) -> Self {
        self.apps.insert(module.into(), factory);
        self
    }

    pub fn modules(&self) -> Vec<&str> {
        self.apps.keys().map(String::as_str).collect()
    }

    pub fn build(&self, module: &str) -> RiberryResult<RiberryApp> {
        let factory = self.apps.get(module).ok_or_else(|| {
            RiberryError::Configuration(format!(
                "未知的应用模块 {module}，可用模块: {}",
                self.modules().join(", ")
            ))
        })?;
        factory()
    }
}
