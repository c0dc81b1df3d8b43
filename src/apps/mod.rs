//! 编译进二进制的应用，按模块名查找

pub mod reports;

use riberry_worker::AppRegistry;

/// `--module` 可选的全部应用
pub fn registry() -> AppRegistry {
    AppRegistry::new().register("demo", reports::app)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_builds_demo_module() {
        let registry = registry();
        assert_eq!(registry.modules(), vec!["demo"]);
        assert!(registry.build("demo").is_ok());
        assert!(registry.build("missing").is_err());
    }
}
