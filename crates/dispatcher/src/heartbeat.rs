use chrono::Utc;
use riberry_core::{RiberryError, RiberryResult};
use riberry_domain::Repositories;
use tracing::{debug, instrument};

/// 实例心跳，实例是否在线由它决定
#[derive(Clone)]
pub struct Heartbeat {
    repos: Repositories,
    instance_name: String,
}

impl Heartbeat {
    pub fn new(repos: Repositories, instance_name: impl Into<String>) -> Self {
        Self {
            repos,
            instance_name: instance_name.into(),
        }
    }

    #[instrument(skip(self), fields(instance = %self.instance_name))]
    pub async fn echo(&self) -> RiberryResult<()> {
        let instance = self
            .repos
            .instances
            .find_by_internal_name(&self.instance_name)
            .await?
            .ok_or_else(|| RiberryError::InstanceNotFound {
                name: self.instance_name.clone(),
            })?;

        self.repos.instances.echo(instance.id, Utc::now()).await?;
        debug!("实例心跳已更新");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riberry_domain::{Application, ApplicationInstance};
    use riberry_infrastructure::Infrastructure;

    #[tokio::test]
    async fn test_echo_updates_heartbeat() {
        let infra = Infrastructure::in_memory();
        let repos = infra.repositories.clone();
        let app = repos
            .instances
            .create_application(&Application {
                id: 0,
                name: "Demo".into(),
                internal_name: "demo".into(),
                enabled: true,
            })
            .await
            .unwrap();
        repos
            .instances
            .create_instance(&ApplicationInstance {
                id: 0,
                application_id: app.id,
                name: "Demo".into(),
                internal_name: "demo-1".into(),
                heartbeat: None,
            })
            .await
            .unwrap();

        Heartbeat::new(repos.clone(), "demo-1").echo().await.unwrap();
        let instance = repos
            .instances
            .find_by_internal_name("demo-1")
            .await
            .unwrap()
            .unwrap();
        assert!(instance.heartbeat.is_some());
    }

    #[tokio::test]
    async fn test_echo_unknown_instance() {
        let infra = Infrastructure::in_memory();
        let result = Heartbeat::new(infra.repositories.clone(), "missing").echo().await;
        assert!(matches!(result, Err(RiberryError::InstanceNotFound { .. })));
    }
}
