use chrono::Utc;
use shared::types::Instance;

use super::{require, RegistryService};
use crate::context::RequestContext;
use crate::datasource::WriteOutcome;
use crate::error::{RegistryError, RegistryResult, StoreContext};
use crate::quota::ResourceKind;

impl RegistryService {
    /// Stores an instance under its service, generating an id when none is
    /// given. Re-posting a known id replaces that instance.
    pub async fn register_instance(
        &self,
        ctx: &RequestContext,
        mut instance: Instance,
    ) -> RegistryResult<String> {
        let scope = &ctx.scope;
        instance.service_id = instance.service_id.trim().to_string();
        require(&instance.service_id, "serviceId")?;

        instance.endpoints.retain(|e| !e.trim().is_empty());
        if instance.endpoints.is_empty() {
            return Err(RegistryError::invalid("instance has no endpoints"));
        }

        instance.instance_id = match instance.instance_id.trim() {
            "" => uuid::Uuid::new_v4().simple().to_string(),
            id => id.to_string(),
        };

        let now = Utc::now();
        let previous = self
            .ds
            .get_instance(scope, &instance.service_id, &instance.instance_id)
            .await
            .during("get_instance", scope, &instance.instance_id)?;
        instance.timestamp = previous.and_then(|p| p.timestamp).or(Some(now));
        instance.mod_timestamp = Some(now);

        ctx.ensure_active()?;
        let guard = self.quota.guard(ResourceKind::Instance, 1);
        match self
            .ds
            .put_instance(scope, &instance, guard)
            .await
            .during("put_instance", scope, &instance.instance_id)?
        {
            WriteOutcome::Committed => {
                tracing::info!(
                    "Registered instance {} of service {} in {}",
                    instance.instance_id,
                    instance.service_id,
                    scope
                );
                Ok(instance.instance_id)
            }
            WriteOutcome::NotFound => Err(RegistryError::service_not_found(&instance.service_id)),
            WriteOutcome::QuotaExceeded { guard, current } => {
                tracing::warn!("Instance quota reached in {}: {} registered", scope, current);
                Err(guard.exceeded(current))
            }
            WriteOutcome::Conflict(conflict) => Err(RegistryError::AlreadyExists(conflict.to_string())),
        }
    }

    pub async fn get_instances(
        &self,
        ctx: &RequestContext,
        service_id: &str,
    ) -> RegistryResult<Vec<Instance>> {
        let scope = &ctx.scope;
        require(service_id, "serviceId")?;
        self.load_service(scope, service_id).await?;

        self.ds
            .list_instances(scope, service_id)
            .await
            .during("list_instances", scope, service_id)
    }

    pub async fn get_instance(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        instance_id: &str,
    ) -> RegistryResult<Instance> {
        let scope = &ctx.scope;
        require(service_id, "serviceId")?;
        require(instance_id, "instanceId")?;

        self.ds
            .get_instance(scope, service_id, instance_id)
            .await
            .during("get_instance", scope, instance_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("instance '{}'", instance_id)))
    }

    pub async fn unregister_instance(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        instance_id: &str,
    ) -> RegistryResult<()> {
        let scope = &ctx.scope;
        require(service_id, "serviceId")?;
        require(instance_id, "instanceId")?;

        ctx.ensure_active()?;
        let removed = self
            .ds
            .delete_instance(scope, service_id, instance_id)
            .await
            .during("delete_instance", scope, instance_id)?;
        if !removed {
            return Err(RegistryError::NotFound(format!("instance '{}'", instance_id)));
        }

        tracing::info!(
            "Unregistered instance {} of service {} in {}",
            instance_id,
            service_id,
            scope
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use shared::types::Service;

    use super::*;
    use crate::config::QuotaConfig;
    use crate::registry::tests::{ctx, instance, registry, registry_with};
    use crate::uniqueness::NamespacePolicy;

    #[tokio::test]
    async fn test_instance_lifecycle() {
        let reg = registry();
        let sid = reg.register(&ctx(), Service::new("app", "svc", "1.0.0")).await.unwrap();

        let iid = reg.register_instance(&ctx(), instance(&sid)).await.unwrap();
        let stored = reg.get_instance(&ctx(), &sid, &iid).await.unwrap();
        assert_eq!(stored.host_name, "node-1");
        let created = stored.timestamp;

        let mut replacement = instance(&sid);
        replacement.instance_id = iid.clone();
        replacement.host_name = "node-2".to_string();
        assert_eq!(reg.register_instance(&ctx(), replacement).await.unwrap(), iid);

        let instances = reg.get_instances(&ctx(), &sid).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].host_name, "node-2");
        assert_eq!(instances[0].timestamp, created);

        reg.unregister_instance(&ctx(), &sid, &iid).await.unwrap();
        assert!(matches!(
            reg.unregister_instance(&ctx(), &sid, &iid).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_instance_validation() {
        let reg = registry();
        assert!(matches!(
            reg.register_instance(&ctx(), instance("missing")).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            reg.get_instances(&ctx(), "missing").await,
            Err(RegistryError::NotFound(_))
        ));

        let sid = reg.register(&ctx(), Service::new("app", "svc", "1.0.0")).await.unwrap();
        let mut bare = instance(&sid);
        bare.endpoints = vec![" ".to_string()];
        assert!(matches!(
            reg.register_instance(&ctx(), bare).await,
            Err(RegistryError::InvalidArgument(_))
        ));
        assert!(matches!(
            reg.register_instance(&ctx(), instance("")).await,
            Err(RegistryError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_instance_quota() {
        let limits = QuotaConfig { max_instances: 1, ..QuotaConfig::default() };
        let reg = registry_with(NamespacePolicy::Shared, limits);
        let sid = reg.register(&ctx(), Service::new("app", "svc", "1.0.0")).await.unwrap();

        reg.register_instance(&ctx(), instance(&sid)).await.unwrap();
        assert!(matches!(
            reg.register_instance(&ctx(), instance(&sid)).await,
            Err(RegistryError::QuotaExceeded { kind: ResourceKind::Instance, .. })
        ));
        assert_eq!(reg.get_instances(&ctx(), &sid).await.unwrap().len(), 1);
    }
}
