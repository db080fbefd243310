use std::collections::BTreeMap;

use super::{require, RegistryService};
use crate::context::RequestContext;
use crate::error::{RegistryError, RegistryResult};
use crate::quota::ResourceKind;

impl RegistryService {
    /// Merges `tags` into the service's tags. Counted against the
    /// per-service tag ceiling after the merge.
    pub async fn add_tags(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        tags: BTreeMap<String, String>,
    ) -> RegistryResult<()> {
        if tags.is_empty() {
            return Err(RegistryError::invalid("no tags given"));
        }
        if tags.keys().any(|k| k.trim().is_empty()) {
            return Err(RegistryError::invalid("empty tag key"));
        }

        self.modify_service(ctx, service_id, "add_tags", |service| {
            let adding = tags.keys().filter(|k| !service.tags.contains_key(*k)).count();
            self.quota
                .check(ResourceKind::Tag, service.tags.len() as u64, adding as u64)?;
            let before = service.tags.clone();
            service.tags.extend(tags.clone());
            Ok(service.tags != before)
        })
        .await?;

        tracing::info!("Added {} tag(s) to service {} in {}", tags.len(), service_id, ctx.scope);
        Ok(())
    }

    pub async fn get_tags(
        &self,
        ctx: &RequestContext,
        service_id: &str,
    ) -> RegistryResult<BTreeMap<String, String>> {
        Ok(self.get_service(ctx, service_id).await?.tags)
    }

    /// Removes every key in `keys`. Nothing is removed if any key is absent.
    pub async fn delete_tags(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        keys: &[String],
    ) -> RegistryResult<()> {
        if keys.is_empty() {
            return Err(RegistryError::invalid("no tag keys given"));
        }
        require(service_id, "serviceId")?;

        self.modify_service(ctx, service_id, "delete_tags", |service| {
            if let Some(missing) = keys.iter().find(|k| !service.tags.contains_key(*k)) {
                return Err(RegistryError::NotFound(format!("tag '{}'", missing)));
            }
            for key in keys {
                service.tags.remove(key);
            }
            Ok(true)
        })
        .await?;

        tracing::info!("Deleted tag(s) {:?} from service {} in {}", keys, service_id, ctx.scope);
        Ok(())
    }
}
