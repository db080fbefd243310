use sha2::{Digest, Sha256};
use shared::types::SchemaRecord;

use super::{require, RegistryService};
use crate::context::RequestContext;
use crate::datasource::WriteOutcome;
use crate::error::{RegistryError, RegistryResult, StoreContext};
use crate::quota::ResourceKind;

/// Hex SHA-256 of the schema content.
pub fn schema_summary(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

impl RegistryService {
    /// Stores schema content for a service. A schema id the service does not
    /// list yet is appended under the per-service schema quota.
    pub async fn modify_schema(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        schema_id: &str,
        content: &str,
        summary: Option<&str>,
    ) -> RegistryResult<()> {
        let scope = &ctx.scope;
        require(service_id, "serviceId")?;
        require(schema_id, "schemaId")?;
        if content.is_empty() {
            return Err(RegistryError::invalid("schema content is empty"));
        }

        let record = SchemaRecord {
            schema_id: schema_id.trim().to_string(),
            summary: summary
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| schema_summary(content)),
            content: content.to_string(),
        };

        let stored = self
            .ds
            .get_schema(scope, service_id, &record.schema_id)
            .await
            .during("get_schema", scope, &record.schema_id)?;
        if stored.as_ref() == Some(&record) {
            tracing::debug!("Schema {} of {} in {} unchanged", record.schema_id, service_id, scope);
            return Ok(());
        }

        ctx.ensure_active()?;
        let guard = self.quota.guard(ResourceKind::Schema, 1);
        match self
            .ds
            .put_schema(scope, service_id, &record, guard)
            .await
            .during("put_schema", scope, &record.schema_id)?
        {
            WriteOutcome::Committed => {
                tracing::info!(
                    "Stored schema {} of service {} in {} (summary {})",
                    record.schema_id,
                    service_id,
                    scope,
                    record.summary
                );
                Ok(())
            }
            WriteOutcome::NotFound => Err(RegistryError::service_not_found(service_id)),
            WriteOutcome::QuotaExceeded { guard, current } => {
                tracing::warn!(
                    "Schema quota reached for service {} in {}: {} schemas",
                    service_id,
                    scope,
                    current
                );
                Err(guard.exceeded(current))
            }
            WriteOutcome::Conflict(conflict) => Err(RegistryError::AlreadyExists(conflict.to_string())),
        }
    }

    pub async fn get_schema(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        schema_id: &str,
    ) -> RegistryResult<SchemaRecord> {
        let scope = &ctx.scope;
        require(service_id, "serviceId")?;
        require(schema_id, "schemaId")?;
        self.load_service(scope, service_id).await?;

        self.ds
            .get_schema(scope, service_id, schema_id)
            .await
            .during("get_schema", scope, schema_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("schema '{}'", schema_id)))
    }

    /// Summary of a stored schema.
    pub async fn exist_schema(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        schema_id: &str,
    ) -> RegistryResult<String> {
        self.get_schema(ctx, service_id, schema_id)
            .await
            .map(|record| record.summary)
    }
}
