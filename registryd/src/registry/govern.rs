//! Read-only aggregation over services, instances and schemas.

use std::collections::BTreeSet;
use bitflags::bitflags;
use shared::messages::{ServiceDetail, ServicesInfoResponse, Statistics};
use shared::types::{Scope, Service};

use super::{require, RegistryService};
use crate::context::RequestContext;
use crate::error::{RegistryError, RegistryResult, StoreContext};
use crate::quota::ResourceKind;

bitflags! {
    /// Sections populated in a service detail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FetchFlags: u8 {
        const TAGS = 1 << 0;
        /// Accepted for compatibility; no access rules are tracked
        const RULES = 1 << 1;
        const INSTANCES = 1 << 2;
        const SCHEMAS = 1 << 3;
        /// Per-service instance count, plus totals in a services listing
        const STATISTICS = 1 << 4;
    }
}

impl FetchFlags {
    /// Parses option names. `all` selects every section and empty names are
    /// skipped; anything else unknown is rejected.
    pub fn parse<'a>(options: impl IntoIterator<Item = &'a str>) -> RegistryResult<Self> {
        let mut flags = Self::empty();
        for option in options {
            flags |= match option.trim() {
                "" => Self::empty(),
                "all" => Self::all(),
                "tags" => Self::TAGS,
                "rules" => Self::RULES,
                "instances" => Self::INSTANCES,
                "schemas" => Self::SCHEMAS,
                "statistics" => Self::STATISTICS,
                other => {
                    return Err(RegistryError::invalid(format!("unknown option '{}'", other)));
                }
            };
        }
        Ok(flags)
    }

    /// Comma separated form used on the query string.
    pub fn parse_list(options: &str) -> RegistryResult<Self> {
        Self::parse(options.split(','))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServicesInfoRequest {
    pub flags: FetchFlags,
    pub app_id: Option<String>,
    pub service_name: Option<String>,
    /// Only totals; no per-service detail
    pub count_only: bool,
}

impl RegistryService {
    /// Every section of one service.
    pub async fn get_service_detail(
        &self,
        ctx: &RequestContext,
        service_id: &str,
    ) -> RegistryResult<ServiceDetail> {
        require(service_id, "serviceId")?;
        let service = self.load_service(&ctx.scope, service_id).await?;
        self.detail(&ctx.scope, service, FetchFlags::all()).await
    }

    pub async fn get_services_info(
        &self,
        ctx: &RequestContext,
        request: &ServicesInfoRequest,
    ) -> RegistryResult<ServicesInfoResponse> {
        let scope = &ctx.scope;
        let wanted = |filter: &Option<String>, value: &str| {
            filter.as_deref().map_or(true, |f| f.is_empty() || f == value)
        };
        let services: Vec<Service> = self
            .get_services(ctx)
            .await?
            .into_iter()
            .filter(|s| wanted(&request.app_id, &s.app_id))
            .filter(|s| wanted(&request.service_name, &s.service_name))
            .collect();

        let statistics = if request.count_only || request.flags.contains(FetchFlags::STATISTICS) {
            Some(self.statistics(scope, &services).await?)
        } else {
            None
        };

        if request.count_only {
            return Ok(ServicesInfoResponse {
                all_services_detail: Vec::new(),
                statistics,
            });
        }

        let mut all_services_detail = Vec::with_capacity(services.len());
        for service in services {
            all_services_detail.push(self.detail(scope, service, request.flags).await?);
        }

        tracing::debug!("Collected {} service detail(s) in {}", all_services_detail.len(), scope);
        Ok(ServicesInfoResponse {
            all_services_detail,
            statistics,
        })
    }

    async fn detail(
        &self,
        scope: &Scope,
        service: Service,
        flags: FetchFlags,
    ) -> RegistryResult<ServiceDetail> {
        let service_id = service.service_id.clone();

        let instances = if flags.intersects(FetchFlags::INSTANCES | FetchFlags::STATISTICS) {
            Some(
                self.ds
                    .list_instances(scope, &service_id)
                    .await
                    .during("list_instances", scope, &service_id)?,
            )
        } else {
            None
        };
        let schema_infos = if flags.contains(FetchFlags::SCHEMAS) {
            Some(
                self.ds
                    .list_schemas(scope, &service_id)
                    .await
                    .during("list_schemas", scope, &service_id)?,
            )
        } else {
            None
        };

        Ok(ServiceDetail {
            tags: flags.contains(FetchFlags::TAGS).then(|| service.tags.clone()),
            instance_count: flags
                .contains(FetchFlags::STATISTICS)
                .then(|| instances.as_ref().map_or(0, |i| i.len() as u64)),
            instances: instances.filter(|_| flags.contains(FetchFlags::INSTANCES)),
            schema_infos,
            microservice: service,
        })
    }

    async fn statistics(&self, scope: &Scope, services: &[Service]) -> RegistryResult<Statistics> {
        let mut instances = 0;
        for service in services {
            instances += self
                .ds
                .count_resources(scope, Some(&service.service_id), ResourceKind::Instance)
                .await
                .during("count_resources", scope, &service.service_id)?;
        }
        let apps: BTreeSet<&str> = services.iter().map(|s| s.app_id.as_str()).collect();

        Ok(Statistics {
            services: services.len() as u64,
            instances,
            apps: apps.len() as u64,
        })
    }
}
