mod govern;
mod instance;
mod schema;
mod tags;

pub use govern::{FetchFlags, ServicesInfoRequest};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use chrono::Utc;
use shared::protocol::{DEFAULT_APP_ID, ENVIRONMENTS};
use shared::types::{Scope, Service};

use crate::config::QuotaConfig;
use crate::context::RequestContext;
use crate::datasource::{Datasource, DeleteMode, DeleteOutcome, PutCondition, WriteOutcome};
use crate::error::{RegistryError, RegistryResult, StoreContext, StoreError};
use crate::quota::{QuotaGate, ResourceKind};
use crate::uniqueness::{NamespacePolicy, Resolution, UniquenessResolver};
use crate::version::{Version, VersionRule};

/// Conditional writes attempted before a call gives up as contended.
const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct RegistryService {
    ds: Arc<dyn Datasource>,
    resolver: UniquenessResolver,
    quota: QuotaGate,
}

impl RegistryService {
    pub fn new(ds: Arc<dyn Datasource>, policy: NamespacePolicy, limits: QuotaConfig) -> Self {
        Self {
            ds,
            resolver: UniquenessResolver::new(policy),
            quota: QuotaGate::new(limits),
        }
    }

    /// Registers `service`, returning the id it is stored under. Registering a
    /// key that already exists returns the existing id without writing.
    pub async fn register(&self, ctx: &RequestContext, mut service: Service) -> RegistryResult<String> {
        let scope = &ctx.scope;
        let version = normalize_registration(&mut service)?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (service_id, claims) = match self
                .resolver
                .resolve(self.ds.as_ref(), scope, &service, &version)
                .await?
            {
                Resolution::Existing { service_id } => {
                    tracing::info!(
                        "Service {}/{}@{} already registered as {} in {}",
                        service.app_id,
                        service.service_name,
                        service.version,
                        service_id,
                        scope
                    );
                    return Ok(service_id);
                }
                Resolution::Create { service_id, claims } => (service_id, claims),
            };

            self.quota.check_new_service(&service)?;

            let now = Utc::now();
            let mut record = service.clone();
            record.service_id = service_id.clone();
            record.timestamp = Some(now);
            record.mod_timestamp = Some(now);

            ctx.ensure_active()?;
            let condition = PutCondition::Create {
                claims,
                quota: self.quota.guard(ResourceKind::Service, 1),
            };
            match self
                .ds
                .put_service(scope, &record, condition)
                .await
                .during("put_service", scope, &service_id)?
            {
                WriteOutcome::Committed => {
                    tracing::info!(
                        "Registered service {} ({}/{}@{}) in {}",
                        service_id,
                        record.app_id,
                        record.service_name,
                        record.version,
                        scope
                    );
                    return Ok(service_id);
                }
                WriteOutcome::QuotaExceeded { guard, current } => {
                    tracing::warn!("Service quota reached in {}: {} registered", scope, current);
                    return Err(guard.exceeded(current));
                }
                WriteOutcome::Conflict(conflict) => {
                    tracing::debug!(
                        "Create of {} in {} lost a race on attempt {}: {}",
                        service_id,
                        scope,
                        attempt,
                        conflict
                    );
                }
                WriteOutcome::NotFound => {
                    tracing::debug!("Create of {} in {} reported no record", service_id, scope);
                }
            }
        }

        Err(contended("register", scope, &service.service_name))
    }

    /// Replaces the whole property map. `None` clears it.
    pub async fn update_properties(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        properties: Option<HashMap<String, String>>,
    ) -> RegistryResult<()> {
        let properties = properties.unwrap_or_default();
        self.modify_service(ctx, service_id, "update_properties", |service| {
            service.properties = properties.clone();
            Ok(true)
        })
        .await?;

        tracing::info!("Replaced properties of service {} in {}", service_id, ctx.scope);
        Ok(())
    }

    pub async fn get_service(&self, ctx: &RequestContext, service_id: &str) -> RegistryResult<Service> {
        require(service_id, "serviceId")?;
        self.load_service(&ctx.scope, service_id).await
    }

    pub async fn get_services(&self, ctx: &RequestContext) -> RegistryResult<Vec<Service>> {
        let scope = &ctx.scope;
        self.ds
            .list_services(scope)
            .await
            .during("list_services", scope, "*")
    }

    /// Distinct app ids registered under `environment`, sorted.
    pub async fn get_applications(
        &self,
        ctx: &RequestContext,
        environment: &str,
    ) -> RegistryResult<Vec<String>> {
        let environment = environment.trim();
        check_environment(environment)?;

        let apps: BTreeSet<String> = self
            .get_services(ctx)
            .await?
            .into_iter()
            .filter(|s| s.environment == environment)
            .map(|s| s.app_id)
            .collect();
        Ok(apps.into_iter().collect())
    }

    /// Resolves a name (or alias) and version rule to one service id.
    pub async fn exist_service(
        &self,
        ctx: &RequestContext,
        app_id: &str,
        name: &str,
        rule: &str,
        environment: &str,
    ) -> RegistryResult<String> {
        let scope = &ctx.scope;
        require(name, "serviceName")?;
        let app_id = match app_id.trim() {
            "" => DEFAULT_APP_ID,
            app => app,
        };
        let name = name.trim();

        let family = self
            .ds
            .find_service_by_key(scope, app_id, name, environment.trim())
            .await
            .during("find_service_by_key", scope, name)?;
        if family.is_empty() {
            tracing::debug!("No service {}/{} in {}", app_id, name, scope);
            return Err(RegistryError::NotFound(format!("service '{}/{}'", app_id, name)));
        }

        let rule_parsed = VersionRule::parse(rule);
        let candidates = family
            .into_iter()
            .filter_map(|m| m.version.parse::<Version>().ok().map(|v| (v, m.service_id)));
        match rule_parsed.best(candidates) {
            Some((_, service_id)) => Ok(service_id),
            None if rule_parsed.is_selector() => Err(RegistryError::VersionNotFound {
                service: format!("{}/{}", app_id, name),
                rule: rule.trim().to_string(),
            }),
            None => Err(RegistryError::NotFound(format!(
                "service '{}/{}' version '{}'",
                app_id,
                name,
                rule.trim()
            ))),
        }
    }

    /// Deletes a service. Without `force` a service that still owns instances
    /// is left untouched; with it, the service and its instances go together.
    pub async fn delete(&self, ctx: &RequestContext, service_id: &str, force: bool) -> RegistryResult<()> {
        let scope = &ctx.scope;
        require(service_id, "serviceId")?;
        let mode = if force { DeleteMode::Cascade } else { DeleteMode::IfNoInstances };

        ctx.ensure_active()?;
        match self
            .ds
            .delete_service(scope, service_id, mode)
            .await
            .during("delete_service", scope, service_id)?
        {
            DeleteOutcome::Deleted { instances } => {
                tracing::info!(
                    "Deleted service {} in {} with {} instance(s)",
                    service_id,
                    scope,
                    instances
                );
                Ok(())
            }
            DeleteOutcome::NotFound => Err(RegistryError::service_not_found(service_id)),
            DeleteOutcome::HasInstances(instances) => {
                tracing::warn!(
                    "Refusing to delete service {} in {}: {} instance(s) remain",
                    service_id,
                    scope,
                    instances
                );
                Err(RegistryError::HasDependents {
                    service_id: service_id.to_string(),
                    instances,
                })
            }
        }
    }

    async fn load_service(&self, scope: &Scope, service_id: &str) -> RegistryResult<Service> {
        self.ds
            .get_service(scope, service_id)
            .await
            .during("get_service", scope, service_id)?
            .ok_or_else(|| RegistryError::service_not_found(service_id))
    }

    /// Read-modify-write of one service record under its revision. `apply`
    /// returns false when it made no change, which skips the write.
    async fn modify_service<F>(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        op: &'static str,
        mut apply: F,
    ) -> RegistryResult<Service>
    where
        F: FnMut(&mut Service) -> RegistryResult<bool> + Send,
    {
        let scope = &ctx.scope;
        require(service_id, "serviceId")?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut service = self.load_service(scope, service_id).await?;
            if !apply(&mut service)? {
                return Ok(service);
            }
            service.mod_timestamp = Some(Utc::now());

            ctx.ensure_active()?;
            let expected_revision = service.revision;
            match self
                .ds
                .put_service(scope, &service, PutCondition::Update { expected_revision })
                .await
                .during(op, scope, service_id)?
            {
                WriteOutcome::Committed => {
                    service.revision = expected_revision + 1;
                    return Ok(service);
                }
                WriteOutcome::NotFound => return Err(RegistryError::service_not_found(service_id)),
                WriteOutcome::QuotaExceeded { guard, current } => return Err(guard.exceeded(current)),
                WriteOutcome::Conflict(conflict) => {
                    tracing::debug!("{} on {} in {} retrying: {}", op, service_id, scope, conflict);
                }
            }
        }

        Err(contended(op, scope, service_id))
    }
}

/// Fills defaults and validates a registration, returning its parsed version.
fn normalize_registration(service: &mut Service) -> RegistryResult<Version> {
    service.service_id = service.service_id.trim().to_string();
    service.app_id = match service.app_id.trim() {
        "" => DEFAULT_APP_ID.to_string(),
        app => app.to_string(),
    };
    service.service_name = service.service_name.trim().to_string();
    require(&service.service_name, "serviceName")?;

    service.version = service.version.trim().to_string();
    let version = service
        .version
        .parse::<Version>()
        .map_err(|e| RegistryError::invalid(format!("version '{}': {}", service.version, e)))?;

    service.environment = service.environment.trim().to_string();
    check_environment(&service.environment)?;

    service.alias = service
        .alias
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    let mut seen = BTreeSet::new();
    service.schemas.retain(|id| seen.insert(id.clone()));
    if service.schemas.iter().any(|id| id.trim().is_empty()) {
        return Err(RegistryError::invalid("empty schema id"));
    }

    service.revision = 0;
    Ok(version)
}

fn check_environment(environment: &str) -> RegistryResult<()> {
    if ENVIRONMENTS.contains(&environment) {
        Ok(())
    } else {
        Err(RegistryError::invalid(format!("unknown environment '{}'", environment)))
    }
}

fn require(value: &str, field: &str) -> RegistryResult<()> {
    if value.trim().is_empty() {
        return Err(RegistryError::invalid(format!("{} is required", field)));
    }
    Ok(())
}

fn contended(op: &'static str, scope: &Scope, key: &str) -> RegistryError {
    tracing::error!("{} for '{}' in {} kept conflicting, giving up", op, key, scope);
    RegistryError::Transient {
        op,
        scope: scope.clone(),
        key: key.to_string(),
        source: StoreError::Transaction(format!(
            "conditional write conflicted {} times",
            MAX_WRITE_ATTEMPTS
        )),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared::types::{Instance, ServicePath};
    use tokio::task::JoinSet;
    use tokio_util::sync::CancellationToken;
    use crate::datasource::sqlite::SqliteDatasource;

    pub(crate) fn registry_with(policy: NamespacePolicy, limits: QuotaConfig) -> RegistryService {
        let ds = SqliteDatasource::open(":memory:").unwrap();
        RegistryService::new(Arc::new(ds), policy, limits)
    }

    pub(crate) fn registry() -> RegistryService {
        registry_with(NamespacePolicy::Shared, QuotaConfig::default())
    }

    pub(crate) fn ctx() -> RequestContext {
        RequestContext::detached(Scope::new("default", "default"))
    }

    pub(crate) fn instance(service_id: &str) -> Instance {
        Instance {
            instance_id: String::new(),
            service_id: service_id.to_string(),
            endpoints: vec!["rest://127.0.0.1:8080".to_string()],
            host_name: "node-1".to_string(),
            status: Default::default(),
            properties: Default::default(),
            timestamp: None,
            mod_timestamp: None,
        }
    }

    fn service(name: &str, version: &str) -> Service {
        Service::new("exist_appId", name, version)
    }

    fn with_alias(name: &str, alias: &str, id: &str) -> Service {
        let mut svc = service(name, "1.0.0");
        svc.alias = Some(alias.to_string());
        svc.service_id = id.to_string();
        svc
    }

    #[tokio::test]
    async fn test_register_generates_id_and_defaults() {
        let reg = registry();
        let mut svc = Service::new("", "svc", " 1.0 ");
        svc.alias = Some(String::new());

        let id = reg.register(&ctx(), svc).await.unwrap();
        assert!(!id.is_empty());

        let stored = reg.get_service(&ctx(), &id).await.unwrap();
        assert_eq!(stored.app_id, DEFAULT_APP_ID);
        assert_eq!(stored.version, "1.0");
        assert_eq!(stored.alias, None);
        assert!(stored.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_requests() {
        let reg = registry();
        for svc in [
            service("", "1.0.0"),
            service("svc", ""),
            service("svc", "1.0.0.0.1"),
            service("svc", "32768"),
            Service { environment: "staging".into(), ..service("svc", "1.0.0") },
        ] {
            let err = reg.register(&ctx(), svc).await.unwrap_err();
            assert!(matches!(err, RegistryError::InvalidArgument(_)), "{:?}", err);
        }
        assert!(reg.get_services(&ctx()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_registration() {
        let reg = registry();
        let first = reg.register(&ctx(), service("svc", "1.0.0")).await.unwrap();

        let again = reg.register(&ctx(), service("svc", "1.0.0")).await.unwrap();
        assert_eq!(again, first);

        let mut with_id = service("svc", "1.0");
        with_id.service_id = first.clone();
        assert_eq!(reg.register(&ctx(), with_id).await.unwrap(), first);

        assert_eq!(reg.get_services(&ctx()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_supplied_id_is_honored() {
        let reg = registry();
        let mut svc = service("svc", "1.0.0");
        svc.service_id = "my-service".to_string();
        assert_eq!(reg.register(&ctx(), svc).await.unwrap(), "my-service");

        // Same id under another natural key
        let mut other = service("other", "1.0.0");
        other.service_id = "my-service".to_string();
        assert!(matches!(
            reg.register(&ctx(), other).await,
            Err(RegistryError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_conflicting_id_rejected() {
        let reg = registry();
        let a = reg.register(&ctx(), with_alias("es_name", "es_alias", "")).await.unwrap();

        // serviceName resolves to A
        let err = reg
            .register(&ctx(), with_alias("es_name", "other_alias", "different-id"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));

        // alias resolves to A
        let err = reg
            .register(&ctx(), with_alias("other_name", "es_alias", "different-id"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));

        assert_eq!(reg.get_services(&ctx()).await.unwrap().len(), 1);
        assert!(reg.get_service(&ctx(), "different-id").await.is_err());
        assert!(reg.get_service(&ctx(), &a).await.is_ok());
    }

    #[tokio::test]
    async fn test_shared_namespace_name_against_alias() {
        let reg = registry();
        let a = reg.register(&ctx(), with_alias("es_name", "es_alias", "")).await.unwrap();

        // Candidate's name equals A's alias: joins A under the shared namespace
        let joined = reg.register(&ctx(), with_alias("es_alias", "", "")).await.unwrap();
        assert_eq!(joined, a);
    }

    #[tokio::test]
    async fn test_independent_namespace_name_against_alias() {
        let reg = registry_with(NamespacePolicy::Independent, QuotaConfig::default());
        let a = reg.register(&ctx(), with_alias("es_name", "es_alias", "")).await.unwrap();

        let b = reg.register(&ctx(), with_alias("es_alias", "", "")).await.unwrap();
        assert_ne!(a, b);

        // Same alias is still claimed
        let err = reg
            .register(&ctx(), with_alias("fresh", "es_alias", "fresh-id"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_candidate_matching_two_services_rejected() {
        let reg = registry();
        reg.register(&ctx(), with_alias("first", "", "")).await.unwrap();
        reg.register(&ctx(), with_alias("second", "", "")).await.unwrap();

        let err = reg.register(&ctx(), with_alias("first", "second", "")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_concurrent_registrations_create_once() {
        let reg = registry();
        let mut set = JoinSet::new();
        for _ in 0..8 {
            let reg = reg.clone();
            set.spawn(async move { reg.register(&ctx(), service("racer", "1.0.0")).await });
        }

        let mut ids = BTreeSet::new();
        while let Some(res) = set.join_next().await {
            ids.insert(res.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(reg.get_services(&ctx()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_version_rules_in_exist_service() {
        let reg = registry();
        let mut ids = HashMap::new();
        for v in ["1.0.0", "1.0.4", "2.0.0"] {
            ids.insert(v, reg.register(&ctx(), service("versioned", v)).await.unwrap());
        }
        let exist = |rule: &'static str| {
            let reg = reg.clone();
            async move { reg.exist_service(&ctx(), "exist_appId", "versioned", rule, "").await }
        };

        assert_eq!(exist("latest").await.unwrap(), ids["2.0.0"]);
        assert_eq!(exist("1.0.0+").await.unwrap(), ids["2.0.0"]);
        assert_eq!(exist("0.9.1-1.0.1").await.unwrap(), ids["1.0.0"]);
        assert_eq!(exist("1.0.4").await.unwrap(), ids["1.0.4"]);
        assert_eq!(exist("1.0.4.0").await.unwrap(), ids["1.0.4"]);

        assert!(matches!(exist("3.0.0+").await, Err(RegistryError::VersionNotFound { .. })));
        assert!(matches!(exist("2.1.0-3.0.0").await, Err(RegistryError::VersionNotFound { .. })));
        assert!(matches!(exist("1.0.5").await, Err(RegistryError::NotFound(_))));
        assert!(matches!(exist("not-a-rule").await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_exist_service_by_alias_and_environment() {
        let reg = registry();
        let mut svc = with_alias("es_name", "es_alias", "");
        svc.environment = "production".to_string();
        let id = reg.register(&ctx(), svc).await.unwrap();

        let found = reg
            .exist_service(&ctx(), "exist_appId", "es_alias", "1.0.0", "production")
            .await
            .unwrap();
        assert_eq!(found, id);

        let missing = reg
            .exist_service(&ctx(), "exist_appId", "es_name", "latest", "")
            .await;
        assert!(matches!(missing, Err(RegistryError::NotFound(_))));

        let missing = reg
            .exist_service(&ctx(), "", "no_such_service", "latest", "")
            .await;
        assert!(matches!(missing, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_quota_rejection_leaves_no_record() {
        let limits = QuotaConfig { max_schemas: 2, max_paths: 2, ..QuotaConfig::default() };
        let reg = registry_with(NamespacePolicy::Shared, limits);

        let mut svc = service("quota", "1.0.0");
        svc.service_id = "quota-schemas".to_string();
        svc.schemas = vec!["a".into(), "b".into(), "c".into()];
        let err = reg.register(&ctx(), svc).await.unwrap_err();
        assert!(matches!(err, RegistryError::QuotaExceeded { kind: ResourceKind::Schema, .. }));
        assert!(matches!(
            reg.get_service(&ctx(), "quota-schemas").await,
            Err(RegistryError::NotFound(_))
        ));

        let mut svc = service("quota", "1.0.0");
        svc.service_id = "quota-paths".to_string();
        svc.paths = (0..3)
            .map(|i| ServicePath { path: format!("/p{}", i), property: HashMap::new() })
            .collect();
        let err = reg.register(&ctx(), svc).await.unwrap_err();
        assert!(matches!(err, RegistryError::QuotaExceeded { kind: ResourceKind::Path, .. }));
        assert!(reg.get_service(&ctx(), "quota-paths").await.is_err());
    }

    #[tokio::test]
    async fn test_quota_only_gates_new_services() {
        let limits = QuotaConfig { max_schemas: 2, ..QuotaConfig::default() };
        let reg = registry_with(NamespacePolicy::Shared, limits);
        let id = reg.register(&ctx(), service("svc", "1.0.0")).await.unwrap();

        let over = || {
            let mut svc = service("svc", "1.0.0");
            svc.schemas = vec!["a".into(), "b".into(), "c".into()];
            svc
        };
        assert_eq!(reg.register(&ctx(), over()).await.unwrap(), id);

        let mut conflicting = over();
        conflicting.service_id = "other-id".to_string();
        let err = reg.register(&ctx(), conflicting).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)), "{:?}", err);

        // The existing record is untouched
        assert!(reg.get_service(&ctx(), &id).await.unwrap().schemas.is_empty());
    }

    #[tokio::test]
    async fn test_same_key_registration_sequence() {
        let reg = registry();
        let first = reg
            .register(&ctx(), with_alias("relay", "sr", ""))
            .await
            .unwrap();

        let steps = [
            ("relay", "sr1", "", Some(first.as_str())),
            ("relay1", "sr", "", Some(first.as_str())),
            ("relay1", "sr", first.as_str(), Some(first.as_str())),
            ("relay", "sr1", first.as_str(), Some(first.as_str())),
            ("relay", "sr1", "custom-id", None),
            ("relay1", "sr", "custom-id", None),
        ];
        for (name, alias, id, expected) in steps {
            let res = reg.register(&ctx(), with_alias(name, alias, id)).await;
            match expected {
                Some(want) => assert_eq!(res.unwrap(), want, "{}/{} id '{}'", name, alias, id),
                None => assert!(
                    matches!(res, Err(RegistryError::AlreadyExists(_))),
                    "{}/{} id '{}': {:?}",
                    name,
                    alias,
                    id,
                    res
                ),
            }
        }
        assert_eq!(reg.get_services(&ctx()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_alias_is_trimmed() {
        let reg = registry();
        let id = reg.register(&ctx(), with_alias("trimmed", " x ", "")).await.unwrap();
        assert_eq!(reg.get_service(&ctx(), &id).await.unwrap().alias.as_deref(), Some("x"));

        // "x" is already claimed by the trimmed alias
        assert_eq!(reg.register(&ctx(), with_alias("x", "", "")).await.unwrap(), id);

        let blank = reg.register(&ctx(), with_alias("blank", "   ", "")).await.unwrap();
        assert_eq!(reg.get_service(&ctx(), &blank).await.unwrap().alias, None);
    }

    #[tokio::test]
    async fn test_duplicate_schema_ids_are_collapsed() {
        let limits = QuotaConfig { max_schemas: 2, ..QuotaConfig::default() };
        let reg = registry_with(NamespacePolicy::Shared, limits);

        let mut svc = service("dup", "1.0.0");
        svc.schemas = vec!["a".into(), "b".into(), "a".into()];
        let id = reg.register(&ctx(), svc).await.unwrap();
        let stored = reg.get_service(&ctx(), &id).await.unwrap();
        assert_eq!(stored.schemas, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_service_quota_per_tenant() {
        let limits = QuotaConfig { max_services: 1, ..QuotaConfig::default() };
        let reg = registry_with(NamespacePolicy::Shared, limits);

        reg.register(&ctx(), service("one", "1.0.0")).await.unwrap();
        let err = reg.register(&ctx(), service("two", "1.0.0")).await.unwrap_err();
        assert!(matches!(err, RegistryError::QuotaExceeded { kind: ResourceKind::Service, .. }));

        // Re-registering the existing key does not count
        assert!(reg.register(&ctx(), service("one", "1.0.0")).await.is_ok());

        let other = RequestContext::detached(Scope::new("other", "default"));
        assert!(reg.register(&other, service("two", "1.0.0")).await.is_ok());
    }

    #[tokio::test]
    async fn test_cascading_delete() {
        let reg = registry();
        let id = reg.register(&ctx(), service("cascade", "1.0.0")).await.unwrap();
        let iid = reg.register_instance(&ctx(), instance(&id)).await.unwrap();

        let err = reg.delete(&ctx(), &id, false).await.unwrap_err();
        assert!(matches!(err, RegistryError::HasDependents { instances: 1, .. }));
        assert!(reg.get_instance(&ctx(), &id, &iid).await.is_ok());

        reg.delete(&ctx(), &id, true).await.unwrap();
        assert!(matches!(
            reg.get_instance(&ctx(), &id, &iid).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            reg.get_service(&ctx(), &id).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            reg.delete(&ctx(), &id, true).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deleted_key_can_register_again() {
        let reg = registry();
        let first = reg.register(&ctx(), service("reborn", "1.0.0")).await.unwrap();
        reg.delete(&ctx(), &first, false).await.unwrap();

        let second = reg.register(&ctx(), service("reborn", "1.0.0")).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_update_replaces_properties() {
        let reg = registry();
        let id = reg.register(&ctx(), service("props", "1.0.0")).await.unwrap();

        let props = |k: &str, v: &str| Some(HashMap::from([(k.to_string(), v.to_string())]));
        reg.update_properties(&ctx(), &id, props("test", "1")).await.unwrap();
        reg.update_properties(&ctx(), &id, props("k", "v")).await.unwrap();

        let stored = reg.get_service(&ctx(), &id).await.unwrap();
        assert_eq!(stored.properties, HashMap::from([("k".to_string(), "v".to_string())]));

        reg.update_properties(&ctx(), &id, None).await.unwrap();
        assert!(reg.get_service(&ctx(), &id).await.unwrap().properties.is_empty());

        assert!(matches!(
            reg.update_properties(&ctx(), "", props("a", "b")).await,
            Err(RegistryError::InvalidArgument(_))
        ));
        assert!(matches!(
            reg.update_properties(&ctx(), "missing", props("a", "b")).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scope_isolation() {
        let reg = registry();
        let tenant_a = RequestContext::detached(Scope::new("domain-a", "project"));
        let tenant_b = RequestContext::detached(Scope::new("domain-b", "project"));

        let mut svc = service("shared_name", "1.0.0");
        svc.service_id = "same-id".to_string();
        reg.register(&tenant_a, svc.clone()).await.unwrap();
        reg.register(&tenant_b, svc).await.unwrap();

        reg.update_properties(&tenant_a, "same-id", Some(HashMap::from([("a".into(), "1".into())])))
            .await
            .unwrap();
        assert!(reg.get_service(&tenant_b, "same-id").await.unwrap().properties.is_empty());

        reg.delete(&tenant_a, "same-id", true).await.unwrap();
        assert!(reg.get_service(&tenant_a, "same-id").await.is_err());
        assert_eq!(
            reg.exist_service(&tenant_b, "exist_appId", "shared_name", "latest", "")
                .await
                .unwrap(),
            "same-id"
        );
    }

    #[tokio::test]
    async fn test_canceled_context_writes_nothing() {
        let reg = registry();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let canceled = RequestContext::new(Scope::new("default", "default"), cancel);

        let err = reg.register(&canceled, service("late", "1.0.0")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Canceled));
        assert!(!err.is_user_error());
        assert!(reg.get_services(&ctx()).await.unwrap().is_empty());

        let id = reg.register(&ctx(), service("late", "1.0.0")).await.unwrap();
        assert!(matches!(reg.delete(&canceled, &id, true).await, Err(RegistryError::Canceled)));
        assert!(reg.get_service(&ctx(), &id).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_applications() {
        let reg = registry();
        for (app, env) in [("b", ""), ("a", ""), ("a", ""), ("c", "production")] {
            let mut svc = Service::new(app, format!("{}-{}", app, env), "1.0.0");
            svc.environment = env.to_string();
            reg.register(&ctx(), svc).await.unwrap();
        }

        assert_eq!(reg.get_applications(&ctx(), "").await.unwrap(), vec!["a", "b"]);
        assert_eq!(reg.get_applications(&ctx(), "production").await.unwrap(), vec!["c"]);
        assert!(reg.get_applications(&ctx(), "staging").await.is_err());
    }

    #[tokio::test]
    async fn test_storage_fault_is_transient() {
        let ds: Arc<dyn Datasource> = Arc::new(SqliteDatasource::open(":memory:").unwrap());
        let reg = RegistryService::new(ds.clone(), NamespacePolicy::Shared, QuotaConfig::default());
        ds.close().await.unwrap();

        let err = reg.register(&ctx(), service("svc", "1.0.0")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Transient { .. }));
        assert!(!err.is_user_error());
    }
}
