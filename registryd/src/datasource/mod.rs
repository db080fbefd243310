//! Storage collaborator contract.

pub mod driver;
pub mod sqlite;

use std::fmt;
use async_trait::async_trait;
use shared::types::{Instance, SchemaRecord, Scope, Service};

use crate::error::StoreResult;
use crate::quota::{QuotaGuard, ResourceKind};

/// Namespace a claimed service name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyNamespace {
    /// serviceName and alias share one namespace
    Shared,
    Name,
    Alias,
}

impl KeyNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Name => "name",
            Self::Alias => "alias",
        }
    }
}

/// A name held by a service within (app, environment, version).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameClaim {
    pub app_id: String,
    pub environment: String,
    /// Canonical (zero-padded) version
    pub version: String,
    pub namespace: KeyNamespace,
    pub name: String,
}

impl fmt::Display for NameClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}[{}]",
            self.app_id,
            self.environment,
            self.name,
            self.version,
            self.namespace.as_str()
        )
    }
}

/// Existing service whose serviceName or alias matched a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMatch {
    pub service_id: String,
    pub service_name: String,
    pub alias: Option<String>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PutCondition {
    /// Insert only: the id is unused, every claim is free, and the tenant has
    /// room for one more service.
    Create {
        claims: Vec<NameClaim>,
        quota: QuotaGuard,
    },
    /// Replace only while the stored revision still equals `expected_revision`.
    Update { expected_revision: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Conflict {
    IdInUse(String),
    NameClaimed { claim: NameClaim, owner: String },
    RevisionChanged { expected: u64, found: u64 },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdInUse(id) => write!(f, "service id '{}' in use", id),
            Self::NameClaimed { claim, owner } => write!(f, "{} claimed by '{}'", claim, owner),
            Self::RevisionChanged { expected, found } => {
                write!(f, "revision moved from {} to {}", expected, found)
            }
        }
    }
}

/// Result of a conditional write. Anything but `Committed` means nothing was written.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Committed,
    Conflict(Conflict),
    NotFound,
    QuotaExceeded { guard: QuotaGuard, current: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Refuse while the service owns instances
    IfNoInstances,
    /// Remove the service and all of its instances in one transaction
    Cascade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { instances: u64 },
    NotFound,
    HasInstances(u64),
}

/// Storage collaborator bound at startup. Every call is confined to `scope`.
#[async_trait]
pub trait Datasource: Send + Sync {
    fn kind(&self) -> &str;

    /// Services under (app, environment) whose serviceName or alias equals `name`, any version.
    async fn find_service_by_key(
        &self,
        scope: &Scope,
        app_id: &str,
        name: &str,
        environment: &str,
    ) -> StoreResult<Vec<KeyMatch>>;

    async fn get_service(&self, scope: &Scope, service_id: &str) -> StoreResult<Option<Service>>;

    async fn list_services(&self, scope: &Scope) -> StoreResult<Vec<Service>>;

    /// Conditional write keyed by serviceId; bumps the stored revision on commit.
    async fn put_service(
        &self,
        scope: &Scope,
        service: &Service,
        condition: PutCondition,
    ) -> StoreResult<WriteOutcome>;

    async fn delete_service(
        &self,
        scope: &Scope,
        service_id: &str,
        mode: DeleteMode,
    ) -> StoreResult<DeleteOutcome>;

    /// Per-service kinds count within `service_id`, or across the scope when `None`.
    async fn count_resources(
        &self,
        scope: &Scope,
        service_id: Option<&str>,
        kind: ResourceKind,
    ) -> StoreResult<u64>;

    /// Inserts or replaces an instance. `quota` applies only when the instance is new.
    async fn put_instance(
        &self,
        scope: &Scope,
        instance: &Instance,
        quota: QuotaGuard,
    ) -> StoreResult<WriteOutcome>;

    async fn get_instance(
        &self,
        scope: &Scope,
        service_id: &str,
        instance_id: &str,
    ) -> StoreResult<Option<Instance>>;

    async fn list_instances(&self, scope: &Scope, service_id: &str) -> StoreResult<Vec<Instance>>;

    async fn delete_instance(
        &self,
        scope: &Scope,
        service_id: &str,
        instance_id: &str,
    ) -> StoreResult<bool>;

    /// Stores schema content and appends its id to the service's schema list
    /// when new. `quota` applies to the schema id count of the service.
    async fn put_schema(
        &self,
        scope: &Scope,
        service_id: &str,
        schema: &SchemaRecord,
        quota: QuotaGuard,
    ) -> StoreResult<WriteOutcome>;

    async fn get_schema(
        &self,
        scope: &Scope,
        service_id: &str,
        schema_id: &str,
    ) -> StoreResult<Option<SchemaRecord>>;

    async fn list_schemas(&self, scope: &Scope, service_id: &str) -> StoreResult<Vec<SchemaRecord>>;

    /// Stop the driver. Handles become unusable afterwards.
    async fn close(&self) -> StoreResult<()>;
}
