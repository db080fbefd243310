//! Error types for the registry core and its storage collaborator.

use shared::messages::ErrorCode;
use shared::types::Scope;
use thiserror::Error;

use crate::quota::ResourceKind;

pub type StoreResult<T> = Result<T, StoreError>;
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Faults raised by a storage driver.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open datasource: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("datasource unavailable: {0}")]
    Unavailable(String),
}

/// Outcome kinds surfaced to callers of the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0} does not exist")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("no version of {service} satisfies rule '{rule}'")]
    VersionNotFound { service: String, rule: String },

    #[error("{kind} quota exceeded: {requested} requested, ceiling is {ceiling}")]
    QuotaExceeded {
        kind: ResourceKind,
        ceiling: u64,
        requested: u64,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("service {service_id} still has {instances} instance(s)")]
    HasDependents { service_id: String, instances: u64 },

    #[error("request canceled")]
    Canceled,

    #[error("{op} failed in {scope} for '{key}': {source}")]
    Transient {
        op: &'static str,
        scope: Scope,
        key: String,
        #[source]
        source: StoreError,
    },
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::VersionNotFound { .. } => ErrorCode::VersionNotFound,
            Self::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::HasDependents { .. } => ErrorCode::HasDependents,
            Self::Canceled => ErrorCode::Canceled,
            Self::Transient { .. } => ErrorCode::Unavailable,
        }
    }

    /// User errors describe a bad or conflicting request; everything else is a
    /// system fault the caller may retry.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, Self::Transient { .. } | Self::Canceled)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn service_not_found(service_id: &str) -> Self {
        Self::NotFound(format!("service '{}'", service_id))
    }
}

/// Attaches operation, scope and key to a storage fault.
pub trait StoreContext<T> {
    fn during(self, op: &'static str, scope: &Scope, key: &str) -> RegistryResult<T>;
}

impl<T> StoreContext<T> for StoreResult<T> {
    fn during(self, op: &'static str, scope: &Scope, key: &str) -> RegistryResult<T> {
        self.map_err(|source| RegistryError::Transient {
            op,
            scope: scope.clone(),
            key: key.to_string(),
            source,
        })
    }
}
