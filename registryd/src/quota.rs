//! Resource ceilings checked before mutations that grow a tenant's usage.

use std::fmt;
use serde::{Deserialize, Serialize};
use shared::types::Service;

use crate::config::QuotaConfig;
use crate::error::{RegistryError, RegistryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Services per tenant
    Service,
    /// Instances per tenant
    Instance,
    /// Schema ids per service
    Schema,
    /// Path entries per service
    Path,
    /// Tags per service
    Tag,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Instance => "instance",
            Self::Schema => "schema",
            Self::Path => "path",
            Self::Tag => "tag",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ceiling check handed to the datasource and evaluated in the same
/// transaction as the write it protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGuard {
    pub kind: ResourceKind,
    pub ceiling: u64,
    pub adding: u64,
}

impl QuotaGuard {
    pub fn admits(&self, current: u64) -> bool {
        current.saturating_add(self.adding) <= self.ceiling
    }

    pub fn exceeded(&self, current: u64) -> RegistryError {
        RegistryError::QuotaExceeded {
            kind: self.kind,
            ceiling: self.ceiling,
            requested: current.saturating_add(self.adding),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuotaGate {
    limits: QuotaConfig,
}

impl QuotaGate {
    pub fn new(limits: QuotaConfig) -> Self {
        Self { limits }
    }

    pub fn ceiling(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Service => self.limits.max_services,
            ResourceKind::Instance => self.limits.max_instances,
            ResourceKind::Schema => self.limits.max_schemas,
            ResourceKind::Path => self.limits.max_paths,
            ResourceKind::Tag => self.limits.max_tags,
        }
    }

    pub fn guard(&self, kind: ResourceKind, adding: u64) -> QuotaGuard {
        QuotaGuard {
            kind,
            ceiling: self.ceiling(kind),
            adding,
        }
    }

    /// Rejects `existing + adding` above the ceiling as one unit.
    pub fn check(&self, kind: ResourceKind, existing: u64, adding: u64) -> RegistryResult<()> {
        let guard = self.guard(kind, adding);
        if guard.admits(existing) {
            Ok(())
        } else {
            tracing::warn!(
                "{} quota exceeded: {} + {} > {}",
                kind,
                existing,
                adding,
                guard.ceiling
            );
            Err(guard.exceeded(existing))
        }
    }

    /// Per-service counts carried by a registration request.
    pub fn check_new_service(&self, service: &Service) -> RegistryResult<()> {
        self.check(ResourceKind::Schema, 0, service.schemas.len() as u64)?;
        self.check(ResourceKind::Path, 0, service.paths.len() as u64)?;
        self.check(ResourceKind::Tag, 0, service.tags.len() as u64)?;
        Ok(())
    }
}
