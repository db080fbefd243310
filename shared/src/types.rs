use std::collections::{BTreeMap, HashMap};
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Tenant partition. Every record belongs to exactly one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub domain: String,
    pub project: String,
}

impl Scope {
    pub fn new(domain: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            project: project.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.project)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceLevel {
    Front,
    Middle,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    #[default]
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    #[default]
    Up,
    Down,
    Starting,
    Testing,
    #[serde(rename = "OUTOFSERVICE")]
    OutOfService,
}

/// A path exposed by a service, with free-form properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePath {
    pub path: String,
    #[serde(default)]
    pub property: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Framework {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// One registered microservice version.
///
/// The natural key is (`app_id`, `service_name`, `version`, `environment`);
/// `service_id` and the natural key never change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Empty on a registration request means "generate one"
    #[serde(default)]
    pub service_id: String,

    #[serde(default)]
    pub app_id: String,

    pub service_name: String,

    pub version: String,

    /// Empty string is the default (development) environment
    #[serde(default)]
    pub environment: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default)]
    pub level: ServiceLevel,

    #[serde(default)]
    pub status: ServiceStatus,

    /// Ordered schema identifiers
    #[serde(default)]
    pub schemas: Vec<String>,

    #[serde(default)]
    pub paths: Vec<ServicePath>,

    #[serde(default)]
    pub properties: HashMap<String, String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<Framework>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Set by the registry on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Set by the registry on every write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_timestamp: Option<DateTime<Utc>>,

    /// Optimistic concurrency counter, bumped by the storage driver on every write
    #[serde(default)]
    pub revision: u64,
}

impl Service {
    /// Minimal service with the given natural key and defaults elsewhere.
    pub fn new(
        app_id: impl Into<String>,
        service_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            service_id: String::new(),
            app_id: app_id.into(),
            service_name: service_name.into(),
            version: version.into(),
            environment: String::new(),
            alias: None,
            level: ServiceLevel::default(),
            status: ServiceStatus::default(),
            schemas: Vec::new(),
            paths: Vec::new(),
            properties: HashMap::new(),
            tags: BTreeMap::new(),
            framework: None,
            register_by: None,
            description: None,
            timestamp: None,
            mod_timestamp: None,
            revision: 0,
        }
    }

    /// Alias, treating an empty string the same as absent.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref().filter(|a| !a.is_empty())
    }
}

/// One running endpoint of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Empty on a registration request means "generate one"
    #[serde(default)]
    pub instance_id: String,

    /// Taken from the request path when omitted from the body
    #[serde(default)]
    pub service_id: String,

    pub endpoints: Vec<String>,

    #[serde(default)]
    pub host_name: String,

    #[serde(default)]
    pub status: InstanceStatus,

    #[serde(default)]
    pub properties: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_timestamp: Option<DateTime<Utc>>,
}

/// Stored content of one schema of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRecord {
    pub schema_id: String,
    pub summary: String,
    pub content: String,
}
