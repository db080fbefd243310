use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};

use crate::uniqueness::NamespacePolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub datasource: DatasourceConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Storage driver kind bound at startup
    #[serde(default = "default_kind")]
    pub kind: String,
    /// How serviceName and alias share the uniqueness namespace
    #[serde(default)]
    pub namespace_policy: NamespacePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasourceConfig {
    /// SQLite database file, or ":memory:"
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_max_services")]
    pub max_services: u64,
    #[serde(default = "default_max_instances")]
    pub max_instances: u64,
    #[serde(default = "default_max_schemas")]
    pub max_schemas: u64,
    #[serde(default = "default_max_paths")]
    pub max_paths: u64,
    #[serde(default = "default_max_tags")]
    pub max_tags: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_kind() -> String {
    "sqlite".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/registryd/registry.db")
}

fn default_max_services() -> u64 {
    50_000
}

fn default_max_instances() -> u64 {
    150_000
}

fn default_max_schemas() -> u64 {
    100
}

fn default_max_paths() -> u64 {
    1_000
}

fn default_max_tags() -> u64 {
    100
}

fn default_listen() -> String {
    "[::]:30100".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            namespace_policy: NamespacePolicy::default(),
        }
    }
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_services: default_max_services(),
            max_instances: default_max_instances(),
            max_schemas: default_max_schemas(),
            max_paths: default_max_paths(),
            max_tags: default_max_tags(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }
}
