//! Backend selection by driver kind.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::datasource::sqlite::SqliteDatasource;
use crate::datasource::Datasource;
use crate::error::StoreError;

pub const SQLITE_KIND: &str = "sqlite";

#[derive(Debug, Clone)]
pub struct Options {
    pub kind: String,
    pub db_path: PathBuf,
}

impl Options {
    pub fn from_config(config: &Config) -> Self {
        Self {
            kind: config.registry.kind.clone(),
            db_path: config.datasource.db_path.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("datasource driver '{0}' not found")]
    NotFound(String),

    #[error("failed to initialize datasource driver '{kind}': {source}")]
    Init {
        kind: String,
        #[source]
        source: StoreError,
    },
}

pub type Factory = Box<dyn Fn(&Options) -> Result<Arc<dyn Datasource>, StoreError> + Send + Sync>;

#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, Factory>,
    active: Option<String>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every driver shipped in this binary.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(SQLITE_KIND, |opts| {
            let ds = SqliteDatasource::open(&opts.db_path)?;
            Ok(Arc::new(ds) as Arc<dyn Datasource>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&Options) -> Result<Arc<dyn Datasource>, StoreError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Binds the driver named by `options.kind`, replacing any earlier binding.
    /// An unknown kind or failing factory leaves the current binding in place.
    pub fn init(&mut self, options: &Options) -> Result<Arc<dyn Datasource>, DriverError> {
        let factory = self
            .factories
            .get(&options.kind)
            .ok_or_else(|| DriverError::NotFound(options.kind.clone()))?;

        let datasource = factory(options).map_err(|source| DriverError::Init {
            kind: options.kind.clone(),
            source,
        })?;

        if let Some(previous) = self.active.replace(options.kind.clone()) {
            tracing::info!("Rebinding datasource from {} to {}", previous, options.kind);
        } else {
            tracing::info!("Bound datasource driver {}", options.kind);
        }

        Ok(datasource)
    }

    pub fn active_kind(&self) -> Option<&str> {
        self.active.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_options(kind: &str) -> Options {
        Options {
            kind: kind.to_string(),
            db_path: PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn test_unknown_kind_fails() {
        let mut registry = DriverRegistry::with_builtin();
        let err = registry.init(&memory_options("unknown")).err().unwrap();

        assert!(matches!(err, DriverError::NotFound(ref k) if k == "unknown"));
        assert!(registry.active_kind().is_none());
    }

    #[test]
    fn test_builtin_sqlite_binds() {
        let mut registry = DriverRegistry::with_builtin();
        let ds = registry.init(&memory_options(SQLITE_KIND)).unwrap();

        assert_eq!(ds.kind(), SQLITE_KIND);
        assert_eq!(registry.active_kind(), Some(SQLITE_KIND));
        assert_eq!(registry.kinds(), vec![SQLITE_KIND]);
    }

    #[test]
    fn test_unknown_kind_keeps_previous_binding() {
        let mut registry = DriverRegistry::with_builtin();
        registry.init(&memory_options(SQLITE_KIND)).unwrap();

        assert!(registry.init(&memory_options("unknown")).is_err());
        assert_eq!(registry.active_kind(), Some(SQLITE_KIND));
    }

    #[test]
    fn test_rebind_replaces_binding() {
        let mut registry = DriverRegistry::with_builtin();
        registry.register("sqlite-secondary", |opts| {
            Ok(Arc::new(SqliteDatasource::open(&opts.db_path)?) as Arc<dyn Datasource>)
        });

        let first = registry.init(&memory_options(SQLITE_KIND)).unwrap();
        let second = registry.init(&memory_options("sqlite-secondary")).unwrap();

        assert_eq!(registry.active_kind(), Some("sqlite-secondary"));
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_failing_factory_keeps_previous_binding() {
        let mut registry = DriverRegistry::with_builtin();
        registry.register("broken", |_| Err(StoreError::Open("unreachable".into())));
        registry.init(&memory_options(SQLITE_KIND)).unwrap();

        let err = registry.init(&memory_options("broken")).err().unwrap();
        assert!(matches!(err, DriverError::Init { .. }));
        assert_eq!(registry.active_kind(), Some(SQLITE_KIND));
    }
}
