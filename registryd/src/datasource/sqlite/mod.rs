//! SQLite storage driver.

pub mod db;

use std::path::Path;
use std::thread;
use async_trait::async_trait;
use shared::types::{Instance, SchemaRecord, Scope, Service};
use tokio::sync::{mpsc, oneshot};

use crate::datasource::driver::SQLITE_KIND;
use crate::datasource::{
    Datasource, DeleteMode, DeleteOutcome, KeyMatch, PutCondition, WriteOutcome,
};
use crate::error::{StoreError, StoreResult};
use crate::quota::{QuotaGuard, ResourceKind};
use self::db::RegistryDb;

type Job = Box<dyn FnOnce(&mut RegistryDb) + Send>;

/// Commands sent to the storage thread
enum Command {
    Run(Job),
    Shutdown,
}

/// Handle to the storage thread
#[derive(Clone)]
pub struct SqliteDatasource {
    tx: mpsc::Sender<Command>,
}

impl SqliteDatasource {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = RegistryDb::open(path.as_ref())?;
        tracing::info!("Opened registry database at {:?}", path.as_ref());
        Ok(Self::spawn(db))
    }

    /// Spawn the storage thread owning `db`
    pub fn spawn(mut db: RegistryDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    Command::Run(job) => job(&mut db),
                    Command::Shutdown => {
                        tracing::info!("Storage thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn call<R, F>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut RegistryDb) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job = Box::new(move |db| {
            let _ = reply.send(f(db));
        });
        self.tx
            .send(Command::Run(job))
            .await
            .map_err(|_| StoreError::Unavailable("storage thread stopped".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("storage thread dropped the request".into()))?
    }
}

#[async_trait]
impl Datasource for SqliteDatasource {
    fn kind(&self) -> &str {
        SQLITE_KIND
    }

    async fn find_service_by_key(
        &self,
        scope: &Scope,
        app_id: &str,
        name: &str,
        environment: &str,
    ) -> StoreResult<Vec<KeyMatch>> {
        let (scope, app_id, name, environment) = (
            scope.clone(),
            app_id.to_string(),
            name.to_string(),
            environment.to_string(),
        );
        self.call(move |db| db.find_service_by_key(&scope, &app_id, &name, &environment))
            .await
    }

    async fn get_service(&self, scope: &Scope, service_id: &str) -> StoreResult<Option<Service>> {
        let (scope, service_id) = (scope.clone(), service_id.to_string());
        self.call(move |db| db.get_service(&scope, &service_id)).await
    }

    async fn list_services(&self, scope: &Scope) -> StoreResult<Vec<Service>> {
        let scope = scope.clone();
        self.call(move |db| db.list_services(&scope)).await
    }

    async fn put_service(
        &self,
        scope: &Scope,
        service: &Service,
        condition: PutCondition,
    ) -> StoreResult<WriteOutcome> {
        let (scope, service) = (scope.clone(), service.clone());
        self.call(move |db| db.put_service(&scope, &service, &condition))
            .await
    }

    async fn delete_service(
        &self,
        scope: &Scope,
        service_id: &str,
        mode: DeleteMode,
    ) -> StoreResult<DeleteOutcome> {
        let (scope, service_id) = (scope.clone(), service_id.to_string());
        self.call(move |db| db.delete_service(&scope, &service_id, mode))
            .await
    }

    async fn count_resources(
        &self,
        scope: &Scope,
        service_id: Option<&str>,
        kind: ResourceKind,
    ) -> StoreResult<u64> {
        let (scope, service_id) = (scope.clone(), service_id.map(str::to_string));
        self.call(move |db| db.count_resources(&scope, service_id.as_deref(), kind))
            .await
    }

    async fn put_instance(
        &self,
        scope: &Scope,
        instance: &Instance,
        quota: QuotaGuard,
    ) -> StoreResult<WriteOutcome> {
        let (scope, instance) = (scope.clone(), instance.clone());
        self.call(move |db| db.put_instance(&scope, &instance, &quota))
            .await
    }

    async fn get_instance(
        &self,
        scope: &Scope,
        service_id: &str,
        instance_id: &str,
    ) -> StoreResult<Option<Instance>> {
        let (scope, service_id, instance_id) =
            (scope.clone(), service_id.to_string(), instance_id.to_string());
        self.call(move |db| db.get_instance(&scope, &service_id, &instance_id))
            .await
    }

    async fn list_instances(&self, scope: &Scope, service_id: &str) -> StoreResult<Vec<Instance>> {
        let (scope, service_id) = (scope.clone(), service_id.to_string());
        self.call(move |db| db.list_instances(&scope, &service_id)).await
    }

    async fn delete_instance(
        &self,
        scope: &Scope,
        service_id: &str,
        instance_id: &str,
    ) -> StoreResult<bool> {
        let (scope, service_id, instance_id) =
            (scope.clone(), service_id.to_string(), instance_id.to_string());
        self.call(move |db| db.delete_instance(&scope, &service_id, &instance_id))
            .await
    }

    async fn put_schema(
        &self,
        scope: &Scope,
        service_id: &str,
        schema: &SchemaRecord,
        quota: QuotaGuard,
    ) -> StoreResult<WriteOutcome> {
        let (scope, service_id, schema) = (scope.clone(), service_id.to_string(), schema.clone());
        self.call(move |db| db.put_schema(&scope, &service_id, &schema, &quota))
            .await
    }

    async fn get_schema(
        &self,
        scope: &Scope,
        service_id: &str,
        schema_id: &str,
    ) -> StoreResult<Option<SchemaRecord>> {
        let (scope, service_id, schema_id) =
            (scope.clone(), service_id.to_string(), schema_id.to_string());
        self.call(move |db| db.get_schema(&scope, &service_id, &schema_id))
            .await
    }

    async fn list_schemas(&self, scope: &Scope, service_id: &str) -> StoreResult<Vec<SchemaRecord>> {
        let (scope, service_id) = (scope.clone(), service_id.to_string());
        self.call(move |db| db.list_schemas(&scope, &service_id)).await
    }

    async fn close(&self) -> StoreResult<()> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| StoreError::Unavailable("storage thread already stopped".into()))
    }
}
