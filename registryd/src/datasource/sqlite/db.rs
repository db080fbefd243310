use std::path::Path;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::types::{Instance, SchemaRecord, Scope, Service};

use crate::datasource::{
    Conflict, DeleteMode, DeleteOutcome, KeyMatch, NameClaim, PutCondition, WriteOutcome,
};
use crate::error::{StoreError, StoreResult};
use crate::quota::{QuotaGuard, ResourceKind};

/// Convert any `Display` error into a `StoreError` variant.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

pub struct RegistryDb {
    conn: Connection,
}

impl RegistryDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Open(format!("create directory {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Open(format!("{}: {}", path.display(), e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(map_err!(Open))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS services (
                domain        TEXT NOT NULL,
                project       TEXT NOT NULL,
                service_id    TEXT NOT NULL,
                app_id        TEXT NOT NULL,
                service_name  TEXT NOT NULL,
                alias         TEXT,
                version       TEXT NOT NULL,
                environment   TEXT NOT NULL,
                revision      INTEGER NOT NULL,
                body          TEXT NOT NULL,
                PRIMARY KEY (domain, project, service_id)
            );

            CREATE INDEX IF NOT EXISTS idx_services_app
                ON services(domain, project, app_id, environment);

            CREATE TABLE IF NOT EXISTS service_keys (
                domain        TEXT NOT NULL,
                project       TEXT NOT NULL,
                app_id        TEXT NOT NULL,
                environment   TEXT NOT NULL,
                version       TEXT NOT NULL,
                namespace     TEXT NOT NULL,
                name          TEXT NOT NULL,
                service_id    TEXT NOT NULL,
                PRIMARY KEY (domain, project, app_id, environment, version, namespace, name)
            );

            CREATE INDEX IF NOT EXISTS idx_service_keys_owner
                ON service_keys(domain, project, service_id);

            CREATE TABLE IF NOT EXISTS instances (
                domain        TEXT NOT NULL,
                project       TEXT NOT NULL,
                service_id    TEXT NOT NULL,
                instance_id   TEXT NOT NULL,
                body          TEXT NOT NULL,
                PRIMARY KEY (domain, project, service_id, instance_id)
            );

            CREATE TABLE IF NOT EXISTS schemas (
                domain        TEXT NOT NULL,
                project       TEXT NOT NULL,
                service_id    TEXT NOT NULL,
                schema_id     TEXT NOT NULL,
                summary       TEXT NOT NULL,
                content       TEXT NOT NULL,
                PRIMARY KEY (domain, project, service_id, schema_id)
            );
            "#,
        )
        .map_err(map_err!(Open))?;

        Ok(Self { conn })
    }

    pub fn find_service_by_key(
        &self,
        scope: &Scope,
        app_id: &str,
        name: &str,
        environment: &str,
    ) -> StoreResult<Vec<KeyMatch>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT service_id, service_name, alias, version FROM services
                 WHERE domain = ?1 AND project = ?2 AND app_id = ?3 AND environment = ?4
                   AND (service_name = ?5 OR alias = ?5)
                 ORDER BY service_id",
            )
            .map_err(map_err!(Read))?;

        let matches = stmt
            .query_map(
                params![&scope.domain, &scope.project, app_id, environment, name],
                |row| {
                    Ok(KeyMatch {
                        service_id: row.get(0)?,
                        service_name: row.get(1)?,
                        alias: row.get(2)?,
                        version: row.get(3)?,
                    })
                },
            )
            .map_err(map_err!(Read))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err!(Read))?;

        Ok(matches)
    }

    pub fn get_service(&self, scope: &Scope, service_id: &str) -> StoreResult<Option<Service>> {
        load_service(&self.conn, scope, service_id)
    }

    pub fn list_services(&self, scope: &Scope) -> StoreResult<Vec<Service>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT body FROM services WHERE domain = ?1 AND project = ?2
                 ORDER BY app_id, service_name, service_id",
            )
            .map_err(map_err!(Read))?;

        let bodies = stmt
            .query_map(params![&scope.domain, &scope.project], |row| row.get::<_, String>(0))
            .map_err(map_err!(Read))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err!(Read))?;

        bodies.iter().map(|b| decode(b)).collect()
    }

    /// Conditional insert or replace of a service record. Nothing is written
    /// unless every precondition holds.
    pub fn put_service(
        &mut self,
        scope: &Scope,
        service: &Service,
        condition: &PutCondition,
    ) -> StoreResult<WriteOutcome> {
        let tx = self.conn.transaction().map_err(map_err!(Transaction))?;

        let outcome = match condition {
            PutCondition::Create { claims, quota } => {
                if stored_revision(&tx, scope, &service.service_id)?.is_some() {
                    return Ok(WriteOutcome::Conflict(Conflict::IdInUse(
                        service.service_id.clone(),
                    )));
                }
                for claim in claims {
                    if let Some(owner) = claim_owner(&tx, scope, claim)? {
                        return Ok(WriteOutcome::Conflict(Conflict::NameClaimed {
                            claim: claim.clone(),
                            owner,
                        }));
                    }
                }
                let current = count_services(&tx, scope)?;
                if !quota.admits(current) {
                    return Ok(WriteOutcome::QuotaExceeded { guard: *quota, current });
                }

                for claim in claims {
                    tx.execute(
                        "INSERT INTO service_keys (
                            domain, project, app_id, environment, version, namespace, name, service_id
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            &scope.domain,
                            &scope.project,
                            &claim.app_id,
                            &claim.environment,
                            &claim.version,
                            claim.namespace.as_str(),
                            &claim.name,
                            &service.service_id,
                        ],
                    )
                    .map_err(map_err!(Write))?;
                }

                let mut record = service.clone();
                record.revision = 1;
                tx.execute(
                    "INSERT INTO services (
                        domain, project, service_id, app_id, service_name, alias,
                        version, environment, revision, body
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        &scope.domain,
                        &scope.project,
                        &record.service_id,
                        &record.app_id,
                        &record.service_name,
                        record.alias(),
                        &record.version,
                        &record.environment,
                        record.revision as i64,
                        encode(&record)?,
                    ],
                )
                .map_err(map_err!(Write))?;
                WriteOutcome::Committed
            }
            PutCondition::Update { expected_revision } => {
                match stored_revision(&tx, scope, &service.service_id)? {
                    None => return Ok(WriteOutcome::NotFound),
                    Some(found) if found != *expected_revision => {
                        return Ok(WriteOutcome::Conflict(Conflict::RevisionChanged {
                            expected: *expected_revision,
                            found,
                        }));
                    }
                    Some(_) => {}
                }
                let mut record = service.clone();
                record.revision = expected_revision + 1;
                store_service_body(&tx, scope, &record)?;
                WriteOutcome::Committed
            }
        };

        tx.commit().map_err(map_err!(Transaction))?;
        Ok(outcome)
    }

    /// Removes a service with its instances, schemas and name claims in one transaction.
    pub fn delete_service(
        &mut self,
        scope: &Scope,
        service_id: &str,
        mode: DeleteMode,
    ) -> StoreResult<DeleteOutcome> {
        let tx = self.conn.transaction().map_err(map_err!(Transaction))?;

        if stored_revision(&tx, scope, service_id)?.is_none() {
            return Ok(DeleteOutcome::NotFound);
        }
        let instances = count_instances(&tx, scope, Some(service_id))?;
        if mode == DeleteMode::IfNoInstances && instances > 0 {
            return Ok(DeleteOutcome::HasInstances(instances));
        }

        for table in ["instances", "schemas", "service_keys", "services"] {
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE domain = ?1 AND project = ?2 AND service_id = ?3",
                    table
                ),
                params![&scope.domain, &scope.project, service_id],
            )
            .map_err(map_err!(Write))?;
        }

        tx.commit().map_err(map_err!(Transaction))?;
        Ok(DeleteOutcome::Deleted { instances })
    }

    pub fn count_resources(
        &self,
        scope: &Scope,
        service_id: Option<&str>,
        kind: ResourceKind,
    ) -> StoreResult<u64> {
        match kind {
            ResourceKind::Service => count_services(&self.conn, scope),
            ResourceKind::Instance => count_instances(&self.conn, scope, service_id),
            ResourceKind::Schema | ResourceKind::Path | ResourceKind::Tag => {
                let services: Vec<Service> = match service_id {
                    Some(id) => load_service(&self.conn, scope, id)?.into_iter().collect(),
                    None => self.list_services(scope)?,
                };
                let total = services
                    .iter()
                    .map(|s| match kind {
                        ResourceKind::Schema => s.schemas.len(),
                        ResourceKind::Path => s.paths.len(),
                        _ => s.tags.len(),
                    })
                    .sum::<usize>();
                Ok(total as u64)
            }
        }
    }

    pub fn put_instance(
        &mut self,
        scope: &Scope,
        instance: &Instance,
        quota: &QuotaGuard,
    ) -> StoreResult<WriteOutcome> {
        let tx = self.conn.transaction().map_err(map_err!(Transaction))?;

        if stored_revision(&tx, scope, &instance.service_id)?.is_none() {
            return Ok(WriteOutcome::NotFound);
        }
        let exists = tx
            .query_row(
                "SELECT 1 FROM instances
                 WHERE domain = ?1 AND project = ?2 AND service_id = ?3 AND instance_id = ?4",
                params![&scope.domain, &scope.project, &instance.service_id, &instance.instance_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(map_err!(Read))?
            .is_some();
        if !exists {
            let current = count_instances(&tx, scope, None)?;
            if !quota.admits(current) {
                return Ok(WriteOutcome::QuotaExceeded { guard: *quota, current });
            }
        }

        tx.execute(
            r#"
            INSERT INTO instances (domain, project, service_id, instance_id, body)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(domain, project, service_id, instance_id) DO UPDATE SET
                body = excluded.body
            "#,
            params![
                &scope.domain,
                &scope.project,
                &instance.service_id,
                &instance.instance_id,
                encode(instance)?,
            ],
        )
        .map_err(map_err!(Write))?;

        tx.commit().map_err(map_err!(Transaction))?;
        Ok(WriteOutcome::Committed)
    }

    pub fn get_instance(
        &self,
        scope: &Scope,
        service_id: &str,
        instance_id: &str,
    ) -> StoreResult<Option<Instance>> {
        let body = self
            .conn
            .query_row(
                "SELECT body FROM instances
                 WHERE domain = ?1 AND project = ?2 AND service_id = ?3 AND instance_id = ?4",
                params![&scope.domain, &scope.project, service_id, instance_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(map_err!(Read))?;

        body.as_deref().map(decode::<Instance>).transpose()
    }

    pub fn list_instances(&self, scope: &Scope, service_id: &str) -> StoreResult<Vec<Instance>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT body FROM instances
                 WHERE domain = ?1 AND project = ?2 AND service_id = ?3
                 ORDER BY instance_id",
            )
            .map_err(map_err!(Read))?;

        let bodies = stmt
            .query_map(params![&scope.domain, &scope.project, service_id], |row| {
                row.get::<_, String>(0)
            })
            .map_err(map_err!(Read))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err!(Read))?;

        bodies.iter().map(|b| decode(b)).collect()
    }

    pub fn delete_instance(
        &self,
        scope: &Scope,
        service_id: &str,
        instance_id: &str,
    ) -> StoreResult<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM instances
                 WHERE domain = ?1 AND project = ?2 AND service_id = ?3 AND instance_id = ?4",
                params![&scope.domain, &scope.project, service_id, instance_id],
            )
            .map_err(map_err!(Write))?;
        Ok(count > 0)
    }

    /// Upserts schema content, appending the id to the owning service when new.
    pub fn put_schema(
        &mut self,
        scope: &Scope,
        service_id: &str,
        schema: &SchemaRecord,
        quota: &QuotaGuard,
    ) -> StoreResult<WriteOutcome> {
        let tx = self.conn.transaction().map_err(map_err!(Transaction))?;

        let Some(mut service) = load_service(&tx, scope, service_id)? else {
            return Ok(WriteOutcome::NotFound);
        };

        if !service.schemas.contains(&schema.schema_id) {
            let current = service.schemas.len() as u64;
            if !quota.admits(current) {
                return Ok(WriteOutcome::QuotaExceeded { guard: *quota, current });
            }
            service.schemas.push(schema.schema_id.clone());
            service.revision += 1;
            store_service_body(&tx, scope, &service)?;
        }

        tx.execute(
            r#"
            INSERT INTO schemas (domain, project, service_id, schema_id, summary, content)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(domain, project, service_id, schema_id) DO UPDATE SET
                summary = excluded.summary,
                content = excluded.content
            "#,
            params![
                &scope.domain,
                &scope.project,
                service_id,
                &schema.schema_id,
                &schema.summary,
                &schema.content,
            ],
        )
        .map_err(map_err!(Write))?;

        tx.commit().map_err(map_err!(Transaction))?;
        Ok(WriteOutcome::Committed)
    }

    pub fn get_schema(
        &self,
        scope: &Scope,
        service_id: &str,
        schema_id: &str,
    ) -> StoreResult<Option<SchemaRecord>> {
        self.conn
            .query_row(
                "SELECT schema_id, summary, content FROM schemas
                 WHERE domain = ?1 AND project = ?2 AND service_id = ?3 AND schema_id = ?4",
                params![&scope.domain, &scope.project, service_id, schema_id],
                Self::row_to_schema,
            )
            .optional()
            .map_err(map_err!(Read))
    }

    pub fn list_schemas(&self, scope: &Scope, service_id: &str) -> StoreResult<Vec<SchemaRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT schema_id, summary, content FROM schemas
                 WHERE domain = ?1 AND project = ?2 AND service_id = ?3
                 ORDER BY schema_id",
            )
            .map_err(map_err!(Read))?;

        let schemas = stmt
            .query_map(params![&scope.domain, &scope.project, service_id], Self::row_to_schema)
            .map_err(map_err!(Read))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err!(Read))?;

        Ok(schemas)
    }

    fn row_to_schema(row: &rusqlite::Row) -> Result<SchemaRecord, rusqlite::Error> {
        Ok(SchemaRecord {
            schema_id: row.get(0)?,
            summary: row.get(1)?,
            content: row.get(2)?,
        })
    }
}

fn encode<T: Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(json: &str) -> StoreResult<T> {
    serde_json::from_str(json).map_err(map_err!(Deserialize))
}

fn load_service(conn: &Connection, scope: &Scope, service_id: &str) -> StoreResult<Option<Service>> {
    let row = conn
        .query_row(
            "SELECT body, revision FROM services
             WHERE domain = ?1 AND project = ?2 AND service_id = ?3",
            params![&scope.domain, &scope.project, service_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()
        .map_err(map_err!(Read))?;

    match row {
        Some((body, revision)) => {
            let mut service: Service = decode(&body)?;
            service.revision = revision as u64;
            Ok(Some(service))
        }
        None => Ok(None),
    }
}

fn store_service_body(conn: &Connection, scope: &Scope, service: &Service) -> StoreResult<()> {
    conn.execute(
        "UPDATE services SET body = ?1, revision = ?2
         WHERE domain = ?3 AND project = ?4 AND service_id = ?5",
        params![
            encode(service)?,
            service.revision as i64,
            &scope.domain,
            &scope.project,
            &service.service_id,
        ],
    )
    .map_err(map_err!(Write))?;
    Ok(())
}

fn stored_revision(conn: &Connection, scope: &Scope, service_id: &str) -> StoreResult<Option<u64>> {
    conn.query_row(
        "SELECT revision FROM services WHERE domain = ?1 AND project = ?2 AND service_id = ?3",
        params![&scope.domain, &scope.project, service_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|r| r.map(|v| v as u64))
    .map_err(map_err!(Read))
}

fn claim_owner(conn: &Connection, scope: &Scope, claim: &NameClaim) -> StoreResult<Option<String>> {
    conn.query_row(
        "SELECT service_id FROM service_keys
         WHERE domain = ?1 AND project = ?2 AND app_id = ?3 AND environment = ?4
           AND version = ?5 AND namespace = ?6 AND name = ?7",
        params![
            &scope.domain,
            &scope.project,
            &claim.app_id,
            &claim.environment,
            &claim.version,
            claim.namespace.as_str(),
            &claim.name,
        ],
        |row| row.get(0),
    )
    .optional()
    .map_err(map_err!(Read))
}

fn count_services(conn: &Connection, scope: &Scope) -> StoreResult<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM services WHERE domain = ?1 AND project = ?2",
        params![&scope.domain, &scope.project],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as u64)
    .map_err(map_err!(Read))
}

fn count_instances(conn: &Connection, scope: &Scope, service_id: Option<&str>) -> StoreResult<u64> {
    let count = match service_id {
        Some(id) => conn.query_row(
            "SELECT COUNT(*) FROM instances WHERE domain = ?1 AND project = ?2 AND service_id = ?3",
            params![&scope.domain, &scope.project, id],
            |row| row.get::<_, i64>(0),
        ),
        None => conn.query_row(
            "SELECT COUNT(*) FROM instances WHERE domain = ?1 AND project = ?2",
            params![&scope.domain, &scope.project],
            |row| row.get::<_, i64>(0),
        ),
    };
    count.map(|n| n as u64).map_err(map_err!(Read))
}
