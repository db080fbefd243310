//! Duplicate detection for service registrations.

use std::collections::BTreeSet;
use serde::Deserialize;
use shared::types::{Scope, Service};

use crate::datasource::{Datasource, KeyMatch, KeyNamespace, NameClaim};
use crate::error::{RegistryError, RegistryResult, StoreContext};
use crate::version::Version;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespacePolicy {
    #[default]
    Shared,
    Independent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing holds the key: create under `service_id`, claiming `claims`
    Create {
        service_id: String,
        claims: Vec<NameClaim>,
    },
    /// Idempotent re-registration of an existing record
    Existing { service_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision<'a> {
    Create(Option<&'a str>),
    Existing(&'a str),
}

#[derive(Debug, Clone)]
pub struct UniquenessResolver {
    policy: NamespacePolicy,
}

impl UniquenessResolver {
    pub fn new(policy: NamespacePolicy) -> Self {
        Self { policy }
    }

    /// Names the candidate holds once created.
    pub fn claims(&self, service: &Service, version: &Version) -> Vec<NameClaim> {
        let claim = |namespace, name: &str| NameClaim {
            app_id: service.app_id.clone(),
            environment: service.environment.clone(),
            version: version.canonical(),
            namespace,
            name: name.to_string(),
        };

        let mut claims = Vec::with_capacity(2);
        match self.policy {
            NamespacePolicy::Shared => {
                claims.push(claim(KeyNamespace::Shared, &service.service_name));
                if let Some(alias) = service.alias().filter(|a| *a != service.service_name) {
                    claims.push(claim(KeyNamespace::Shared, alias));
                }
            }
            NamespacePolicy::Independent => {
                claims.push(claim(KeyNamespace::Name, &service.service_name));
                if let Some(alias) = service.alias() {
                    claims.push(claim(KeyNamespace::Alias, alias));
                }
            }
        }
        claims
    }

    /// Runs every lookup before any identifier is generated. The result is
    /// only a proposal: the conditional create re-checks claims and id.
    pub async fn resolve(
        &self,
        ds: &dyn Datasource,
        scope: &Scope,
        service: &Service,
        version: &Version,
    ) -> RegistryResult<Resolution> {
        let mut holders = BTreeSet::new();

        let by_name = ds
            .find_service_by_key(scope, &service.app_id, &service.service_name, &service.environment)
            .await
            .during("find_service_by_key", scope, &service.service_name)?;
        holders.extend(self.colliding(&by_name, version, &service.service_name, KeyNamespace::Name));

        if let Some(alias) = service.alias() {
            let by_alias = ds
                .find_service_by_key(scope, &service.app_id, alias, &service.environment)
                .await
                .during("find_service_by_key", scope, alias)?;
            holders.extend(self.colliding(&by_alias, version, alias, KeyNamespace::Alias));
        }

        let supplied = Some(service.service_id.as_str()).filter(|id| !id.is_empty());
        let id_taken = match supplied {
            Some(id) if holders.is_empty() => ds
                .get_service(scope, id)
                .await
                .during("get_service", scope, id)?
                .is_some(),
            _ => false,
        };

        match decide(&holders, supplied, id_taken).map_err(|e| {
            tracing::warn!(
                "Registration of {}/{}@{} in {} rejected: {}",
                service.app_id,
                service.service_name,
                service.version,
                scope,
                e
            );
            e
        })? {
            Decision::Existing(id) => Ok(Resolution::Existing {
                service_id: id.to_string(),
            }),
            Decision::Create(id) => Ok(Resolution::Create {
                service_id: id.map(str::to_string).unwrap_or_else(generate_id),
                claims: self.claims(service, version),
            }),
        }
    }

    /// Ids of matches that collide with `name` in `field`'s namespace.
    fn colliding<'m>(
        &self,
        matches: &'m [KeyMatch],
        version: &Version,
        name: &str,
        field: KeyNamespace,
    ) -> impl Iterator<Item = String> + 'm {
        let policy = self.policy;
        let version = *version;
        let name = name.to_string();
        matches
            .iter()
            .filter(move |m| m.version.parse::<Version>().map(|v| v == version).unwrap_or(false))
            .filter(move |m| match (policy, field) {
                (NamespacePolicy::Shared, _) => true,
                (NamespacePolicy::Independent, KeyNamespace::Alias) => {
                    m.alias.as_deref() == Some(name.as_str())
                }
                (NamespacePolicy::Independent, _) => m.service_name == name,
            })
            .map(|m| m.service_id.clone())
    }
}

fn decide<'a>(
    holders: &'a BTreeSet<String>,
    supplied: Option<&'a str>,
    id_taken: bool,
) -> RegistryResult<Decision<'a>> {
    let mut iter = holders.iter();
    match (iter.next(), iter.next()) {
        (Some(_), Some(_)) => Err(RegistryError::AlreadyExists(format!(
            "service key held by {} existing services",
            holders.len()
        ))),
        (Some(holder), None) => match supplied {
            Some(id) if id != holder => Err(RegistryError::AlreadyExists(format!(
                "service key held by '{}', requested id '{}'",
                holder, id
            ))),
            _ => Ok(Decision::Existing(holder)),
        },
        (None, _) => match supplied {
            Some(id) if id_taken => Err(RegistryError::AlreadyExists(format!(
                "service id '{}'",
                id
            ))),
            other => Ok(Decision::Create(other)),
        },
    }
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holders(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn key_match(id: &str, name: &str, alias: Option<&str>, version: &str) -> KeyMatch {
        KeyMatch {
            service_id: id.to_string(),
            service_name: name.to_string(),
            alias: alias.map(str::to_string),
            version: version.to_string(),
        }
    }

    #[test]
    fn test_decide_fresh_key() {
        let none = holders(&[]);
        assert_eq!(decide(&none, None, false).unwrap(), Decision::Create(None));
        assert_eq!(decide(&none, Some("x"), false).unwrap(), Decision::Create(Some("x")));
        assert!(matches!(
            decide(&none, Some("x"), true),
            Err(RegistryError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_decide_existing_key() {
        let one = holders(&["a"]);
        assert_eq!(decide(&one, None, false).unwrap(), Decision::Existing("a"));
        assert_eq!(decide(&one, Some("a"), false).unwrap(), Decision::Existing("a"));
        assert!(matches!(
            decide(&one, Some("b"), false),
            Err(RegistryError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_decide_two_holders_conflict() {
        let two = holders(&["a", "b"]);
        assert!(decide(&two, None, false).is_err());
        assert!(decide(&two, Some("a"), false).is_err());
    }

    #[test]
    fn test_shared_claims_dedupe_alias() {
        let resolver = UniquenessResolver::new(NamespacePolicy::Shared);
        let version: Version = "1.0".parse().unwrap();
        let mut service = Service::new("app", "svc", "1.0");
        service.alias = Some("svc".into());

        let claims = resolver.claims(&service, &version);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].version, "1.0.0.0");
        assert_eq!(claims[0].namespace, KeyNamespace::Shared);

        service.alias = Some("s".into());
        assert_eq!(resolver.claims(&service, &version).len(), 2);
    }

    #[test]
    fn test_independent_claims_use_separate_namespaces() {
        let resolver = UniquenessResolver::new(NamespacePolicy::Independent);
        let version: Version = "1.0.0".parse().unwrap();
        let mut service = Service::new("app", "svc", "1.0.0");
        service.alias = Some("svc".into());

        let namespaces: Vec<KeyNamespace> = resolver
            .claims(&service, &version)
            .into_iter()
            .map(|c| c.namespace)
            .collect();
        assert_eq!(namespaces, vec![KeyNamespace::Name, KeyNamespace::Alias]);
    }

    #[test]
    fn test_colliding_respects_policy_and_version() {
        let version: Version = "1.0.0".parse().unwrap();
        // "x" is a's name and b's alias; c is another version
        let matches = vec![
            key_match("a", "x", None, "1.0.0"),
            key_match("b", "y", Some("x"), "1.0"),
            key_match("c", "x", None, "2.0.0"),
        ];

        let shared = UniquenessResolver::new(NamespacePolicy::Shared);
        let ids: Vec<String> = shared.colliding(&matches, &version, "x", KeyNamespace::Name).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let independent = UniquenessResolver::new(NamespacePolicy::Independent);
        let ids: Vec<String> = independent
            .colliding(&matches, &version, "x", KeyNamespace::Name)
            .collect();
        assert_eq!(ids, vec!["a"]);
        let ids: Vec<String> = independent
            .colliding(&matches, &version, "x", KeyNamespace::Alias)
            .collect();
        assert_eq!(ids, vec!["b"]);
    }
}
