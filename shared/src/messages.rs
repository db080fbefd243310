//! Request and response bodies exchanged with the registry API.

use std::collections::{BTreeMap, HashMap};
use serde::{Serialize, Deserialize};
use crate::types::{Instance, SchemaRecord, Service};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServiceRequest {
    pub service: Service,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceResponse {
    pub service_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetServiceResponse {
    pub service: Service,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetServicesResponse {
    pub services: Vec<Service>,
}

/// Replaces the whole property map; `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePropertiesRequest {
    #[serde(default)]
    pub properties: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteServiceQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistenceQuery {
    /// `microservice` (default) or `schema`
    #[serde(rename = "type", default)]
    pub exist_type: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub schema_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistenceResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterInstanceRequest {
    pub instance: Instance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInstanceResponse {
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetInstancesResponse {
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetInstanceResponse {
    pub instance: Instance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifySchemaRequest {
    pub schema: String,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSchemaResponse {
    pub schema: String,
    pub schema_summary: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagsBody {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteTagsQuery {
    /// Comma separated tag keys
    #[serde(default)]
    pub keys: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub services: u64,
    pub instances: u64,
    pub apps: u64,
}

/// Aggregated view of one service, populated according to the requested sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDetail {
    pub microservice: Service,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<Instance>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_infos: Option<Vec<SchemaRecord>>,
    /// Instance count of this service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesInfoQuery {
    /// Comma separated: tags, rules, instances, schemas, statistics, all
    #[serde(default)]
    pub options: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub count_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesInfoResponse {
    pub all_services_detail: Vec<ServiceDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppsQuery {
    #[serde(default)]
    pub env: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAppsResponse {
    pub app_ids: Vec<String>,
}

/// Stable error identifiers. Each failure kind has its own code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    VersionNotFound,
    QuotaExceeded,
    InvalidArgument,
    HasDependents,
    Canceled,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_code: ErrorCode,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_wire_format_is_camel_case() {
        let mut service = Service::new("app", "svc", "1.0.0");
        service.alias = Some("s".to_string());
        let json = serde_json::to_value(&CreateServiceRequest { service }).unwrap();

        assert_eq!(json["service"]["serviceName"], "svc");
        assert_eq!(json["service"]["appId"], "app");
        assert_eq!(json["service"]["level"], "BACK");
        assert_eq!(json["service"]["status"], "UP");
    }

    #[test]
    fn test_minimal_service_body_deserializes() {
        let req: CreateServiceRequest = serde_json::from_str(
            r#"{"service": {"serviceName": "svc", "version": "1.0.0", "alias": ""}}"#,
        )
        .unwrap();

        assert!(req.service.service_id.is_empty());
        assert!(req.service.app_id.is_empty());
        assert_eq!(req.service.alias(), None);
    }

    #[test]
    fn test_null_properties_clear() {
        let req: UpdatePropertiesRequest =
            serde_json::from_str(r#"{"properties": null}"#).unwrap();
        assert!(req.properties.is_none());
    }

    #[test]
    fn test_error_code_serialization() {
        let body = ErrorBody {
            error_code: ErrorCode::VersionNotFound,
            error_message: "no match".to_string(),
            detail: String::new(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"errorCode":"VERSION_NOT_FOUND","errorMessage":"no match"}"#);
    }
}
