use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use shared::messages::{
    AppsQuery, CreateServiceRequest, CreateServiceResponse, DeleteServiceQuery, DeleteTagsQuery,
    ExistenceQuery, ExistenceResponse, GetAppsResponse, GetInstanceResponse, GetInstancesResponse,
    GetSchemaResponse, GetServiceResponse, GetServicesResponse, ModifySchemaRequest,
    RegisterInstanceRequest, RegisterInstanceResponse, ServiceDetail, ServicesInfoQuery,
    ServicesInfoResponse, TagsBody, UpdatePropertiesRequest,
};
use shared::protocol::{
    API_PREFIX, DEFAULT_DOMAIN, DEFAULT_PROJECT, DOMAIN_HEADER, EXIST_TYPE_MICROSERVICE,
    EXIST_TYPE_SCHEMA,
};
use shared::types::Scope;
use tokio_util::sync::CancellationToken;

use crate::api::ApiError;
use crate::context::RequestContext;
use crate::error::RegistryError;
use crate::registry::{FetchFlags, RegistryService, ServicesInfoRequest};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryService,
    /// Parent of every request's cancellation token; canceled on shutdown
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    let registry = format!("{}/:project/registry", API_PREFIX);
    let govern = format!("{}/:project/govern", API_PREFIX);
    let service = format!("{}/microservices/:service_id", registry);

    Router::new()
        .route(
            &format!("{}/microservices", registry),
            post(create_service).get(get_services),
        )
        .route(&service, get(get_service).delete(delete_service))
        .route(&format!("{}/properties", service), put(update_properties))
        .route(&format!("{}/existence", registry), get(existence))
        .route(
            &format!("{}/schemas/:schema_id", service),
            put(modify_schema).get(get_schema),
        )
        .route(
            &format!("{}/tags", service),
            post(add_tags).get(get_tags).delete(delete_tags),
        )
        .route(
            &format!("{}/instances", service),
            post(register_instance).get(get_instances),
        )
        .route(
            &format!("{}/instances/:instance_id", service),
            get(get_instance).delete(unregister_instance),
        )
        .route(&format!("{}/microservices", govern), get(services_info))
        .route(&format!("{}/microservices/:service_id", govern), get(service_detail))
        .route(&format!("{}/apps", govern), get(get_apps))
        .with_state(state)
}

/// Tenant scope from the domain header and project path segment.
fn context(state: &AppState, headers: &HeaderMap, project: &str) -> RequestContext {
    let domain = headers
        .get(DOMAIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DOMAIN);
    let project = match project.trim() {
        "" => DEFAULT_PROJECT,
        p => p,
    };
    RequestContext::new(Scope::new(domain, project), state.shutdown.child_token())
}

async fn create_service(
    State(state): State<AppState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreateServiceRequest>,
) -> ApiResult<Json<CreateServiceResponse>> {
    let ctx = context(&state, &headers, &project);
    let service_id = state.registry.register(&ctx, req.service).await?;
    Ok(Json(CreateServiceResponse { service_id }))
}

async fn get_services(
    State(state): State<AppState>,
    Path(project): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<GetServicesResponse>> {
    let ctx = context(&state, &headers, &project);
    let services = state.registry.get_services(&ctx).await?;
    Ok(Json(GetServicesResponse { services }))
}

async fn get_service(
    State(state): State<AppState>,
    Path((project, service_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<GetServiceResponse>> {
    let ctx = context(&state, &headers, &project);
    let service = state.registry.get_service(&ctx, &service_id).await?;
    Ok(Json(GetServiceResponse { service }))
}

async fn delete_service(
    State(state): State<AppState>,
    Path((project, service_id)): Path<(String, String)>,
    Query(query): Query<DeleteServiceQuery>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let ctx = context(&state, &headers, &project);
    state.registry.delete(&ctx, &service_id, query.force).await?;
    Ok(StatusCode::OK)
}

async fn update_properties(
    State(state): State<AppState>,
    Path((project, service_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<UpdatePropertiesRequest>,
) -> ApiResult<StatusCode> {
    let ctx = context(&state, &headers, &project);
    state
        .registry
        .update_properties(&ctx, &service_id, req.properties)
        .await?;
    Ok(StatusCode::OK)
}

async fn existence(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(query): Query<ExistenceQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<ExistenceResponse>> {
    let ctx = context(&state, &headers, &project);
    match query.exist_type.as_str() {
        "" | EXIST_TYPE_MICROSERVICE => {
            let service_id = state
                .registry
                .exist_service(&ctx, &query.app_id, &query.service_name, &query.version, &query.env)
                .await?;
            Ok(Json(ExistenceResponse {
                service_id,
                ..Default::default()
            }))
        }
        EXIST_TYPE_SCHEMA => {
            let summary = state
                .registry
                .exist_schema(&ctx, &query.service_id, &query.schema_id)
                .await?;
            Ok(Json(ExistenceResponse {
                schema_id: query.schema_id,
                summary,
                ..Default::default()
            }))
        }
        other => Err(RegistryError::invalid(format!("unknown existence type '{}'", other)).into()),
    }
}

async fn modify_schema(
    State(state): State<AppState>,
    Path((project, service_id, schema_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(req): Json<ModifySchemaRequest>,
) -> ApiResult<StatusCode> {
    let ctx = context(&state, &headers, &project);
    state
        .registry
        .modify_schema(&ctx, &service_id, &schema_id, &req.schema, req.summary.as_deref())
        .await?;
    Ok(StatusCode::OK)
}

async fn get_schema(
    State(state): State<AppState>,
    Path((project, service_id, schema_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<GetSchemaResponse>> {
    let ctx = context(&state, &headers, &project);
    let record = state.registry.get_schema(&ctx, &service_id, &schema_id).await?;
    Ok(Json(GetSchemaResponse {
        schema: record.content,
        schema_summary: record.summary,
    }))
}

async fn add_tags(
    State(state): State<AppState>,
    Path((project, service_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<TagsBody>,
) -> ApiResult<StatusCode> {
    let ctx = context(&state, &headers, &project);
    state.registry.add_tags(&ctx, &service_id, body.tags).await?;
    Ok(StatusCode::OK)
}

async fn get_tags(
    State(state): State<AppState>,
    Path((project, service_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<TagsBody>> {
    let ctx = context(&state, &headers, &project);
    let tags = state.registry.get_tags(&ctx, &service_id).await?;
    Ok(Json(TagsBody { tags }))
}

async fn delete_tags(
    State(state): State<AppState>,
    Path((project, service_id)): Path<(String, String)>,
    Query(query): Query<DeleteTagsQuery>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let ctx = context(&state, &headers, &project);
    let keys: Vec<String> = query
        .keys
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();
    state.registry.delete_tags(&ctx, &service_id, &keys).await?;
    Ok(StatusCode::OK)
}

async fn register_instance(
    State(state): State<AppState>,
    Path((project, service_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<RegisterInstanceRequest>,
) -> ApiResult<Json<RegisterInstanceResponse>> {
    let ctx = context(&state, &headers, &project);
    let mut instance = req.instance;
    instance.service_id = service_id;
    let instance_id = state.registry.register_instance(&ctx, instance).await?;
    Ok(Json(RegisterInstanceResponse { instance_id }))
}

async fn get_instances(
    State(state): State<AppState>,
    Path((project, service_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<GetInstancesResponse>> {
    let ctx = context(&state, &headers, &project);
    let instances = state.registry.get_instances(&ctx, &service_id).await?;
    Ok(Json(GetInstancesResponse { instances }))
}

async fn get_instance(
    State(state): State<AppState>,
    Path((project, service_id, instance_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<GetInstanceResponse>> {
    let ctx = context(&state, &headers, &project);
    let instance = state
        .registry
        .get_instance(&ctx, &service_id, &instance_id)
        .await?;
    Ok(Json(GetInstanceResponse { instance }))
}

async fn unregister_instance(
    State(state): State<AppState>,
    Path((project, service_id, instance_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let ctx = context(&state, &headers, &project);
    state
        .registry
        .unregister_instance(&ctx, &service_id, &instance_id)
        .await?;
    Ok(StatusCode::OK)
}

async fn service_detail(
    State(state): State<AppState>,
    Path((project, service_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<ServiceDetail>> {
    let ctx = context(&state, &headers, &project);
    let detail = state.registry.get_service_detail(&ctx, &service_id).await?;
    Ok(Json(detail))
}

async fn services_info(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(query): Query<ServicesInfoQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<ServicesInfoResponse>> {
    let ctx = context(&state, &headers, &project);
    let request = ServicesInfoRequest {
        flags: FetchFlags::parse_list(&query.options)?,
        app_id: Some(query.app_id).filter(|a| !a.is_empty()),
        service_name: Some(query.service_name).filter(|s| !s.is_empty()),
        count_only: query.count_only,
    };
    let info = state.registry.get_services_info(&ctx, &request).await?;
    Ok(Json(info))
}

async fn get_apps(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(query): Query<AppsQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<GetAppsResponse>> {
    let ctx = context(&state, &headers, &project);
    let app_ids = state.registry.get_applications(&ctx, &query.env).await?;
    Ok(Json(GetAppsResponse { app_ids }))
}
