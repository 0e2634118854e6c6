//! Provider administration for an organization and for its projects.
//!
//! Organization routes act on organization-level providers only; project
//! routes act on the providers narrowed to that project. A provider of the
//! other scope is reported as missing.

use crate::{
    conversions::provider_object,
    middleware::RequestContext,
    models::{CreateProviderRequest, DeletedObject, ListResponse, ProviderObject, UpdateProviderRequest},
    routes::{
        api::AppState,
        common::{validate_id, ApiError, Json},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension,
};
use services::{
    id_prefixes::PREFIX_PRV,
    organization::Organization,
    projects::Project,
    providers::{
        ModelProvider, ProviderError, ProviderSelection, ProviderType, ProviderVendor,
        RegisterProviderRequest, UpdateProviderRequest as ProviderChanges,
    },
};
use std::collections::HashMap;

/// The organization and, on project routes, the project.
fn scope(context: &RequestContext) -> Result<(&Organization, Option<&Project>), ApiError> {
    Ok((context.organization()?, context.project.as_ref()))
}

fn in_scope(provider: &ModelProvider, project: Option<&Project>) -> bool {
    provider.project_id == project.map(|p| p.id)
}

async fn load(
    state: &AppState,
    context: &RequestContext,
    provider_id: &str,
) -> Result<ModelProvider, ApiError> {
    validate_id(provider_id, PREFIX_PRV, "provider_id")?;
    let (organization, project) = scope(context)?;
    let provider = state
        .provider_registry
        .get_for_organization(organization.id, provider_id)
        .await?;
    if !in_scope(&provider, project) {
        return Err(ProviderError::NotFound.into());
    }
    Ok(provider)
}

pub async fn list_providers(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ListResponse<ProviderObject>>, ApiError> {
    let (organization, project) = scope(&context)?;
    let selection = ProviderSelection {
        organization_id: Some(organization.id),
        project_id: project.map(|p| p.id),
        provider_type: Some(ProviderType::Organization),
        ..Default::default()
    };
    let providers = state.provider_registry.list_providers(&selection).await?;
    let data: Vec<ProviderObject> = providers
        .iter()
        .filter(|p| in_scope(p, project))
        .map(|p| provider_object(p, organization, project))
        .collect();
    Ok(Json(ListResponse::new(data, false, |p| &p.provider_id)))
}

pub async fn create_provider(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<CreateProviderRequest>,
) -> Result<(StatusCode, Json<ProviderObject>), ApiError> {
    let (organization, project) = scope(&context)?;
    let vendor: ProviderVendor = request
        .vendor
        .parse()
        .map_err(|e: ProviderError| ApiError::from(e).with_param("vendor"))?;

    let provider = state
        .provider_registry
        .register_organization_provider(RegisterProviderRequest {
            organization_id: organization.id,
            project_id: project.map(|p| p.id),
            name: request.name,
            vendor,
            base_url: request.base_url,
            api_key: request.api_key,
            metadata: request.metadata,
            active: request.active,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(provider_object(&provider, organization, project)),
    ))
}

pub async fn get_provider(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(params): Path<HashMap<String, String>>,
) -> Result<Json<ProviderObject>, ApiError> {
    let provider_id = provider_param(&params)?;
    let provider = load(&state, &context, provider_id).await?;
    let (organization, project) = scope(&context)?;
    Ok(Json(provider_object(&provider, organization, project)))
}

pub async fn update_provider(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(params): Path<HashMap<String, String>>,
    Json(request): Json<UpdateProviderRequest>,
) -> Result<Json<ProviderObject>, ApiError> {
    let provider_id = provider_param(&params)?;
    let provider = load(&state, &context, provider_id).await?;
    let (organization, project) = scope(&context)?;
    let provider = state
        .provider_registry
        .update_organization_provider(
            organization.id,
            &provider.public_id,
            ProviderChanges {
                name: request.name,
                base_url: request.base_url,
                api_key: request.api_key,
                metadata: request.metadata,
                active: request.active,
            },
        )
        .await?;
    Ok(Json(provider_object(&provider, organization, project)))
}

pub async fn delete_provider(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(params): Path<HashMap<String, String>>,
) -> Result<Json<DeletedObject>, ApiError> {
    let provider_id = provider_param(&params)?;
    let provider = load(&state, &context, provider_id).await?;
    state
        .provider_registry
        .delete_by_public_id(context.organization()?.id, &provider.public_id)
        .await?;
    Ok(Json(DeletedObject {
        id: provider.public_id,
        object: "provider.deleted".to_string(),
        deleted: true,
    }))
}

/// Project routes also carry `{project_id}`, so the path is read as a map.
fn provider_param(params: &HashMap<String, String>) -> Result<&str, ApiError> {
    params
        .get("provider_id")
        .map(String::as_str)
        .ok_or_else(|| ApiError::invalid_request("missing path parameter 'provider_id'").with_param("provider_id"))
}
