use crate::{
    middleware::auth::context_mut,
    routes::{api::AppState, common::{validate_id, ApiError}},
};
use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
};
use services::{
    id_prefixes::{PREFIX_CONV, PREFIX_MSG, PREFIX_PROJ},
    organization::{OrganizationError, RolePolicy},
};
use std::collections::HashMap;
use tracing::debug;

fn path_param<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| ApiError::invalid_request(format!("missing path parameter '{name}'")).with_param(name))
}

/// Resolves the caller's organization and requires a membership.
pub async fn organization_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context = context_mut(&mut request)?;
    let organization = state
        .organization_service
        .resolve_for(&context.principal, &context.user)
        .await?;
    let member = state
        .organization_service
        .authorize(&organization, &context.user, RolePolicy::All)
        .await?;
    debug!(organization_id = %organization.public_id, role = member.role.as_str(), "Scoped request to organization");

    context.organization = Some(organization);
    context.organization_member = Some(member);
    Ok(next.run(request).await)
}

/// Narrows an organization-scoped route to owners. Runs after
/// [`organization_middleware`].
pub async fn owner_only_middleware(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let member = context_mut(&mut request)?.organization_member()?;
    if !RolePolicy::OwnerOnly.allows(member.role) {
        return Err(OrganizationError::Forbidden.into());
    }
    Ok(next.run(request).await)
}

/// Loads `{project_id}` within the scoped organization. Members of the
/// project and owners of the organization pass.
pub async fn project_middleware(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let project_id = path_param(&params, "project_id")?;
    validate_id(project_id, PREFIX_PROJ, "project_id")?;

    let context = context_mut(&mut request)?;
    let organization = context.organization()?;
    let project = state.project_service.get(organization, project_id).await?;
    let member = state
        .project_service
        .authorize(context.organization_member()?, &project, &context.user)
        .await?;

    context.project = Some(project);
    context.project_member = member;
    Ok(next.run(request).await)
}

/// Loads `{conversation_id}` for the caller.
pub async fn conversation_middleware(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let conversation_id = path_param(&params, "conversation_id")?;
    validate_id(conversation_id, PREFIX_CONV, "conversation_id")?;

    let context = context_mut(&mut request)?;
    let conversation = state
        .conversation_service
        .get_by_public_id_and_user(conversation_id, context.user.id, false)
        .await?;
    context.conversation = Some(conversation);
    Ok(next.run(request).await)
}

/// Loads `{item_id}` from the already scoped conversation.
pub async fn item_middleware(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let item_id = path_param(&params, "item_id")?;
    validate_id(item_id, PREFIX_MSG, "item_id")?;

    let context = context_mut(&mut request)?;
    let item = state
        .conversation_service
        .get_item(context.conversation()?, item_id, context.user.id)
        .await?;
    context.item = Some(item);
    Ok(next.run(request).await)
}
