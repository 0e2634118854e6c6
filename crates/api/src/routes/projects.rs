use crate::{
    conversions::project_member_object,
    middleware::RequestContext,
    models::{AddMemberRequest, ListQuery, ListResponse, ProjectMemberObject, ProjectNameRequest, ProjectObject},
    routes::{
        api::AppState,
        common::{validate_id, ApiError, Json},
        organizations::parse_role,
    },
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension,
};
use services::{
    common::SortOrder,
    id_prefixes::{PREFIX_PROJ, PREFIX_USR},
    projects::ProjectRole,
};

pub async fn list_projects(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse<ProjectObject>>, ApiError> {
    let organization = context.organization()?;
    let role = context.organization_member()?.role;
    let service = &state.project_service;

    let mut pagination = query.pagination(SortOrder::Asc)?;
    for (cursor, slot) in [
        (query.after.as_deref(), &mut pagination.after),
        (query.before.as_deref(), &mut pagination.before),
    ] {
        if let Some(public_id) = cursor {
            validate_id(public_id, PREFIX_PROJ, "cursor")?;
            *slot = Some(service.get(organization, public_id).await?.id);
        }
    }

    let page = service
        .list(organization, context.user(), role, pagination)
        .await?;
    let data: Vec<ProjectObject> = page.items.iter().map(ProjectObject::from).collect();
    Ok(Json(ListResponse::new(data, page.has_more, |p| &p.id)))
}

pub async fn create_project(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<ProjectNameRequest>,
) -> Result<(StatusCode, Json<ProjectObject>), ApiError> {
    let project = state
        .project_service
        .create(context.organization()?, context.user(), &request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(ProjectObject::from(&project))))
}

pub async fn get_project(
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ProjectObject>, ApiError> {
    Ok(Json(ProjectObject::from(context.project()?)))
}

pub async fn rename_project(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<ProjectNameRequest>,
) -> Result<Json<ProjectObject>, ApiError> {
    let project = state
        .project_service
        .rename(context.project()?, &request.name)
        .await?;
    Ok(Json(ProjectObject::from(&project)))
}

pub async fn archive_project(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ProjectObject>, ApiError> {
    let project = state.project_service.archive(context.project()?).await?;
    Ok(Json(ProjectObject::from(&project)))
}

pub async fn list_project_members(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ListResponse<ProjectMemberObject>>, ApiError> {
    let members = state
        .project_service
        .list_members(context.project()?)
        .await?;
    let data: Vec<ProjectMemberObject> = members
        .iter()
        .map(|(member, user)| project_member_object(member, user))
        .collect();
    Ok(Json(ListResponse::new(data, false, |m| &m.id)))
}

pub async fn add_project_member(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<ProjectMemberObject>), ApiError> {
    validate_id(&request.user_id, PREFIX_USR, "user_id")?;
    let role = parse_role(request.role.as_deref(), ProjectRole::Member)?;
    let (member, user) = state
        .project_service
        .add_member(context.project()?, &request.user_id, role)
        .await?;
    Ok((StatusCode::CREATED, Json(project_member_object(&member, &user))))
}
