use crate::{
    conversions::member_object,
    middleware::RequestContext,
    models::{AddMemberRequest, CreateOrganizationRequest, ListResponse, MemberObject, OrganizationObject},
    routes::{
        api::AppState,
        common::{validate_id, ApiError, Json},
    },
};
use axum::{extract::State, http::StatusCode, Extension};
use services::{id_prefixes::PREFIX_USR, organization::OrganizationRole};

/// Parses an optional role name, defaulting to `default`.
pub(crate) fn parse_role<R>(role: Option<&str>, default: R) -> Result<R, ApiError>
where
    R: std::str::FromStr<Err = String>,
{
    match role {
        Some(role) => role
            .parse()
            .map_err(|e: String| ApiError::invalid_request(e).with_param("role")),
        None => Ok(default),
    }
}

/// The caller becomes the owner; the membership is primary when the caller
/// has no other primary organization.
pub async fn create_organization(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<OrganizationObject>), ApiError> {
    let (organization, _owner) = state
        .organization_service
        .create_organization(context.user(), &request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(OrganizationObject::from(&organization))))
}

pub async fn get_organization(
    Extension(context): Extension<RequestContext>,
) -> Result<Json<OrganizationObject>, ApiError> {
    Ok(Json(OrganizationObject::from(context.organization()?)))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ListResponse<MemberObject>>, ApiError> {
    let members = state
        .organization_service
        .list_members(context.organization()?)
        .await?;
    let data: Vec<MemberObject> = members
        .iter()
        .map(|(member, user)| member_object(member, user))
        .collect();
    Ok(Json(ListResponse::new(data, false, |m| &m.id)))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<MemberObject>), ApiError> {
    validate_id(&request.user_id, PREFIX_USR, "user_id")?;
    let role = parse_role(request.role.as_deref(), OrganizationRole::Reader)?;
    let (member, user) = state
        .organization_service
        .add_member(context.organization()?, &request.user_id, role)
        .await?;
    Ok((StatusCode::CREATED, Json(member_object(&member, &user))))
}
