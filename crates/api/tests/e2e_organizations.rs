mod common;

use api::models::{
    CreatedApiKeyResponse, DeletedObject, ListResponse, MemberObject, OrganizationObject,
    ProjectMemberObject, ProjectObject,
};
use axum_test::TestServer;
use common::*;
use serde_json::json;
use services::{organization::OrganizationRole, projects::{ProjectRole, ProjectStatus}};

async fn add_member(server: &TestServer, token: &str, user_id: &str) -> axum_test::TestResponse {
    server
        .post("/v1/organization/members")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"user_id": user_id}))
        .await
}

async fn create_project(server: &TestServer, token: &str, name: &str) -> ProjectObject {
    let response = server
        .post("/v1/organization/projects")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"name": name}))
        .await;
    assert_eq!(response.status_code(), 201, "create project failed: {}", response.text());
    response.json::<ProjectObject>()
}

#[tokio::test]
async fn test_create_organization_makes_caller_primary_owner() {
    let ctx = setup_test_server().await;
    let token = guest_token(&ctx.server).await;
    let owner = current_user(&ctx.server, &token).await;

    let organization = create_organization(&ctx.server, &token, "Acme").await;
    assert!(organization.id.starts_with("org_"));
    assert_eq!(organization.object, "organization");

    let response = ctx
        .server
        .get("/v1/organization")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<OrganizationObject>().id, organization.id);

    let response = ctx
        .server
        .get("/v1/organization/members")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    let members = response.json::<ListResponse<MemberObject>>();
    assert_eq!(members.data.len(), 1);
    assert_eq!(members.data[0].id, owner.id);
    assert_eq!(members.data[0].role, OrganizationRole::Owner);
    assert!(members.data[0].is_primary);
}

#[tokio::test]
async fn test_caller_without_organization_gets_not_found() {
    let ctx = setup_test_server().await;
    let token = guest_token(&ctx.server).await;

    let response = ctx
        .server
        .get("/v1/organization")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_members_default_to_reader_and_cannot_administer() {
    let ctx = setup_test_server().await;
    let owner = guest_token(&ctx.server).await;
    let reader = guest_token(&ctx.server).await;
    let reader_user = current_user(&ctx.server, &reader).await;
    let outsider = current_user(&ctx.server, &guest_token(&ctx.server).await).await;
    create_organization(&ctx.server, &owner, "Acme").await;

    let response = add_member(&ctx.server, &owner, &reader_user.id).await;
    assert_eq!(response.status_code(), 201, "{}", response.text());
    let member = response.json::<MemberObject>();
    assert_eq!(member.role, OrganizationRole::Reader);
    // First membership of the reader becomes their primary
    assert!(member.is_primary);

    let response = add_member(&ctx.server, &owner, &reader_user.id).await;
    assert_eq!(response.status_code(), 409);

    // The reader resolves the organization but may not change it
    let response = ctx
        .server
        .get("/v1/organization/members")
        .add_header("Authorization", format!("Bearer {reader}"))
        .await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<ListResponse<MemberObject>>().data.len(), 2);

    let response = add_member(&ctx.server, &reader, &outsider.id).await;
    assert_eq!(response.status_code(), 403);
    assert_eq!(error_of(&response).r#type, "permission_error");
}

#[tokio::test]
async fn test_add_member_validates_user() {
    let ctx = setup_test_server().await;
    let owner = guest_token(&ctx.server).await;
    create_organization(&ctx.server, &owner, "Acme").await;

    let response = add_member(&ctx.server, &owner, "not-a-user").await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(error_of(&response).param.as_deref(), Some("user_id"));

    let response = add_member(&ctx.server, &owner, "usr_doesnotexist0000000000").await;
    assert_eq!(response.status_code(), 404);

    let stranger = current_user(&ctx.server, &guest_token(&ctx.server).await).await;
    let response = ctx
        .server
        .post("/v1/organization/members")
        .add_header("Authorization", format!("Bearer {owner}"))
        .json(&json!({"user_id": stranger.id, "role": "emperor"}))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(error_of(&response).param.as_deref(), Some("role"));
}

#[tokio::test]
async fn test_project_lifecycle() {
    let ctx = setup_test_server().await;
    let owner = guest_token(&ctx.server).await;
    create_organization(&ctx.server, &owner, "Acme").await;

    let project = create_project(&ctx.server, &owner, "Research").await;
    assert!(project.id.starts_with("proj_"));
    assert_eq!(project.status, ProjectStatus::Active);
    let second = create_project(&ctx.server, &owner, "Support").await;

    let response = ctx
        .server
        .get("/v1/organization/projects")
        .add_header("Authorization", format!("Bearer {owner}"))
        .await;
    assert_eq!(response.status_code(), 200);
    let listed = response.json::<ListResponse<ProjectObject>>();
    let ids: Vec<_> = listed.data.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec![project.id.as_str(), second.id.as_str()]);

    let path = format!("/v1/organization/projects/{}", project.id);
    let response = ctx
        .server
        .post(&path)
        .add_header("Authorization", format!("Bearer {owner}"))
        .json(&json!({"name": "Research & Development"}))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    assert_eq!(response.json::<ProjectObject>().name, "Research & Development");

    let response = ctx
        .server
        .post(&format!("{path}/archive"))
        .add_header("Authorization", format!("Bearer {owner}"))
        .await;
    assert_eq!(response.status_code(), 200);
    let archived = response.json::<ProjectObject>();
    assert_eq!(archived.status, ProjectStatus::Archived);
    assert!(archived.archived_at.is_some());

    // Archived projects are read-only
    let response = ctx
        .server
        .post(&path)
        .add_header("Authorization", format!("Bearer {owner}"))
        .json(&json!({"name": "Renamed again"}))
        .await;
    assert_eq!(response.status_code(), 409);

    let response = ctx
        .server
        .get("/v1/organization/projects/proj_doesnotexist")
        .add_header("Authorization", format!("Bearer {owner}"))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_project_membership_controls_reader_visibility() {
    let ctx = setup_test_server().await;
    let owner = guest_token(&ctx.server).await;
    let reader = guest_token(&ctx.server).await;
    let reader_user = current_user(&ctx.server, &reader).await;
    create_organization(&ctx.server, &owner, "Acme").await;
    add_member(&ctx.server, &owner, &reader_user.id).await;

    let shared = create_project(&ctx.server, &owner, "Shared").await;
    let hidden = create_project(&ctx.server, &owner, "Hidden").await;

    let response = ctx
        .server
        .post(&format!("/v1/organization/projects/{}/members", shared.id))
        .add_header("Authorization", format!("Bearer {owner}"))
        .json(&json!({"user_id": reader_user.id}))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());
    let member = response.json::<ProjectMemberObject>();
    assert_eq!(member.id, reader_user.id);
    assert_eq!(member.role, ProjectRole::Member);

    let response = ctx
        .server
        .get(&format!("/v1/organization/projects/{}/members", shared.id))
        .add_header("Authorization", format!("Bearer {reader}"))
        .await;
    assert_eq!(response.status_code(), 200);
    assert!(response
        .json::<ListResponse<ProjectMemberObject>>()
        .data
        .iter()
        .any(|m| m.id == reader_user.id));

    let response = ctx
        .server
        .get("/v1/organization/projects")
        .add_header("Authorization", format!("Bearer {reader}"))
        .await;
    let visible = response.json::<ListResponse<ProjectObject>>();
    assert_eq!(visible.data.len(), 1);
    assert_eq!(visible.data[0].id, shared.id);

    let response = ctx
        .server
        .get(&format!("/v1/organization/projects/{}", hidden.id))
        .add_header("Authorization", format!("Bearer {reader}"))
        .await;
    assert_eq!(response.status_code(), 403);

    // Members read a project but only owners change it
    let response = ctx
        .server
        .post(&format!("/v1/organization/projects/{}/archive", shared.id))
        .add_header("Authorization", format!("Bearer {reader}"))
        .await;
    assert_eq!(response.status_code(), 403);
}

#[tokio::test]
async fn test_admin_api_keys() {
    let ctx = setup_test_server().await;
    let owner = guest_token(&ctx.server).await;
    let organization = create_organization(&ctx.server, &owner, "Acme").await;

    let response = ctx
        .server
        .post("/v1/organization/admin_api_keys")
        .add_header("Authorization", format!("Bearer {owner}"))
        .json(&json!({"description": "ci"}))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());
    let admin_key = response.json::<CreatedApiKeyResponse>();
    assert!(admin_key.value.starts_with("sk-"));

    // The admin key resolves its own organization
    let response = ctx
        .server
        .get("/v1/organization")
        .add_header("Authorization", format!("Bearer {}", admin_key.value))
        .await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<OrganizationObject>().id, organization.id);

    // ...but is not accepted on end-user routes
    let response = ctx
        .server
        .get("/jan/v1/conversations")
        .add_header("Authorization", format!("Bearer {}", admin_key.value))
        .await;
    assert_eq!(response.status_code(), 401);

    let response = ctx
        .server
        .get("/v1/organization/admin_api_keys")
        .add_header("Authorization", format!("Bearer {owner}"))
        .await;
    assert_eq!(response.status_code(), 200);
    let keys = response.json::<ListResponse<api::models::ApiKeyObject>>();
    assert_eq!(keys.data.len(), 1);
    assert_eq!(keys.data[0].id, admin_key.key.id);

    let response = ctx
        .server
        .delete(&format!("/v1/organization/admin_api_keys/{}", admin_key.key.id))
        .add_header("Authorization", format!("Bearer {owner}"))
        .await;
    assert_eq!(response.status_code(), 200);
    assert!(response.json::<DeletedObject>().deleted);

    let response = ctx
        .server
        .get("/v1/organization")
        .add_header("Authorization", format!("Bearer {}", admin_key.value))
        .await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_user_key_is_not_an_admin_key() {
    let ctx = setup_test_server().await;
    let owner = guest_token(&ctx.server).await;
    create_organization(&ctx.server, &owner, "Acme").await;

    let response = ctx
        .server
        .post("/v1/api_keys")
        .add_header("Authorization", format!("Bearer {owner}"))
        .json(&json!({}))
        .await;
    let user_key = response.json::<CreatedApiKeyResponse>();

    let response = ctx
        .server
        .get("/v1/organization")
        .add_header("Authorization", format!("Bearer {}", user_key.value))
        .await;
    assert_eq!(response.status_code(), 401);
}
