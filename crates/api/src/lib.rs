pub mod conversions;
pub mod middleware;
pub mod models;
pub mod routes;

use crate::{
    middleware::{
        admin_middleware, auth_middleware, conversation_middleware, item_middleware,
        organization_middleware, owner_only_middleware, project_middleware, timeout_middleware,
        AuthState, RequestDeadline,
    },
    routes::{
        api::{AppState, HttpSettings},
        admin, api_keys, auth, chat, completions, conversations,
        health::health_check,
        organizations, projects, providers, responses,
    },
};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
    Router,
};
use cache::Cache;
use config::ApiConfig;
use database::Database;
use inference_providers::ExternalBackend;
use services::{
    auth::{ApiKeyService, AuthService, AuthSettings},
    crypto::{ApiKeyHasher, CryptoError, KeySealer},
    organization::OrganizationService,
    projects::ProjectService,
    providers::{ProviderError, RegistrySettings},
    CompletionService, ConversationService, InferenceProviderPool, ProviderRegistry,
    ResponseService,
};
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Invalid API key secret: {0}")]
    ApiKeySecret(#[from] CryptoError),
    #[error("Invalid provider master key: {0}")]
    MasterKey(String),
    #[error("Failed to initialize provider registry: {0}")]
    Providers(#[from] ProviderError),
}

/// Wires every service over the given storage, cache and upstream backend.
pub fn init_services(
    database: &Database,
    cache: Arc<dyn Cache>,
    backend: Arc<dyn ExternalBackend>,
    config: &ApiConfig,
) -> Result<AppState, InitError> {
    let hasher = ApiKeyHasher::new(&config.auth.api_key_secret)?;
    let master_key = config
        .providers
        .master_key_bytes()
        .map_err(InitError::MasterKey)?;

    let auth_service = Arc::new(AuthService::new(
        AuthSettings::from(&config.auth),
        hasher.clone(),
        database.users.clone(),
        database.api_keys.clone(),
        cache.clone(),
    ));
    let api_key_service = Arc::new(ApiKeyService::new(database.api_keys.clone(), hasher));
    let organization_service = Arc::new(OrganizationService::new(
        database.organizations.clone(),
        database.organization_members.clone(),
        database.users.clone(),
    ));
    let project_service = Arc::new(ProjectService::new(
        database.projects.clone(),
        database.project_members.clone(),
        database.users.clone(),
    ));

    let provider_registry = Arc::new(ProviderRegistry::new(
        database.providers.clone(),
        KeySealer::new(&master_key),
        cache.clone(),
        backend.clone(),
        RegistrySettings::from(&config.providers),
    )?);
    let pool = Arc::new(InferenceProviderPool::new(provider_registry.clone(), backend));

    let conversation_service = Arc::new(ConversationService::new(
        database.conversations.clone(),
        database.items.clone(),
    ));
    let response_service = Arc::new(ResponseService::new(
        database.responses.clone(),
        database.items.clone(),
        conversation_service.clone(),
        pool.clone(),
    ));
    let completion_service = Arc::new(CompletionService::new(pool, conversation_service.clone()));

    Ok(AppState {
        auth_service,
        api_key_service,
        organization_service,
        project_service,
        provider_registry,
        conversation_service,
        response_service,
        completion_service,
        cache,
        settings: HttpSettings {
            refresh_cookie_secure: config.auth.refresh_cookie_secure,
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        },
    })
}

/// Build the complete application router
pub fn build_app(app_state: AppState) -> Router {
    let auth_state = AuthState {
        auth_service: app_state.auth_service.clone(),
    };
    let deadline = RequestDeadline(app_state.settings.request_timeout);

    let auth_routes = build_auth_routes(app_state.clone(), &auth_state);
    let api_key_routes = build_api_key_routes(app_state.clone(), &auth_state);
    let completion_routes = build_completion_routes(app_state.clone(), &auth_state);
    let model_routes = build_model_routes(app_state.clone(), &auth_state);
    let response_routes = build_response_routes(app_state.clone(), &auth_state);
    let organization_routes = build_organization_routes(app_state.clone(), &auth_state);
    let conversation_routes = build_conversation_routes(app_state.clone(), &auth_state);

    Router::new()
        .nest(
            "/v1",
            Router::new()
                .nest("/auth", auth_routes)
                .nest("/conv", completion_routes)
                .merge(model_routes)
                .merge(api_key_routes)
                .merge(response_routes)
                .merge(organization_routes),
        )
        .nest("/jan/v1", conversation_routes)
        .merge(
            Router::new()
                .route("/healthcheck", get(health_check))
                .with_state(app_state),
        )
        .layer(from_fn_with_state(deadline, timeout_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Guest login and refresh are public; `/me` needs a credential.
pub fn build_auth_routes(app_state: AppState, auth_state_middleware: &AuthState) -> Router {
    Router::new()
        .route("/guest-login", post(auth::guest_login))
        .route("/refresh-token", get(auth::refresh_token))
        .route("/logout", post(auth::logout))
        .route(
            "/me",
            get(auth::current_user).layer(from_fn_with_state(
                auth_state_middleware.clone(),
                auth_middleware,
            )),
        )
        .with_state(app_state)
}

pub fn build_api_key_routes(app_state: AppState, auth_state_middleware: &AuthState) -> Router {
    Router::new()
        .route("/api_keys", get(api_keys::list_api_keys))
        .route("/api_keys", post(api_keys::create_api_key))
        .route("/api_keys/{key_id}", delete(api_keys::delete_api_key))
        .with_state(app_state)
        .layer(from_fn_with_state(
            auth_state_middleware.clone(),
            auth_middleware,
        ))
}

pub fn build_completion_routes(app_state: AppState, auth_state_middleware: &AuthState) -> Router {
    Router::new()
        .route("/chat/completions", post(completions::chat_completions))
        .route("/models", get(completions::models))
        .with_state(app_state)
        .layer(from_fn_with_state(
            auth_state_middleware.clone(),
            auth_middleware,
        ))
}

/// Stateless completions and the model catalogue.
pub fn build_model_routes(app_state: AppState, auth_state_middleware: &AuthState) -> Router {
    Router::new()
        .route("/chat/completions", post(chat::chat_completions))
        .route("/models", get(completions::models))
        .route("/models/providers", get(chat::list_model_providers))
        .with_state(app_state)
        .layer(from_fn_with_state(
            auth_state_middleware.clone(),
            auth_middleware,
        ))
}

pub fn build_response_routes(app_state: AppState, auth_state_middleware: &AuthState) -> Router {
    Router::new()
        .route("/responses", post(responses::create_response))
        .route("/responses/{response_id}", get(responses::get_response))
        .route("/responses/{response_id}", delete(responses::delete_response))
        .route(
            "/responses/{response_id}/cancel",
            post(responses::cancel_response),
        )
        .route(
            "/responses/{response_id}/input_items",
            get(responses::list_input_items),
        )
        .with_state(app_state)
        .layer(from_fn_with_state(
            auth_state_middleware.clone(),
            auth_middleware,
        ))
}

/// Conversation routes load `{conversation_id}` and `{item_id}` into the
/// request context before the handler runs.
pub fn build_conversation_routes(
    app_state: AppState,
    auth_state_middleware: &AuthState,
) -> Router {
    let item_routes = Router::new()
        .route(
            "/conversations/{conversation_id}/items/{item_id}",
            get(conversations::get_item),
        )
        .route(
            "/conversations/{conversation_id}/items/{item_id}",
            delete(conversations::delete_item),
        )
        .route_layer(from_fn_with_state(app_state.clone(), item_middleware));

    let conversation_routes = Router::new()
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation),
        )
        .route(
            "/conversations/{conversation_id}",
            post(conversations::update_conversation),
        )
        .route(
            "/conversations/{conversation_id}",
            patch(conversations::update_conversation),
        )
        .route(
            "/conversations/{conversation_id}",
            delete(conversations::delete_conversation),
        )
        .route(
            "/conversations/{conversation_id}/items",
            get(conversations::list_items),
        )
        .route(
            "/conversations/{conversation_id}/items",
            post(conversations::add_items),
        )
        .route(
            "/conversations/{conversation_id}/items/search",
            get(conversations::search_items),
        )
        .merge(item_routes)
        .route_layer(from_fn_with_state(
            app_state.clone(),
            conversation_middleware,
        ));

    Router::new()
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations", get(conversations::list_conversations))
        .merge(conversation_routes)
        .with_state(app_state)
        .layer(from_fn_with_state(
            auth_state_middleware.clone(),
            auth_middleware,
        ))
}

/// Admin surface. Every route except organization creation is scoped to
/// the caller's organization; mutations are narrowed to owners per method.
pub fn build_organization_routes(
    app_state: AppState,
    auth_state_middleware: &AuthState,
) -> Router {
    let project_routes = Router::new()
        .route(
            "/organization/projects/{project_id}",
            get(projects::get_project),
        )
        .route(
            "/organization/projects/{project_id}",
            post(projects::rename_project).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/organization/projects/{project_id}/archive",
            post(projects::archive_project).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/organization/projects/{project_id}/members",
            get(projects::list_project_members),
        )
        .route(
            "/organization/projects/{project_id}/members",
            post(projects::add_project_member).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/organization/projects/{project_id}/providers",
            get(providers::list_providers),
        )
        .route(
            "/organization/projects/{project_id}/providers",
            post(providers::create_provider).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/organization/projects/{project_id}/providers/{provider_id}",
            get(providers::get_provider),
        )
        .route(
            "/organization/projects/{project_id}/providers/{provider_id}",
            patch(providers::update_provider).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/organization/projects/{project_id}/providers/{provider_id}",
            delete(providers::delete_provider).layer(from_fn(owner_only_middleware)),
        )
        .route_layer(from_fn_with_state(app_state.clone(), project_middleware));

    let scoped_routes = Router::new()
        .route("/organization", get(organizations::get_organization))
        .route("/organization/members", get(organizations::list_members))
        .route(
            "/organization/members",
            post(organizations::add_member).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/organization/admin_api_keys",
            get(api_keys::list_admin_api_keys).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/organization/admin_api_keys",
            post(api_keys::create_admin_api_key).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/organization/admin_api_keys/{key_id}",
            delete(api_keys::delete_admin_api_key).layer(from_fn(owner_only_middleware)),
        )
        .route("/organization/providers", get(providers::list_providers))
        .route(
            "/organization/providers",
            post(providers::create_provider).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/organization/providers/{provider_id}",
            get(providers::get_provider),
        )
        .route(
            "/organization/providers/{provider_id}",
            patch(providers::update_provider).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/organization/providers/{provider_id}",
            delete(providers::delete_provider).layer(from_fn(owner_only_middleware)),
        )
        .route("/organization/projects", get(projects::list_projects))
        .route(
            "/organization/projects",
            post(projects::create_project).layer(from_fn(owner_only_middleware)),
        )
        .route(
            "/admin/cache/invalidate",
            post(admin::invalidate_cache).layer(from_fn(owner_only_middleware)),
        )
        .merge(project_routes)
        .route_layer(from_fn_with_state(
            app_state.clone(),
            organization_middleware,
        ));

    Router::new()
        .route("/organization", post(organizations::create_organization))
        .merge(scoped_routes)
        .with_state(app_state)
        .layer(from_fn_with_state(
            auth_state_middleware.clone(),
            admin_middleware,
        ))
}
