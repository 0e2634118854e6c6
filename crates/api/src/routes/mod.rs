pub mod admin;
pub mod api;
pub mod api_keys;
pub mod auth;
pub mod chat;
pub mod common;
pub mod completions;
pub mod conversations;
pub mod health;
pub mod organizations;
pub mod projects;
pub mod providers;
pub mod responses;

pub use api::{AppState, HttpSettings};
pub use common::ApiError;
