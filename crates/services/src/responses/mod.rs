//! Stored model responses and their lifecycle.

pub mod errors;
pub mod events;
pub mod models;
pub mod ports;
pub mod service;

pub use errors::ResponseError;
pub use models::*;
pub use ports::*;
pub use service::{item_from_message, ResponseService};
