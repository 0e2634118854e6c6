//! HTTP backends for upstream providers.
//!
//! Every vendor the gateway supports (Jan, OpenRouter, Gemini's OpenAI
//! endpoint) speaks the OpenAI chat-completions dialect, so one backend
//! implementation serves them all.

pub mod backend;
pub mod openai_compatible;

pub use backend::{BackendConfig, ExternalBackend};
pub use openai_compatible::OpenAiCompatibleBackend;
