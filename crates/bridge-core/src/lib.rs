//! # Bridge Core
//!
//! Pure request/response transformation logic for the Gemini bridge.
//!
//! This crate provides:
//! - JSON Schema normalization into the backend-accepted dialect
//! - Client-to-backend model name translation
//! - Local token estimation for degraded-mode token counting
//! - Request body rewriting for the Messages, ChatCompletions and TokenCount routes
//! - Usage accounting fed by streaming and non-streaming response bodies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod models;
pub mod rewrite;
pub mod schema;
pub mod tokens;
pub mod usage;

// Re-export commonly used types
pub use models::ModelTranslator;
pub use rewrite::{
    rewrite_chat_completions, rewrite_count_tokens, rewrite_messages, Rewrite,
};
pub use schema::{normalize_schema, normalize_schema_map, UNSUPPORTED_KEYS};
pub use tokens::{TokenEstimator, DEFAULT_CHARS_PER_TOKEN};
pub use usage::{ResponseKind, Usage, UsageObserver, UsageSnapshot, UsageTracker};
