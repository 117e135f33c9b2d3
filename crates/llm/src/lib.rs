//! Language-model provider abstraction for the promptgate pipeline.
//!
//! Two endpoints matter here: structured chat completions (used for
//! intent classification) and text embeddings (used for context
//! similarity). `provider` defines the trait and a scriptable mock;
//! `http` implements it against OpenAI-compatible APIs.

pub mod http;
pub mod provider;
