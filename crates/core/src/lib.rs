//! promptgate — request-time risk assessment for prompts sent to an
//! educational AI assistant.
//!
//! Pipeline: heuristic checks always run (pattern families, relevance,
//! complexity), their aggregate decides whether the request escalates
//! to semantic analysis (embeddings + intent classification + local
//! manipulation scoring), and the hybrid combiner merges both into the
//! final verdict. Every call returns a result; infrastructure faults
//! degrade to increased friction, never to an error.

pub mod cache;
pub mod config;
pub mod error;
pub mod heuristics;
pub mod hybrid;
pub mod metrics;
pub mod semantic;
pub mod service;
pub mod types;

pub use service::PromptGuard;
pub use types::{
    Action, ChallengeContext, EnhancedValidationResult, Intent, PromptValidationResult, RiskClass,
    ValidationRequest,
};
