//! Semantic analysis branch: external-provider probes (embedding
//! similarity, intent classification) guarded by a circuit breaker and
//! read-through caches, plus the purely local manipulation scorer.

pub mod analyzer;
pub mod breaker;
pub mod manipulation;
