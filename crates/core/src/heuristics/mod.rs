//! Deterministic request-time checks: pattern families, lexical
//! relevance, complexity consistency, and the aggregator that fans
//! them out and folds their risk contributions into one score.

pub mod aggregate;
pub mod complexity;
pub mod patterns;
pub mod relevance;
