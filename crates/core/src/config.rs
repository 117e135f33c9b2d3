use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

use crate::types::Intent;

/// Service-level parameters. Loaded from the `guard_config` table at
/// startup; first boot writes defaults, subsequent boots read existing
/// values. Without a database the defaults apply as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardCfg {
    // circuit breaker
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,

    // external provider
    pub provider_timeout_ms: u64,

    // cache TTLs
    pub embedding_cache_ttl_secs: u64,
    pub intent_cache_ttl_secs: u64,
    pub context_cache_ttl_secs: u64,
    pub rules_cache_ttl_secs: u64,

    // metrics & audit
    pub metrics_retention_secs: u64,
    pub audit_ttl_secs: u64,
    pub slow_validation_ms: u64,
}

impl Default for GuardCfg {
    fn default() -> Self {
        Self {
            breaker_failure_threshold: 3,
            breaker_cooldown_secs: 60,
            provider_timeout_ms: 5000,
            embedding_cache_ttl_secs: 3600,
            intent_cache_ttl_secs: 900,
            context_cache_ttl_secs: 86400,
            rules_cache_ttl_secs: 30 * 86400,
            metrics_retention_secs: 40 * 86400,
            audit_ttl_secs: 7 * 86400,
            slow_validation_ms: 2000,
        }
    }
}

impl GuardCfg {
    /// Load config from the `guard_config` table. If the table is
    /// empty, seed it with defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM guard_config")
            .fetch_all(pool)
            .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg);
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Ok(Self::from_map(&map))
    }

    /// Write all default values into the `guard_config` table.
    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        for (key, value, desc) in self.to_entries() {
            sqlx::query(
                "INSERT INTO guard_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            breaker_failure_threshold: get_or(m, "breaker_failure_threshold", d.breaker_failure_threshold),
            breaker_cooldown_secs: get_or(m, "breaker_cooldown_secs", d.breaker_cooldown_secs),
            provider_timeout_ms: get_or(m, "provider_timeout_ms", d.provider_timeout_ms),
            embedding_cache_ttl_secs: get_or(m, "embedding_cache_ttl_secs", d.embedding_cache_ttl_secs),
            intent_cache_ttl_secs: get_or(m, "intent_cache_ttl_secs", d.intent_cache_ttl_secs),
            context_cache_ttl_secs: get_or(m, "context_cache_ttl_secs", d.context_cache_ttl_secs),
            rules_cache_ttl_secs: get_or(m, "rules_cache_ttl_secs", d.rules_cache_ttl_secs),
            metrics_retention_secs: get_or(m, "metrics_retention_secs", d.metrics_retention_secs),
            audit_ttl_secs: get_or(m, "audit_ttl_secs", d.audit_ttl_secs),
            slow_validation_ms: get_or(m, "slow_validation_ms", d.slow_validation_ms),
        }
    }

    fn to_entries(&self) -> Vec<(&'static str, String, &'static str)> {
        vec![
            ("breaker_failure_threshold", self.breaker_failure_threshold.to_string(), "Consecutive provider failures before the circuit opens"),
            ("breaker_cooldown_secs", self.breaker_cooldown_secs.to_string(), "Circuit breaker cool-down seconds"),
            ("provider_timeout_ms", self.provider_timeout_ms.to_string(), "External provider call timeout ms"),
            ("embedding_cache_ttl_secs", self.embedding_cache_ttl_secs.to_string(), "Prompt embedding cache TTL seconds"),
            ("intent_cache_ttl_secs", self.intent_cache_ttl_secs.to_string(), "Intent classification cache TTL seconds"),
            ("context_cache_ttl_secs", self.context_cache_ttl_secs.to_string(), "Challenge context embedding cache TTL seconds"),
            ("rules_cache_ttl_secs", self.rules_cache_ttl_secs.to_string(), "Per-challenge custom rule TTL seconds"),
            ("metrics_retention_secs", self.metrics_retention_secs.to_string(), "Rolling metrics counter retention seconds"),
            ("audit_ttl_secs", self.audit_ttl_secs.to_string(), "Audit record TTL seconds"),
            ("slow_validation_ms", self.slow_validation_ms.to_string(), "Latency above which a validation counts as slow"),
        ]
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Signed per-intent risk adjustments applied by the hybrid combiner.
/// Hand-tuned values; kept as configuration so they can be
/// recalibrated without code changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAdjustments {
    pub educational: f64,
    pub clarification: f64,
    pub debugging: f64,
    pub unclear: f64,
    pub off_topic: f64,
    pub solution_seeking: f64,
    pub gaming: f64,
    pub manipulation: f64,
}

impl Default for IntentAdjustments {
    fn default() -> Self {
        Self {
            educational: -20.0,
            clarification: -10.0,
            debugging: -15.0,
            unclear: 0.0,
            off_topic: 20.0,
            solution_seeking: 30.0,
            gaming: 40.0,
            manipulation: 50.0,
        }
    }
}

impl IntentAdjustments {
    pub fn for_intent(&self, intent: Intent) -> f64 {
        match intent {
            Intent::Educational => self.educational,
            Intent::Clarification => self.clarification,
            Intent::Debugging => self.debugging,
            Intent::Unclear => self.unclear,
            Intent::OffTopic => self.off_topic,
            Intent::SolutionSeeking => self.solution_seeking,
            Intent::Gaming => self.gaming,
            Intent::Manipulation => self.manipulation,
        }
    }
}

/// Per-request validation options. A request may override the service
/// defaults wholesale via `ValidationRequest.config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Warning routes to Review instead of Throttle.
    pub strict_mode: bool,
    /// Measured context alignment below this flags the prompt as
    /// drifting from the challenge.
    pub context_similarity_threshold: f64,
    /// Relevance score below which the off-topic penalty applies.
    pub off_topic_threshold: f64,
    pub block_direct_solutions: bool,
    /// Tolerated expected-vs-actual complexity deviation fraction.
    pub allowed_deviation: f64,
    pub semantic_enabled: bool,
    /// Borderline band (inclusive lower, inclusive upper) that
    /// triggers semantic escalation.
    pub borderline_lower: f64,
    pub borderline_upper: f64,
    /// Context alignment below this adds a proportional penalty.
    pub semantic_similarity_threshold: f64,
    pub max_prompt_length: usize,
    pub chat_model: String,
    pub embedding_model: String,
    pub intent_adjustments: IntentAdjustments,
    /// Manipulation score above which half of it feeds the hybrid score.
    pub manipulation_weight_threshold: f64,
    /// Added when two or more manipulation patterns co-occur.
    pub manipulation_combination_bonus: f64,
    /// Added for polite phrasing combined with a solution request.
    pub manipulation_compound_bonus: f64,
    /// Manipulation intent confidence above which the result is blocked.
    pub manipulation_block_confidence: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            context_similarity_threshold: 0.6,
            off_topic_threshold: 0.3,
            block_direct_solutions: true,
            allowed_deviation: 0.2,
            semantic_enabled: true,
            borderline_lower: 30.0,
            borderline_upper: 70.0,
            semantic_similarity_threshold: 0.65,
            max_prompt_length: 2000,
            chat_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            intent_adjustments: IntentAdjustments::default(),
            manipulation_weight_threshold: 30.0,
            manipulation_combination_bonus: 15.0,
            manipulation_compound_bonus: 10.0,
            manipulation_block_confidence: 80.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ValidationConfig::default();
        assert!(cfg.borderline_lower < cfg.borderline_upper);
        assert!(cfg.off_topic_threshold > 0.0 && cfg.off_topic_threshold < 1.0);
        assert!(cfg.max_prompt_length > 0);
    }

    #[test]
    fn intent_adjustments_cover_all_labels() {
        let adj = IntentAdjustments::default();
        assert_eq!(adj.for_intent(Intent::Educational), -20.0);
        assert_eq!(adj.for_intent(Intent::Manipulation), 50.0);
        assert_eq!(adj.for_intent(Intent::Unclear), 0.0);
    }

    #[test]
    fn guard_cfg_from_map_overrides() {
        let mut m = HashMap::new();
        m.insert("breaker_failure_threshold".to_string(), "5".to_string());
        m.insert("breaker_cooldown_secs".to_string(), "not a number".to_string());
        let cfg = GuardCfg::from_map(&m);
        assert_eq!(cfg.breaker_failure_threshold, 5);
        // unparsable value falls back to default
        assert_eq!(cfg.breaker_cooldown_secs, GuardCfg::default().breaker_cooldown_secs);
    }
}
