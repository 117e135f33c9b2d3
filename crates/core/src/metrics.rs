//! Daily rolling validation counters and audit records.
//!
//! Counters live in the shared store under `metrics:{day}:{scope}:*`
//! keys, written with atomic increments so concurrent requests never
//! race a read-modify-write. Scope is either `all` or a challenge id.
//! Score and confidence sums are stored as centi-units (×100) because
//! the store only increments integers. Everything self-evicts by TTL;
//! there is no cleanup job.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};

use crate::cache::CacheStore;
use crate::config::GuardCfg;
use crate::types::{EnhancedValidationResult, RiskClass, ValidationMetrics};

const SCOPE_ALL: &str = "all";

const C_TOTAL: &str = "total";
const C_SAFE: &str = "safe";
const C_WARNING: &str = "warning";
const C_BLOCKED: &str = "blocked";
const C_SEMANTIC: &str = "semantic";
const C_SLOW: &str = "slow";
const C_RISK_SUM: &str = "risk_sum";
const C_CONFIDENCE_SUM: &str = "confidence_sum";
const C_LATENCY_SUM: &str = "latency_sum";

pub struct MetricsRecorder {
    cache: Arc<dyn CacheStore>,
    cfg: GuardCfg,
}

impl MetricsRecorder {
    pub fn new(cache: Arc<dyn CacheStore>, cfg: GuardCfg) -> Self {
        Self { cache, cfg }
    }

    /// Record one finished validation under today's counters, for both
    /// the global scope and the challenge scope, plus the audit record.
    pub async fn record(&self, challenge_id: &str, result: &EnhancedValidationResult) {
        let day = today();
        self.record_scope(&day, SCOPE_ALL, result).await;
        self.record_scope(&day, challenge_id, result).await;

        if result.classification == RiskClass::Blocked {
            let ttl = Duration::from_secs(self.cfg.metrics_retention_secs);
            for pattern in &result.detected_patterns {
                self.cache
                    .incr(&format!("patterns:{day}:{pattern}"), 1, ttl)
                    .await;
            }
        }

        self.write_audit(result).await;
    }

    async fn record_scope(&self, day: &str, scope: &str, result: &EnhancedValidationResult) {
        let ttl = Duration::from_secs(self.cfg.metrics_retention_secs);
        let bump = |counter: &str, by: i64| {
            let key = counter_key(day, scope, counter);
            async move { self.cache.incr(&key, by, ttl).await }
        };

        bump(C_TOTAL, 1).await;
        let class_counter = match result.classification {
            RiskClass::Safe => C_SAFE,
            RiskClass::Warning => C_WARNING,
            RiskClass::Blocked => C_BLOCKED,
        };
        bump(class_counter, 1).await;
        if result.semantic.is_some() {
            bump(C_SEMANTIC, 1).await;
        }
        if result.elapsed_ms > self.cfg.slow_validation_ms {
            bump(C_SLOW, 1).await;
        }
        bump(C_RISK_SUM, (result.hybrid_score * 100.0).round() as i64).await;
        bump(C_CONFIDENCE_SUM, (result.heuristic.confidence * 100.0).round() as i64).await;
        bump(C_LATENCY_SUM, result.elapsed_ms as i64).await;
    }

    /// Full verdict keyed by the validation id, kept for the audit TTL.
    async fn write_audit(&self, result: &EnhancedValidationResult) {
        let key = format!("audit:{}", result.heuristic.metadata.validation_id);
        match serde_json::to_string(result) {
            Ok(raw) => {
                self.cache
                    .set_with_ttl(&key, raw, Duration::from_secs(self.cfg.audit_ttl_secs))
                    .await;
            }
            Err(err) => tracing::warn!(error = %err, "audit record serialization failed"),
        }
    }

    /// Sum the last `days` daily buckets for one scope. A `None`
    /// challenge id reads the global scope.
    pub async fn aggregate(&self, challenge_id: Option<&str>, days: u32) -> ValidationMetrics {
        let scope = challenge_id.unwrap_or(SCOPE_ALL);
        let day_list = recent_days(days.max(1));

        let counters = [
            C_TOTAL,
            C_SAFE,
            C_WARNING,
            C_BLOCKED,
            C_SEMANTIC,
            C_SLOW,
            C_RISK_SUM,
            C_CONFIDENCE_SUM,
            C_LATENCY_SUM,
        ];
        let keys: Vec<String> = day_list
            .iter()
            .flat_map(|day| counters.iter().map(move |c| counter_key(day, scope, c)))
            .collect();
        let values = self.cache.mget(&keys).await;

        let mut sums = [0i64; 9];
        for (i, value) in values.iter().enumerate() {
            if let Some(raw) = value {
                sums[i % counters.len()] += raw.parse::<i64>().unwrap_or(0);
            }
        }
        let [total, safe, warning, blocked, semantic_applied, slow, risk_sum, confidence_sum, latency_sum] =
            sums;

        let mut metrics = ValidationMetrics {
            total: total.max(0) as u64,
            safe: safe.max(0) as u64,
            warning: warning.max(0) as u64,
            blocked: blocked.max(0) as u64,
            semantic_applied: semantic_applied.max(0) as u64,
            slow_count: slow.max(0) as u64,
            ..Default::default()
        };
        if total > 0 {
            metrics.avg_risk = risk_sum as f64 / 100.0 / total as f64;
            metrics.avg_confidence = confidence_sum as f64 / 100.0 / total as f64;
            metrics.avg_latency_ms = latency_sum as f64 / total as f64;
        }
        metrics.risk_bands.low = metrics.safe;
        metrics.risk_bands.medium = metrics.warning;
        metrics.risk_bands.high = metrics.blocked;
        metrics.top_blocked_patterns = self.top_blocked_patterns(&day_list).await;
        metrics
    }

    /// Blocked-pattern counts across the day range, highest first.
    async fn top_blocked_patterns(&self, day_list: &[String]) -> Vec<(String, u64)> {
        let mut tally: Vec<(String, u64)> = Vec::new();
        for day in day_list {
            let prefix = format!("patterns:{day}:");
            let keys = self.cache.scan_prefix(&prefix).await;
            if keys.is_empty() {
                continue;
            }
            let values = self.cache.mget(&keys).await;
            for (key, value) in keys.iter().zip(values) {
                let count = value.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
                let name = &key[prefix.len()..];
                match tally.iter_mut().find(|(n, _)| n == name) {
                    Some((_, c)) => *c += count,
                    None => tally.push((name.to_owned(), count)),
                }
            }
        }
        tally.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tally.truncate(10);
        tally
    }
}

fn counter_key(day: &str, scope: &str, counter: &str) -> String {
    format!("metrics:{day}:{scope}:{counter}")
}

fn today() -> String {
    Utc::now().format("%Y%m%d").to_string()
}

fn recent_days(days: u32) -> Vec<String> {
    let now = Utc::now();
    (0..days)
        .filter_map(|back| now.checked_sub_days(Days::new(back as u64)))
        .map(|d| d.format("%Y%m%d").to_string())
        .collect()
}
