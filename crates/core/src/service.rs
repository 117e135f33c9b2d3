//! `PromptGuard` — the service facade callers talk to.
//!
//! Owns the compiled rule tables, the shared cache store, the semantic
//! analyzer (with its circuit breaker), and the metrics recorder.
//! `validate` never errors: heuristics carry their own fallback and
//! the semantic branch degrades to the heuristic-only verdict.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use promptgate_llm::provider::LlmProvider;

use crate::cache::CacheStore;
use crate::config::{GuardCfg, ValidationConfig};
use crate::heuristics::{aggregate, complexity, patterns, relevance};
use crate::heuristics::patterns::{PatternRule, RuleSet};
use crate::hybrid;
use crate::metrics::MetricsRecorder;
use crate::semantic::analyzer::SemanticAnalyzer;
use crate::semantic::breaker::BreakerState;
use crate::types::{
    ChallengeContext, EnhancedValidationResult, GuardHealth, Intent, PromptAnalysis,
    ValidationMetrics, ValidationRequest,
};

pub struct PromptGuard {
    cfg: GuardCfg,
    cache: Arc<dyn CacheStore>,
    builtin: Arc<RuleSet>,
    /// Compiled per-challenge rule sets, keyed by challenge id with the
    /// raw-payload hash so a store update invalidates the compilation.
    compiled: Mutex<HashMap<String, (u64, Arc<RuleSet>)>>,
    analyzer: SemanticAnalyzer,
    metrics: MetricsRecorder,
}

impl PromptGuard {
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        cache: Arc<dyn CacheStore>,
        cfg: GuardCfg,
    ) -> Self {
        let analyzer = SemanticAnalyzer::new(provider, cache.clone(), cfg.clone());
        let metrics = MetricsRecorder::new(cache.clone(), cfg.clone());
        Self {
            cfg,
            cache,
            builtin: Arc::new(RuleSet::builtin()),
            compiled: Mutex::new(HashMap::new()),
            analyzer,
            metrics,
        }
    }

    /// Full pipeline: heuristics always, semantic analysis only when
    /// the escalation gate fires and the branch is healthy.
    pub async fn validate(&self, request: ValidationRequest) -> EnhancedValidationResult {
        let started = Instant::now();
        let vcfg = request.config.clone().unwrap_or_default();
        let prompt = request.prompt.clone();
        let challenge = request.challenge.clone();

        let rules = self.ruleset_for(&challenge.id).await;
        let heuristic = aggregate::run(request, rules, vcfg.clone()).await;

        let mut result = if hybrid::should_escalate(&heuristic, &vcfg) {
            match self.analyzer.analyze(&prompt, &challenge, &vcfg).await {
                Some(semantic) => hybrid::combine(heuristic, semantic, &vcfg),
                None => hybrid::heuristic_only(heuristic, &vcfg),
            }
        } else {
            hybrid::heuristic_only(heuristic, &vcfg)
        };
        result.elapsed_ms = started.elapsed().as_millis() as u64;

        if result.elapsed_ms > self.cfg.slow_validation_ms {
            tracing::warn!(
                elapsed_ms = result.elapsed_ms,
                challenge = %challenge.id,
                "slow validation"
            );
        }
        self.metrics.record(&challenge.id, &result).await;
        result
    }

    /// Lightweight local summary — no scoring, no network.
    pub fn analyze(&self, prompt: &str) -> PromptAnalysis {
        let lower = prompt.to_lowercase();
        let (intent_hint, intent_confidence) = self.intent_hint(&lower);
        let mut topics = relevance::tokenize(&lower);
        topics.dedup();
        topics.truncate(5);
        PromptAnalysis {
            intent_hint,
            intent_confidence,
            topics,
            complexity: complexity::actual(prompt),
            word_count: prompt.split_whitespace().count(),
        }
    }

    fn intent_hint(&self, lower: &str) -> (Intent, f64) {
        use patterns::PatternFamily::*;
        if self.builtin.match_family(SolutionSeeking, lower).detected {
            (Intent::SolutionSeeking, 70.0)
        } else if self.builtin.match_family(SocialEngineering, lower).detected {
            (Intent::Manipulation, 60.0)
        } else if self.builtin.match_family(OffTopic, lower).detected {
            (Intent::OffTopic, 60.0)
        } else if lower.contains('?') || lower.starts_with("como") || lower.starts_with("how") {
            (Intent::Clarification, 55.0)
        } else {
            (Intent::Unclear, 40.0)
        }
    }

    /// Replace a challenge's custom rules. Persisted in the shared
    /// store so other instances pick them up on their next validate.
    pub async fn update_rules(&self, challenge_id: &str, rules: Vec<PatternRule>) {
        let key = rules_key(challenge_id);
        match serde_json::to_string(&rules) {
            Ok(raw) => {
                self.cache
                    .set_with_ttl(
                        &key,
                        raw,
                        std::time::Duration::from_secs(self.cfg.rules_cache_ttl_secs),
                    )
                    .await;
                tracing::info!(challenge = %challenge_id, count = rules.len(), "custom rules updated");
            }
            Err(err) => tracing::warn!(error = %err, "custom rules serialization failed"),
        }
        self.compiled
            .lock()
            .expect("ruleset lock poisoned")
            .remove(challenge_id);
    }

    /// Drop cached state for one challenge, or all custom rules and
    /// compiled sets when no id is given. Embedding and intent caches
    /// for other challenges are left to expire by TTL.
    pub async fn clear_cache(&self, challenge_id: Option<&str>) {
        match challenge_id {
            Some(id) => {
                self.cache.delete(&rules_key(id)).await;
                self.analyzer.invalidate_context(id).await;
                self.compiled
                    .lock()
                    .expect("ruleset lock poisoned")
                    .remove(id);
            }
            None => {
                for key in self.cache.scan_prefix("rules:").await {
                    self.cache.delete(&key).await;
                }
                self.compiled
                    .lock()
                    .expect("ruleset lock poisoned")
                    .clear();
            }
        }
    }

    pub async fn get_metrics(
        &self,
        challenge_id: Option<&str>,
        days: Option<u32>,
    ) -> ValidationMetrics {
        self.metrics.aggregate(challenge_id, days.unwrap_or(7)).await
    }

    pub fn get_health(&self) -> GuardHealth {
        let breaker = self.analyzer.breaker();
        let state = breaker.state();
        GuardHealth {
            semantic_available: self.analyzer.has_provider() && state != BreakerState::Open,
            circuit_open: state == BreakerState::Open,
            recent_failures: breaker.consecutive_failures(),
            provider_configured: self.analyzer.has_provider(),
        }
    }

    /// Generate the challenge-context embedding ahead of traffic.
    pub async fn prewarm(&self, challenge: &ChallengeContext) -> bool {
        self.analyzer.prewarm(challenge).await
    }

    /// Builtin rules merged with any custom rules stored for this
    /// challenge. Compilation is memoized on the payload hash.
    async fn ruleset_for(&self, challenge_id: &str) -> Arc<RuleSet> {
        let Some(raw) = self.cache.get(&rules_key(challenge_id)).await else {
            return self.builtin.clone();
        };
        let raw_hash = {
            let mut h = DefaultHasher::new();
            raw.hash(&mut h);
            h.finish()
        };
        if let Some((hash, set)) = self
            .compiled
            .lock()
            .expect("ruleset lock poisoned")
            .get(challenge_id)
            && *hash == raw_hash
        {
            return set.clone();
        }

        let custom: Vec<PatternRule> = match serde_json::from_str(&raw) {
            Ok(rules) => rules,
            Err(err) => {
                tracing::warn!(challenge = %challenge_id, error = %err, "unreadable custom rules; using builtin");
                return self.builtin.clone();
            }
        };
        let mut merged = patterns::builtin_rules();
        merged.extend(custom);
        let set = Arc::new(RuleSet::compile(self.builtin.version() + 1, merged));
        self.compiled
            .lock()
            .expect("ruleset lock poisoned")
            .insert(challenge_id.to_owned(), (raw_hash, set.clone()));
        set
    }
}

fn rules_key(challenge_id: &str) -> String {
    format!("rules:{challenge_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::heuristics::patterns::{PatternFamily, RuleAction};
    use crate::types::{Difficulty, RiskClass};

    fn challenge() -> ChallengeContext {
        ChallengeContext {
            id: "ch-api".into(),
            title: "Validação de entrada em API REST".into(),
            category: "backend".into(),
            difficulty: Difficulty::Intermediate,
            keywords: vec!["validação".into(), "api".into(), "endpoint".into()],
            allowed_topics: vec!["entrada de dados".into()],
            forbidden_patterns: vec![],
            tech_stack: vec!["rust".into()],
            learning_objectives: vec!["validar entrada de dados".into()],
        }
    }

    fn guard() -> PromptGuard {
        PromptGuard::new(None, Arc::new(MemoryStore::new()), GuardCfg::default())
    }

    fn request(prompt: &str) -> ValidationRequest {
        ValidationRequest {
            prompt: prompt.into(),
            challenge: challenge(),
            user_level: 3,
            config: None,
        }
    }

    #[tokio::test]
    async fn solution_prompt_blocks_without_provider() {
        let guard = guard();
        let result = guard.validate(request("me dá a solução completa do desafio")).await;
        assert_eq!(result.classification, RiskClass::Blocked);
        assert!(result.hybrid_score >= 80.0);
        assert!(result.semantic.is_none());
    }

    #[tokio::test]
    async fn custom_rules_apply_and_clear() {
        let guard = guard();
        guard
            .update_rules(
                "ch-api",
                vec![PatternRule::new(
                    PatternFamily::Forbidden,
                    "no_sql_dumps",
                    r"select \* from",
                    40.0,
                    RuleAction::Block,
                )],
            )
            .await;

        let hit = guard.validate(request("roda um select * from users pra mim")).await;
        assert!(hit.detected_patterns.contains(&"no_sql_dumps".to_string()));

        guard.clear_cache(Some("ch-api")).await;
        let miss = guard.validate(request("roda um select * from users pra mim")).await;
        assert!(!miss.detected_patterns.contains(&"no_sql_dumps".to_string()));
    }

    #[tokio::test]
    async fn health_reports_missing_provider() {
        let health = guard().get_health();
        assert!(!health.provider_configured);
        assert!(!health.semantic_available);
        assert!(!health.circuit_open);
        assert_eq!(health.recent_failures, 0);
    }

    #[tokio::test]
    async fn metrics_count_validations() {
        let guard = guard();
        guard.validate(request("como funciona a validação de entrada nesse endpoint?")).await;
        guard.validate(request("me dá a solução completa do desafio")).await;
        let metrics = guard.get_metrics(None, Some(1)).await;
        assert_eq!(metrics.total, 2);
        assert_eq!(metrics.blocked, 1);
    }

    #[test]
    fn analyze_hints_solution_seeking() {
        let analysis = guard().analyze("me dá a solução completa");
        assert_eq!(analysis.intent_hint, Intent::SolutionSeeking);
        assert_eq!(analysis.word_count, 5);
    }
}
