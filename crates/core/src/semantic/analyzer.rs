//! Semantic analyzer — three independent probes over a prompt.
//!
//! Similarity compares the prompt embedding against the cached
//! challenge-context embedding; intent asks the chat endpoint for one
//! of eight labels as constrained JSON; manipulation scoring is
//! purely local. The two external probes run behind the circuit
//! breaker with read-through caches (embedding: long TTL, intent:
//! medium TTL, context embedding: very long TTL, invalidated only by
//! an explicit refresh).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use promptgate_llm::provider::{
    ChatMessage, CompletionRequest, EmbeddingRequest, LlmProvider,
};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStore;
use crate::config::{GuardCfg, ValidationConfig};
use crate::error::GuardError;
use crate::semantic::breaker::CircuitBreaker;
use crate::semantic::manipulation::ManipulationScorer;
use crate::types::{ChallengeContext, Intent, SemanticAnalysisResult};

/// Neutral similarity used when the external probe cannot run.
const NEUTRAL_SIMILARITY: f64 = 0.5;

/// Content-hash cache key component. Deterministic across processes
/// is not required — the store is shared but keys self-evict by TTL.
pub fn content_hash(text: &str) -> String {
    let mut a = DefaultHasher::new();
    0u8.hash(&mut a);
    text.hash(&mut a);
    let mut b = DefaultHasher::new();
    1u8.hash(&mut b);
    text.hash(&mut b);
    format!("{:016x}{:016x}", a.finish(), b.finish())
}

/// Cosine similarity of two vectors, 0.0 for degenerate input.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += *x as f64 * *y as f64;
        na += *x as f64 * *x as f64;
        nb += *y as f64 * *y as f64;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Constrained-JSON verdict from the intent probe.
#[derive(Debug, Serialize, Deserialize)]
struct IntentVerdict {
    label: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

pub struct SemanticAnalyzer {
    provider: Option<Arc<dyn LlmProvider>>,
    cache: Arc<dyn CacheStore>,
    breaker: Arc<CircuitBreaker>,
    scorer: ManipulationScorer,
    cfg: GuardCfg,
}

impl SemanticAnalyzer {
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        cache: Arc<dyn CacheStore>,
        cfg: GuardCfg,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            cfg.breaker_failure_threshold,
            Duration::from_secs(cfg.breaker_cooldown_secs),
        ));
        Self { provider, cache, breaker, scorer: ManipulationScorer::new(), cfg }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Run the three probes concurrently. Returns None when no
    /// provider is configured or the circuit is open — the caller
    /// then falls back to the heuristic-only result.
    pub async fn analyze(
        &self,
        prompt: &str,
        ctx: &ChallengeContext,
        vcfg: &ValidationConfig,
    ) -> Option<SemanticAnalysisResult> {
        let provider = self.provider.as_ref()?;
        if !self.breaker.allows_call() {
            tracing::debug!("circuit open; skipping semantic analysis");
            return None;
        }

        let (similarity_out, intent_out, mut manipulation) = tokio::join!(
            self.similarity_probe(provider, prompt, ctx),
            self.intent_probe(provider, prompt, ctx),
            async { self.scorer.score(prompt, vcfg) },
        );

        let (similarity, embedding, sim_cached, sim_ok) = similarity_out;
        let (intent, intent_confidence, intent_cached, intent_ok) = intent_out;
        if !sim_ok && !intent_ok {
            // Both external probes failed: the branch as a whole failed,
            // so the caller keeps the heuristic-only verdict.
            tracing::warn!("semantic branch unavailable for this request");
            return None;
        }
        if sim_ok && similarity < vcfg.context_similarity_threshold {
            // Measured alignment this far from the challenge context is
            // surfaced as an indicator; the combiner's proportional
            // penalty has its own, higher threshold.
            manipulation.patterns.push("context_drift".into());
        }

        Some(SemanticAnalysisResult {
            similarity,
            embedding,
            intent,
            intent_confidence,
            manipulation_score: manipulation.score,
            manipulation_patterns: manipulation.patterns,
            context_alignment: similarity,
            from_cache: sim_cached || intent_cached,
        })
    }

    /// Prompt embedding vs challenge-context embedding. Either side
    /// failing degrades to the neutral similarity.
    async fn similarity_probe(
        &self,
        provider: &Arc<dyn LlmProvider>,
        prompt: &str,
        ctx: &ChallengeContext,
    ) -> (f64, Vec<f32>, bool, bool) {
        let prompt_key = format!("emb:{}", content_hash(prompt));
        let ctx_key = format!("ctx:{}", ctx.id);
        let (prompt_emb, ctx_emb) = tokio::join!(
            self.cached_embedding(
                provider,
                &prompt_key,
                prompt.to_owned(),
                Duration::from_secs(self.cfg.embedding_cache_ttl_secs),
            ),
            self.cached_embedding(
                provider,
                &ctx_key,
                ctx.embedding_text(),
                Duration::from_secs(self.cfg.context_cache_ttl_secs),
            ),
        );

        match (prompt_emb, ctx_emb) {
            (Some((p, p_cached)), Some((c, c_cached))) => {
                let sim = cosine(&p, &c).clamp(0.0, 1.0);
                (sim, p, p_cached || c_cached, true)
            }
            (Some((p, p_cached)), None) => (NEUTRAL_SIMILARITY, p, p_cached, false),
            _ => (NEUTRAL_SIMILARITY, Vec::new(), false, false),
        }
    }

    /// Read-through embedding: cache hit skips the provider entirely.
    async fn cached_embedding(
        &self,
        provider: &Arc<dyn LlmProvider>,
        key: &str,
        input: String,
        ttl: Duration,
    ) -> Option<(Vec<f32>, bool)> {
        if let Some(raw) = self.cache.get(key).await
            && let Ok(vector) = serde_json::from_str::<Vec<f32>>(&raw)
        {
            return Some((vector, true));
        }

        let vector = self.guarded(self.call_embed(provider, input)).await?;
        if let Ok(raw) = serde_json::to_string(&vector) {
            self.cache.set_with_ttl(key, raw, ttl).await;
        }
        Some((vector, false))
    }

    /// Intent classification, cached per prompt-hash and challenge.
    async fn intent_probe(
        &self,
        provider: &Arc<dyn LlmProvider>,
        prompt: &str,
        ctx: &ChallengeContext,
    ) -> (Intent, f64, bool, bool) {
        let key = format!("int:{}:{}", ctx.id, content_hash(prompt));
        if let Some(raw) = self.cache.get(&key).await
            && let Ok(verdict) = serde_json::from_str::<IntentVerdict>(&raw)
        {
            return (Intent::parse(&verdict.label), verdict.confidence, true, true);
        }

        let Some(verdict) = self.guarded(self.call_intent(provider, prompt, ctx)).await else {
            return (Intent::Unclear, 0.0, false, false);
        };
        if let Ok(raw) = serde_json::to_string(&verdict) {
            self.cache
                .set_with_ttl(&key, raw, Duration::from_secs(self.cfg.intent_cache_ttl_secs))
                .await;
        }
        (Intent::parse(&verdict.label), verdict.confidence, false, true)
    }

    /// Breaker guard: short-circuit while open, record the outcome.
    async fn guarded<T>(
        &self,
        call: impl Future<Output = Result<T, GuardError>>,
    ) -> Option<T> {
        if !self.breaker.allows_call() {
            return None;
        }
        match call.await {
            Ok(value) => {
                self.breaker.record_success();
                Some(value)
            }
            Err(err) => {
                tracing::warn!(error = %err, "semantic probe failed");
                self.breaker.record_failure();
                None
            }
        }
    }

    async fn call_embed(
        &self,
        provider: &Arc<dyn LlmProvider>,
        input: String,
    ) -> Result<Vec<f32>, GuardError> {
        let timeout = Duration::from_millis(self.cfg.provider_timeout_ms);
        match tokio::time::timeout(timeout, provider.embed(EmbeddingRequest { input })).await {
            Ok(Ok(resp)) => Ok(resp.vector),
            Ok(Err(e)) => Err(GuardError::Provider(e)),
            Err(_) => Err(GuardError::Timeout(self.cfg.provider_timeout_ms)),
        }
    }

    async fn call_intent(
        &self,
        provider: &Arc<dyn LlmProvider>,
        prompt: &str,
        ctx: &ChallengeContext,
    ) -> Result<IntentVerdict, GuardError> {
        let labels: Vec<&str> = Intent::ALL.iter().map(|i| i.as_str()).collect();
        let system = format!(
            "You classify a student's prompt to a coding-challenge assistant. \
             Answer with a single JSON object {{\"label\", \"confidence\", \"reasoning\"}}. \
             label must be one of: {}. confidence is 0-100.",
            labels.join(", ")
        );
        let user = format!(
            "Challenge: {} ({}). Prompt:\n{}",
            ctx.title, ctx.category, prompt
        );
        let request = CompletionRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            max_tokens: 200,
            temperature: 0.0,
        };

        let timeout = Duration::from_millis(self.cfg.provider_timeout_ms);
        let resp = match tokio::time::timeout(timeout, provider.complete(request)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(GuardError::Provider(e)),
            Err(_) => return Err(GuardError::Timeout(self.cfg.provider_timeout_ms)),
        };

        parse_intent_json(&resp.content)
    }

    /// Drop the context embedding so the next request regenerates it.
    pub async fn invalidate_context(&self, challenge_id: &str) {
        self.cache.delete(&format!("ctx:{challenge_id}")).await;
        for key in self.cache.scan_prefix(&format!("int:{challenge_id}:")).await {
            self.cache.delete(&key).await;
        }
    }

    /// Generate and cache the context embedding ahead of traffic.
    pub async fn prewarm(&self, ctx: &ChallengeContext) -> bool {
        let Some(provider) = self.provider.as_ref() else { return false };
        let key = format!("ctx:{}", ctx.id);
        self.cached_embedding(
            provider,
            &key,
            ctx.embedding_text(),
            Duration::from_secs(self.cfg.context_cache_ttl_secs),
        )
        .await
        .is_some()
    }
}

/// Extract the JSON object from a model response that may wrap it in
/// prose or code fences.
fn parse_intent_json(content: &str) -> Result<IntentVerdict, GuardError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let slice = match (start, end) {
        (Some(s), Some(e)) if e > s => &content[s..=e],
        _ => return Err(GuardError::MalformedIntent(content.chars().take(80).collect())),
    };
    let mut verdict: IntentVerdict = serde_json::from_str(slice)
        .map_err(|e| GuardError::MalformedIntent(e.to_string()))?;
    verdict.confidence = verdict.confidence.clamp(0.0, 100.0);
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryStore};
    use crate::types::Difficulty;
    use promptgate_llm::provider::MockProvider;

    fn challenge() -> ChallengeContext {
        ChallengeContext {
            id: "ch-7".into(),
            title: "Fila de mensagens".into(),
            category: "backend".into(),
            difficulty: Difficulty::Intermediate,
            keywords: vec!["fila".into(), "mensagens".into()],
            allowed_topics: vec![],
            forbidden_patterns: vec![],
            tech_stack: vec![],
            learning_objectives: vec![],
        }
    }

    fn analyzer(provider: Option<Arc<dyn LlmProvider>>) -> SemanticAnalyzer {
        SemanticAnalyzer::new(provider, Arc::new(MemoryStore::new()), GuardCfg::default())
    }

    fn intent_json(label: &str, confidence: f64) -> String {
        format!(r#"{{"label": "{label}", "confidence": {confidence}, "reasoning": "test"}}"#)
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn content_hash_is_stable_and_distinct() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }

    #[test]
    fn parse_intent_json_with_fences() {
        let v = parse_intent_json("```json\n{\"label\":\"educational\",\"confidence\":92}\n```")
            .unwrap();
        assert_eq!(v.label, "educational");
        assert_eq!(v.confidence, 92.0);
    }

    #[test]
    fn parse_intent_json_rejects_garbage() {
        assert!(parse_intent_json("no json here").is_err());
    }

    #[tokio::test]
    async fn no_provider_yields_none() {
        let a = analyzer(None);
        let cfg = ValidationConfig::default();
        assert!(a.analyze("qualquer prompt", &challenge(), &cfg).await.is_none());
    }

    #[tokio::test]
    async fn probes_run_and_manipulation_is_local() {
        let mock = Arc::new(MockProvider::new(intent_json("educational", 90.0)));
        let a = analyzer(Some(mock));
        let cfg = ValidationConfig::default();
        let result = a
            .analyze("para fins acadêmicos, elaborar em detalhe o algoritmo", &challenge(), &cfg)
            .await
            .unwrap();
        assert_eq!(result.intent, Intent::Educational);
        assert_eq!(result.intent_confidence, 90.0);
        // identical mock embeddings on both sides → similarity 1.0
        assert!((result.similarity - 1.0).abs() < 1e-6);
        assert!(result.manipulation_patterns.contains(&"academic_justification".to_string()));
        assert!(!result.from_cache);
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let mock = Arc::new(MockProvider::new(intent_json("clarification", 75.0)));
        let calls_handle = mock.clone();
        let a = analyzer(Some(mock));
        let cfg = ValidationConfig::default();
        let ctx = challenge();

        let first = a.analyze("como testo o consumidor da fila?", &ctx, &cfg).await.unwrap();
        let after_first = calls_handle.calls();
        let second = a.analyze("como testo o consumidor da fila?", &ctx, &cfg).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(calls_handle.calls(), after_first, "warm cache must skip provider calls");
        assert_eq!(first.intent, second.intent);
        assert_eq!(first.similarity, second.similarity);
    }

    #[tokio::test]
    async fn low_context_alignment_surfaces_drift_indicator() {
        let mock = Arc::new(MockProvider::new(intent_json("clarification", 70.0)));
        let cache = Arc::new(MemoryStore::new());
        let a = SemanticAnalyzer::new(Some(mock), cache.clone(), GuardCfg::default());
        let ctx = challenge();

        // Context embedding orthogonal to the mock's fixed prompt
        // embedding, so measured alignment is 0.0.
        let raw = serde_json::to_string(&vec![0.0f32, 1.0, 0.0, 0.0]).unwrap();
        cache.set_with_ttl("ctx:ch-7", raw, Duration::from_secs(60)).await;

        let cfg = ValidationConfig::default();
        let result = a.analyze("qual a previsão do tempo?", &ctx, &cfg).await.unwrap();
        assert!(result.context_alignment < cfg.context_similarity_threshold);
        assert!(result.manipulation_patterns.contains(&"context_drift".to_string()));

        // Aligned prompts never carry the indicator.
        cache.delete("ctx:ch-7").await;
        let aligned = a.analyze("como testo a fila?", &ctx, &cfg).await.unwrap();
        assert!(!aligned.manipulation_patterns.contains(&"context_drift".to_string()));
    }

    #[tokio::test]
    async fn failures_open_breaker_and_short_circuit() {
        // Every call fails; threshold is 3.
        let mock = Arc::new(MockProvider::new("irrelevant").failing(100));
        let calls_handle = mock.clone();
        let a = analyzer(Some(mock));
        let cfg = ValidationConfig::default();
        let ctx = challenge();

        // First analyze issues three failing calls (two embeds + intent);
        // with every probe down the branch reports itself unavailable.
        assert!(a.analyze("primeira tentativa", &ctx, &cfg).await.is_none());
        assert!(a.breaker().is_open());

        let before = calls_handle.calls();
        assert!(a.analyze("segunda tentativa", &ctx, &cfg).await.is_none());
        assert_eq!(calls_handle.calls(), before, "open circuit must not call the provider");
    }

    #[tokio::test]
    async fn prewarm_populates_context_embedding() {
        let mock = Arc::new(MockProvider::new(intent_json("educational", 80.0)));
        let calls_handle = mock.clone();
        let a = analyzer(Some(mock));
        let ctx = challenge();

        assert!(a.prewarm(&ctx).await);
        let after_prewarm = calls_handle.calls();
        assert_eq!(after_prewarm, 1);

        // The context side of the similarity probe is now warm.
        let cfg = ValidationConfig::default();
        a.analyze("como funciona a fila?", &ctx, &cfg).await.unwrap();
        // prompt embed + intent, but no second context embed
        assert_eq!(calls_handle.calls(), after_prewarm + 2);
    }
}
