use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ValidationConfig;

/// Risk score threshold at or above which a prompt is blocked.
pub const BLOCK_THRESHOLD: f64 = 80.0;
/// Risk score threshold at or above which a prompt is flagged.
pub const WARN_THRESHOLD: f64 = 50.0;

/// Challenge difficulty tier, as declared by the challenge catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Expert => "expert",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "intermediate" => Self::Intermediate,
            "advanced" => Self::Advanced,
            "expert" => Self::Expert,
            _ => Self::Beginner,
        }
    }

    /// Base expected-complexity value for this tier (1–10 scale).
    pub fn base_complexity(&self) -> f64 {
        match self {
            Self::Beginner => 2.0,
            Self::Intermediate => 4.0,
            Self::Advanced => 6.0,
            Self::Expert => 8.0,
        }
    }
}

/// Read-only challenge snapshot supplied by the challenge catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeContext {
    pub id: String,
    pub title: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub keywords: Vec<String>,
    pub allowed_topics: Vec<String>,
    /// Regular-expression literals; malformed entries are skipped at compile time.
    pub forbidden_patterns: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
}

impl ChallengeContext {
    /// Reference text used to build the challenge's context embedding.
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![self.title.clone(), self.category.clone()];
        parts.extend(self.keywords.iter().cloned());
        parts.extend(self.allowed_topics.iter().cloned());
        parts.extend(self.learning_objectives.iter().cloned());
        parts.join(" ")
    }
}

/// Immutable validation input. Passed by value through the pipeline.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub prompt: String,
    pub challenge: ChallengeContext,
    /// Requesting user's proficiency level (1-based).
    pub user_level: u8,
    pub config: Option<ValidationConfig>,
}

/// Risk classification — a pure function of the (adjusted) score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Safe,
    Warning,
    Blocked,
}

impl RiskClass {
    /// Blocked at >= 80, Warning at >= 50, Safe otherwise.
    pub fn from_score(score: f64) -> Self {
        if score >= BLOCK_THRESHOLD {
            Self::Blocked
        } else if score >= WARN_THRESHOLD {
            Self::Warning
        } else {
            Self::Safe
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Warning => "warning",
            Self::Blocked => "blocked",
        }
    }
}

/// Suggested action for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    Throttle,
    Block,
    Review,
}

impl Action {
    /// Derive the action from a classification. In strict mode a
    /// Warning routes to human review instead of throttling.
    pub fn for_class(class: RiskClass, strict: bool) -> Self {
        match class {
            RiskClass::Safe => Self::Allow,
            RiskClass::Warning if strict => Self::Review,
            RiskClass::Warning => Self::Throttle,
            RiskClass::Blocked => Self::Block,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Throttle => "throttle",
            Self::Block => "block",
            Self::Review => "review",
        }
    }
}

/// One heuristic check's outcome. Created fresh per request, never
/// persisted individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationStepResult {
    pub step: String,
    pub passed: bool,
    /// Risk contribution, 0–100.
    pub risk: f64,
    pub reason: Option<String>,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ValidationStepResult {
    pub fn clean(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            passed: true,
            risk: 0.0,
            reason: None,
            patterns: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn flagged(step: impl Into<String>, risk: f64, reason: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            passed: false,
            risk,
            reason: Some(reason.into()),
            patterns: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_patterns(mut self, patterns: Vec<String>) -> Self {
        self.patterns = patterns;
        self
    }
}

/// Per-validation metadata bag attached to the heuristic result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationMetadata {
    pub validation_id: Uuid,
    pub detected_patterns: Vec<String>,
    pub steps: Vec<ValidationStepResult>,
    /// Lexical relevance of the prompt to the challenge vocabulary (0–1).
    pub relevance_score: Option<f64>,
    pub checks_run: usize,
    pub elapsed_ms: u64,
    /// True when the aggregator hit an internal failure and returned
    /// the cautious fallback.
    pub fallback: bool,
}

impl ValidationMetadata {
    pub fn new() -> Self {
        Self {
            validation_id: Uuid::new_v4(),
            detected_patterns: Vec::new(),
            steps: Vec::new(),
            relevance_score: None,
            checks_run: 0,
            elapsed_ms: 0,
            fallback: false,
        }
    }
}

impl Default for ValidationMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Heuristic-only validation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptValidationResult {
    /// Clamped to [0, 100].
    pub risk_score: f64,
    pub classification: RiskClass,
    pub action: Action,
    /// 0–100.
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub metadata: ValidationMetadata,
}

/// Intent label for a prompt, one of eight fixed categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Educational,
    Clarification,
    Debugging,
    Unclear,
    OffTopic,
    SolutionSeeking,
    Gaming,
    Manipulation,
}

impl Intent {
    pub const ALL: [Intent; 8] = [
        Self::Educational,
        Self::Clarification,
        Self::Debugging,
        Self::Unclear,
        Self::OffTopic,
        Self::SolutionSeeking,
        Self::Gaming,
        Self::Manipulation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Educational => "educational",
            Self::Clarification => "clarification",
            Self::Debugging => "debugging",
            Self::Unclear => "unclear",
            Self::OffTopic => "off_topic",
            Self::SolutionSeeking => "solution_seeking",
            Self::Gaming => "gaming",
            Self::Manipulation => "manipulation",
        }
    }

    /// Tolerant parse — unrecognized labels map to Unclear.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "educational" => Self::Educational,
            "clarification" => Self::Clarification,
            "debugging" => Self::Debugging,
            "off_topic" | "off-topic" => Self::OffTopic,
            "solution_seeking" | "solution-seeking" => Self::SolutionSeeking,
            "gaming" => Self::Gaming,
            "manipulation" => Self::Manipulation,
            _ => Self::Unclear,
        }
    }
}

/// Output of the semantic analysis probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticAnalysisResult {
    /// Cosine similarity between prompt and challenge embeddings (0–1).
    pub similarity: f64,
    pub embedding: Vec<f32>,
    pub intent: Intent,
    /// 0–100.
    pub intent_confidence: f64,
    /// 0–100, from the local manipulation-pattern scorer.
    pub manipulation_score: f64,
    pub manipulation_patterns: Vec<String>,
    /// Alias of similarity in the current probe set; kept separate so a
    /// richer alignment signal can replace it without a type change.
    pub context_alignment: f64,
    /// True when any cache layer served this result.
    pub from_cache: bool,
}

/// Final pipeline verdict returned to the caller. The heuristic result
/// is preserved verbatim; the hybrid score and final classification
/// carry the blended conclusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedValidationResult {
    pub heuristic: PromptValidationResult,
    /// Present only when semantic analysis ran.
    pub semantic: Option<SemanticAnalysisResult>,
    /// Blended risk score, clamped to [0, 100].
    pub hybrid_score: f64,
    pub classification: RiskClass,
    pub action: Action,
    /// Union of heuristic and manipulation pattern names.
    pub detected_patterns: Vec<String>,
    pub manipulation_indicators: Vec<String>,
    pub elapsed_ms: u64,
}

/// Lightweight prompt summary for UI hints — no scoring, no network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptAnalysis {
    pub intent_hint: Intent,
    pub intent_confidence: f64,
    pub topics: Vec<String>,
    /// Banded 1–10 verbosity/structure estimate.
    pub complexity: f64,
    pub word_count: usize,
}

/// Liveness signal for the semantic branch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GuardHealth {
    pub semantic_available: bool,
    pub circuit_open: bool,
    pub recent_failures: u32,
    pub provider_configured: bool,
}

/// Aggregated validation metrics over a day range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub total: u64,
    pub safe: u64,
    pub warning: u64,
    pub blocked: u64,
    pub semantic_applied: u64,
    pub slow_count: u64,
    pub avg_risk: f64,
    pub avg_confidence: f64,
    pub avg_latency_ms: f64,
    pub top_blocked_patterns: Vec<(String, u64)>,
    pub risk_bands: RiskBands,
}

/// Distribution of final scores across the three classification bands.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskBands {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}
