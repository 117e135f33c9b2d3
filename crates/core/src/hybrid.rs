//! Hybrid combiner — decides when a heuristic verdict is ambiguous
//! enough to pay for semantic analysis, and merges the two signals
//! into the final score.
//!
//! The heuristic score and confidence are preserved untouched in the
//! output; the hybrid score lives in its own field so metrics can
//! distinguish what the rules said from what the pipeline concluded.

use crate::config::ValidationConfig;
use crate::types::{
    Action, EnhancedValidationResult, Intent, PromptValidationResult, RiskClass,
    SemanticAnalysisResult,
};

/// Confidence below which the heuristic verdict alone is not trusted.
const LOW_CONFIDENCE: f64 = 60.0;

/// Penalty scale applied when context alignment falls below the
/// semantic similarity threshold.
const ALIGNMENT_PENALTY_SCALE: f64 = 30.0;

/// Pattern names that force escalation regardless of score: soft
/// framings that heuristics deliberately under-weigh.
const ESCALATION_MARKERS: &[&str] = &["academic_framing", "elaboration_request"];

/// True when semantic analysis is warranted: borderline score
/// (bounds inclusive), a soft-framing pattern, or low confidence.
pub fn should_escalate(heuristic: &PromptValidationResult, cfg: &ValidationConfig) -> bool {
    if !cfg.semantic_enabled {
        return false;
    }
    let score = heuristic.risk_score;
    if score >= cfg.borderline_lower && score <= cfg.borderline_upper {
        return true;
    }
    if heuristic
        .metadata
        .detected_patterns
        .iter()
        .any(|p| ESCALATION_MARKERS.contains(&p.as_str()))
    {
        return true;
    }
    heuristic.confidence < LOW_CONFIDENCE
}

/// Merge the semantic result into the heuristic one. A heuristic
/// BLOCKED is terminal; otherwise the hybrid score starts from the
/// heuristic score and is adjusted by intent, manipulation, and
/// context alignment, then reclassified on the fixed thresholds.
pub fn combine(
    heuristic: PromptValidationResult,
    semantic: SemanticAnalysisResult,
    cfg: &ValidationConfig,
) -> EnhancedValidationResult {
    let mut score = heuristic.risk_score;
    let mut patterns = heuristic.metadata.detected_patterns.clone();
    let mut indicators = Vec::new();

    let adjustment = cfg.intent_adjustments.for_intent(semantic.intent);
    score += adjustment;
    if adjustment != 0.0 {
        tracing::debug!(intent = semantic.intent.as_str(), adjustment, "intent adjustment");
    }

    if semantic.manipulation_score > cfg.manipulation_weight_threshold {
        score += semantic.manipulation_score / 2.0;
        for pattern in &semantic.manipulation_patterns {
            indicators.push(pattern.clone());
            if !patterns.contains(pattern) {
                patterns.push(pattern.clone());
            }
        }
    }

    if semantic.context_alignment < cfg.semantic_similarity_threshold {
        score += (1.0 - semantic.context_alignment) * ALIGNMENT_PENALTY_SCALE;
    }

    let hybrid_score = score.clamp(0.0, 100.0);

    let forced_block = semantic.intent == Intent::Manipulation
        && semantic.intent_confidence > cfg.manipulation_block_confidence;
    let classification = if heuristic.classification == RiskClass::Blocked || forced_block {
        RiskClass::Blocked
    } else {
        RiskClass::from_score(hybrid_score)
    };
    let action = Action::for_class(classification, cfg.strict_mode);

    EnhancedValidationResult {
        heuristic,
        semantic: Some(semantic),
        hybrid_score,
        classification,
        action,
        detected_patterns: patterns,
        manipulation_indicators: indicators,
        elapsed_ms: 0,
    }
}

/// Heuristic-only result lifted into the enhanced shape, used when
/// escalation is skipped or the semantic branch is unavailable.
pub fn heuristic_only(heuristic: PromptValidationResult, cfg: &ValidationConfig) -> EnhancedValidationResult {
    let classification = heuristic.classification;
    let action = Action::for_class(classification, cfg.strict_mode);
    let patterns = heuristic.metadata.detected_patterns.clone();
    EnhancedValidationResult {
        hybrid_score: heuristic.risk_score,
        classification,
        action,
        detected_patterns: patterns,
        manipulation_indicators: Vec::new(),
        semantic: None,
        heuristic,
        elapsed_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValidationMetadata;

    fn heuristic(score: f64, confidence: f64) -> PromptValidationResult {
        let classification = RiskClass::from_score(score);
        PromptValidationResult {
            risk_score: score,
            classification,
            action: Action::for_class(classification, false),
            confidence,
            reasons: Vec::new(),
            metadata: ValidationMetadata::new(),
        }
    }

    fn semantic(intent: Intent, intent_confidence: f64) -> SemanticAnalysisResult {
        SemanticAnalysisResult {
            similarity: 0.8,
            embedding: Vec::new(),
            intent,
            intent_confidence,
            manipulation_score: 0.0,
            manipulation_patterns: Vec::new(),
            context_alignment: 0.8,
            from_cache: false,
        }
    }

    #[test]
    fn escalates_at_lower_bound_not_below() {
        let cfg = ValidationConfig::default();
        assert!(should_escalate(&heuristic(30.0, 85.0), &cfg));
        assert!(!should_escalate(&heuristic(29.0, 85.0), &cfg));
    }

    #[test]
    fn escalates_at_upper_bound_not_above() {
        let cfg = ValidationConfig::default();
        assert!(should_escalate(&heuristic(70.0, 85.0), &cfg));
        assert!(!should_escalate(&heuristic(71.0, 85.0), &cfg));
    }

    #[test]
    fn low_confidence_escalates_outside_band() {
        let cfg = ValidationConfig::default();
        assert!(should_escalate(&heuristic(10.0, 55.0), &cfg));
    }

    #[test]
    fn soft_framing_pattern_escalates_outside_band() {
        let cfg = ValidationConfig::default();
        let mut h = heuristic(20.0, 85.0);
        h.metadata.detected_patterns.push("academic_framing".into());
        assert!(should_escalate(&h, &cfg));
    }

    #[test]
    fn disabled_semantic_never_escalates() {
        let cfg = ValidationConfig { semantic_enabled: false, ..Default::default() };
        assert!(!should_escalate(&heuristic(50.0, 40.0), &cfg));
    }

    #[test]
    fn educational_intent_lowers_score() {
        let cfg = ValidationConfig::default();
        let out = combine(heuristic(55.0, 80.0), semantic(Intent::Educational, 90.0), &cfg);
        assert_eq!(out.hybrid_score, 35.0);
        assert_eq!(out.classification, RiskClass::Safe);
        assert_eq!(out.heuristic.risk_score, 55.0, "heuristic score must be preserved");
    }

    #[test]
    fn manipulation_score_adds_half_when_above_threshold() {
        let cfg = ValidationConfig::default();
        let mut sem = semantic(Intent::Unclear, 50.0);
        sem.manipulation_score = 55.0;
        sem.manipulation_patterns = vec!["academic_justification".into(), "semantic_bypass".into()];
        let out = combine(heuristic(55.0, 70.0), sem, &cfg);
        assert_eq!(out.hybrid_score, 82.5);
        assert_eq!(out.classification, RiskClass::Blocked);
        assert_eq!(out.manipulation_indicators.len(), 2);
        assert!(out.detected_patterns.contains(&"semantic_bypass".to_string()));
    }

    #[test]
    fn manipulation_score_at_threshold_is_ignored() {
        let cfg = ValidationConfig::default();
        let mut sem = semantic(Intent::Unclear, 50.0);
        sem.manipulation_score = 30.0;
        sem.manipulation_patterns = vec!["flattery_priming".into()];
        let out = combine(heuristic(40.0, 70.0), sem, &cfg);
        assert_eq!(out.hybrid_score, 40.0);
        assert!(out.manipulation_indicators.is_empty());
    }

    #[test]
    fn poor_alignment_adds_shortfall_penalty() {
        let cfg = ValidationConfig::default();
        let mut sem = semantic(Intent::Unclear, 50.0);
        sem.context_alignment = 0.2;
        sem.similarity = 0.2;
        let out = combine(heuristic(40.0, 70.0), sem, &cfg);
        // 40 + (1 - 0.2) * 30 = 64
        assert_eq!(out.hybrid_score, 64.0);
        assert_eq!(out.classification, RiskClass::Warning);
    }

    #[test]
    fn confident_manipulation_intent_forces_block() {
        let cfg = ValidationConfig::default();
        let out = combine(heuristic(35.0, 70.0), semantic(Intent::Manipulation, 90.0), &cfg);
        // 35 + 50 = 85 would block numerically anyway; force a case
        // where the number alone would not.
        let low = combine(heuristic(5.0, 70.0), semantic(Intent::Manipulation, 90.0), &cfg);
        assert_eq!(out.classification, RiskClass::Blocked);
        assert_eq!(low.classification, RiskClass::Blocked);
        assert_eq!(low.action, Action::Block);
    }

    #[test]
    fn heuristic_block_is_terminal() {
        let cfg = ValidationConfig::default();
        let out = combine(heuristic(85.0, 90.0), semantic(Intent::Educational, 95.0), &cfg);
        // adjustment pulls the number down but the class stays put
        assert_eq!(out.hybrid_score, 65.0);
        assert_eq!(out.classification, RiskClass::Blocked);
    }

    #[test]
    fn strict_mode_maps_warning_to_review() {
        let cfg = ValidationConfig { strict_mode: true, ..Default::default() };
        let out = combine(heuristic(40.0, 70.0), semantic(Intent::OffTopic, 80.0), &cfg);
        assert_eq!(out.classification, RiskClass::Warning);
        assert_eq!(out.action, Action::Review);
    }

    #[test]
    fn heuristic_only_mirrors_heuristic_verdict() {
        let cfg = ValidationConfig::default();
        let out = heuristic_only(heuristic(42.0, 85.0), &cfg);
        assert_eq!(out.hybrid_score, 42.0);
        assert!(out.semantic.is_none());
        assert_eq!(out.classification, RiskClass::Safe);
    }
}
