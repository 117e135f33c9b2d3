//! Heuristic aggregator: fans the checks out, folds their risk
//! contributions into one clamped score, and derives classification,
//! action, and confidence. An unexpected internal failure never
//! reaches the caller — it degrades to a cautious Warning/Throttle
//! fallback so infrastructure faults mean friction, not an open door
//! or a lock-out.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::config::ValidationConfig;
use crate::heuristics::patterns::{FamilyMatch, PatternFamily, RuleSet};
use crate::heuristics::{complexity, relevance};
use crate::types::{
    Action, PromptValidationResult, RiskClass, ValidationMetadata, ValidationRequest,
    ValidationStepResult, BLOCK_THRESHOLD,
};

/// Risk contribution for an over-length prompt.
const LENGTH_PENALTY: f64 = 10.0;

/// Confidence protocol constants.
const BASE_CONFIDENCE: f64 = 85.0;
const FEW_CHECKS_PENALTY: f64 = 10.0;
const CONSENSUS_BONUS: f64 = 7.0;
const SPLIT_VERDICT_PENALTY: f64 = 12.0;
const FALLBACK_CONFIDENCE: f64 = 30.0;

/// Expected number of checks in a full run.
const FULL_CHECK_COUNT: usize = 6;

/// Run the heuristic phase. Checks execute concurrently; any panic in
/// the phase is caught and converted into the cautious fallback.
pub async fn run(
    request: ValidationRequest,
    rules: Arc<RuleSet>,
    cfg: ValidationConfig,
) -> PromptValidationResult {
    let started = Instant::now();
    let handle = tokio::spawn(async move { run_inner(&request, &rules, &cfg).await });
    match handle.await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(error = %err, "heuristic aggregation failed");
            fallback(started)
        }
    }
}

async fn run_inner(
    request: &ValidationRequest,
    rules: &RuleSet,
    cfg: &ValidationConfig,
) -> PromptValidationResult {
    let started = Instant::now();
    let text_lower = request.prompt.to_lowercase();

    let (length, solution, social, off_topic, forbidden, relevance_step, complexity_step) = tokio::join!(
        async { length_step(&request.prompt, cfg) },
        async {
            family_step(
                rules.match_family(PatternFamily::SolutionSeeking, &text_lower),
                PatternFamily::SolutionSeeking,
                cfg,
            )
        },
        async {
            family_step(
                rules.match_family(PatternFamily::SocialEngineering, &text_lower),
                PatternFamily::SocialEngineering,
                cfg,
            )
        },
        async {
            family_step(
                rules.match_family(PatternFamily::OffTopic, &text_lower),
                PatternFamily::OffTopic,
                cfg,
            )
        },
        async {
            family_step(
                rules.match_forbidden(&text_lower, &request.challenge.forbidden_patterns),
                PatternFamily::Forbidden,
                cfg,
            )
        },
        async { relevance::assess(&request.prompt, &request.challenge, cfg) },
        async {
            complexity::assess(
                &request.prompt,
                request.challenge.difficulty,
                request.user_level,
                cfg,
            )
        },
    );

    let mut steps = vec![solution, social, off_topic, forbidden, relevance_step, complexity_step];
    if let Some(length) = length {
        steps.push(length);
    }

    let relevance_score = steps
        .iter()
        .find(|s| s.step == "relevance")
        .and_then(|s| s.metadata.get("relevance_score"))
        .and_then(|v| v.as_f64());

    let risk_score: f64 = steps.iter().map(|s| s.risk).sum::<f64>().clamp(0.0, 100.0);
    let classification = RiskClass::from_score(risk_score);
    let action = Action::for_class(classification, cfg.strict_mode);

    let reasons: Vec<String> = steps.iter().filter_map(|s| s.reason.clone()).collect();
    let detected_patterns: Vec<String> =
        steps.iter().flat_map(|s| s.patterns.iter().cloned()).collect();

    let checks_run = steps.len();
    let confidence = confidence_for(&steps, checks_run);

    PromptValidationResult {
        risk_score,
        classification,
        action,
        confidence,
        reasons,
        metadata: ValidationMetadata {
            validation_id: Uuid::new_v4(),
            detected_patterns,
            steps,
            relevance_score,
            checks_run,
            elapsed_ms: started.elapsed().as_millis() as u64,
            fallback: false,
        },
    }
}

/// Starts at 85; drops if the run was partial, rises when most checks
/// flag together, drops on a split verdict.
fn confidence_for(steps: &[ValidationStepResult], checks_run: usize) -> f64 {
    let mut confidence = BASE_CONFIDENCE;
    if checks_run < FULL_CHECK_COUNT {
        confidence -= FEW_CHECKS_PENALTY;
    }
    let flagged = steps.iter().filter(|s| !s.passed).count();
    let ratio = if checks_run == 0 { 0.0 } else { flagged as f64 / checks_run as f64 };
    if ratio > 0.7 {
        confidence += CONSENSUS_BONUS;
    } else if ratio > 0.0 {
        confidence -= SPLIT_VERDICT_PENALTY;
    }
    confidence.clamp(0.0, 100.0)
}

fn length_step(prompt: &str, cfg: &ValidationConfig) -> Option<ValidationStepResult> {
    if prompt.chars().count() > cfg.max_prompt_length {
        Some(ValidationStepResult::flagged(
            "length",
            LENGTH_PENALTY,
            format!("prompt exceeds the {} character limit", cfg.max_prompt_length),
        ))
    } else {
        None
    }
}

fn family_step(m: FamilyMatch, family: PatternFamily, cfg: &ValidationConfig) -> ValidationStepResult {
    if !m.detected {
        return ValidationStepResult::clean(family.as_str());
    }
    let mut risk = m.risk;
    if family == PatternFamily::SolutionSeeking && !cfg.block_direct_solutions {
        risk /= 2.0;
    } else if m.block {
        // A Block-action rule decides on its own: floor the step risk
        // so the total crosses the block line no matter what the
        // other checks report for this challenge.
        risk = risk.max(BLOCK_THRESHOLD);
    }
    let reason = match family {
        PatternFamily::SolutionSeeking => "prompt requests a direct solution",
        PatternFamily::SocialEngineering => "prompt uses social-engineering framing",
        PatternFamily::OffTopic => "prompt drifts to an unrelated topic",
        PatternFamily::Forbidden => "prompt matches a forbidden pattern for this challenge",
    };
    ValidationStepResult::flagged(family.as_str(), risk, reason).with_patterns(m.patterns)
}

/// Cautious fallback for internal failures: mid-band risk, throttle,
/// reduced confidence.
fn fallback(started: Instant) -> PromptValidationResult {
    PromptValidationResult {
        risk_score: 50.0,
        classification: RiskClass::Warning,
        action: Action::Throttle,
        confidence: FALLBACK_CONFIDENCE,
        reasons: vec!["analysis failed; applying cautious default".into()],
        metadata: ValidationMetadata {
            validation_id: Uuid::new_v4(),
            detected_patterns: vec![],
            steps: vec![],
            relevance_score: None,
            checks_run: 0,
            elapsed_ms: started.elapsed().as_millis() as u64,
            fallback: true,
        },
    }
}
