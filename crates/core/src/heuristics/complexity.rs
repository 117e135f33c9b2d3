//! Prompt complexity consistency check.
//!
//! Compares an expected-complexity value derived from user level and
//! challenge difficulty against the prompt's actual verbosity and
//! structure. Catches prompts inconsistent with the requester's stated
//! skill level, e.g. a beginner submitting unnaturally terse
//! expert-sounding text lifted from elsewhere.

use crate::config::ValidationConfig;
use crate::types::{Difficulty, ValidationStepResult};

/// Risk contribution for an expected/actual mismatch.
pub const MISMATCH_PENALTY: f64 = 15.0;

/// Base tolerance in complexity points before the penalty applies.
const MISMATCH_TOLERANCE: f64 = 2.0;

/// Per-level increment on top of the difficulty tier base.
const LEVEL_MULTIPLIER: f64 = 0.3;

/// Sentences longer than this on average bump the actual band.
const LONG_SENTENCE_WORDS: f64 = 20.0;

/// Expected complexity on a 1–10 scale.
pub fn expected(difficulty: Difficulty, user_level: u8) -> f64 {
    (difficulty.base_complexity() + user_level as f64 * LEVEL_MULTIPLIER).clamp(1.0, 10.0)
}

/// Actual complexity on a 1–10 scale, banded from word count and
/// average words per sentence.
pub fn actual(prompt: &str) -> f64 {
    let word_count = prompt.split_whitespace().count();
    let sentences = prompt
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    let avg_words = word_count as f64 / sentences as f64;

    let mut band: f64 = match word_count {
        0..=5 => 1.0,
        6..=15 => 3.0,
        16..=40 => 5.0,
        41..=80 => 7.0,
        _ => 9.0,
    };
    if avg_words > LONG_SENTENCE_WORDS {
        band += 1.0;
    }
    band.min(10.0)
}

/// Run the complexity check as a validation step.
pub fn assess(
    prompt: &str,
    difficulty: Difficulty,
    user_level: u8,
    cfg: &ValidationConfig,
) -> ValidationStepResult {
    let expected = expected(difficulty, user_level);
    let actual = actual(prompt);
    let gap = (expected - actual).abs();
    let tolerance = MISMATCH_TOLERANCE.max(expected * cfg.allowed_deviation);

    let mut step = if gap > tolerance {
        ValidationStepResult::flagged(
            "complexity",
            MISMATCH_PENALTY,
            format!(
                "prompt complexity {actual:.0} is inconsistent with expected {expected:.1} \
                 for this level and difficulty"
            ),
        )
    } else {
        ValidationStepResult::clean("complexity")
    };
    step.metadata = serde_json::json!({
        "expected": expected,
        "actual": actual,
        "tolerance": tolerance,
    });
    step
}
