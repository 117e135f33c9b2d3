//! Lexical relevance scoring.
//!
//! Compares prompt keywords against the challenge's declared
//! vocabulary using normalized edit-distance similarity. The score is
//! matched-token-count over min(|tokens|, |vocabulary|), which
//! penalizes both vocabulary-stuffed short prompts and prompts that
//! ignore the vocabulary entirely.

use crate::config::ValidationConfig;
use crate::types::{ChallengeContext, ValidationStepResult};

/// Risk contribution when the prompt falls below the off-topic threshold.
pub const OFF_TOPIC_PENALTY: f64 = 25.0;

/// Similarity above which a prompt token counts as a vocabulary match.
const MATCH_THRESHOLD: f64 = 0.8;

/// Portuguese and English stop words dropped during tokenization.
const STOP_WORDS: &[&str] = &[
    "a", "o", "as", "os", "um", "uma", "uns", "umas", "de", "do", "da", "dos", "das", "em", "no",
    "na", "nos", "nas", "por", "para", "com", "sem", "sob", "que", "qual", "quais", "se", "e",
    "ou", "mas", "como", "quando", "onde", "esse", "essa", "isso", "este", "esta", "isto",
    "nesse", "nessa", "neste", "nesta", "ele", "ela", "eles", "elas", "meu", "minha", "seu",
    "sua", "the", "an", "and", "or", "but", "of", "to", "in", "on", "at", "for", "with", "is",
    "are", "was", "this", "that", "these", "those", "how", "what", "why", "when", "where", "can",
    "could", "would", "you", "your", "not", "does",
];

/// Lowercase, split on non-alphanumeric, drop stop words and tokens of
/// two characters or fewer.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2 && !STOP_WORDS.contains(t))
        .map(str::to_owned)
        .collect()
}

/// The challenge's vocabulary: keywords, allowed topics, and tech
/// stack, tokenized and deduplicated.
pub fn vocabulary(ctx: &ChallengeContext) -> Vec<String> {
    let mut vocab: Vec<String> = ctx
        .keywords
        .iter()
        .chain(ctx.allowed_topics.iter())
        .chain(ctx.tech_stack.iter())
        .flat_map(|entry| tokenize(entry))
        .collect();
    vocab.sort();
    vocab.dedup();
    vocab
}

/// Strip Portuguese diacritics so "validacao" and "validação" compare
/// as the same word.
fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        _ => c,
    }
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized edit-distance similarity in [0, 1], accent-insensitive.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().map(fold_accent).collect();
    let b: Vec<char> = b.chars().map(fold_accent).collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// Relevance score in [0, 1]. An empty vocabulary yields 1.0 (nothing
/// to be off-topic about); an empty token list yields 0.0.
pub fn score(prompt_tokens: &[String], vocab: &[String]) -> f64 {
    if vocab.is_empty() {
        return 1.0;
    }
    if prompt_tokens.is_empty() {
        return 0.0;
    }
    let matched = prompt_tokens
        .iter()
        .filter(|token| vocab.iter().any(|v| similarity(token, v) > MATCH_THRESHOLD))
        .count();
    let denom = prompt_tokens.len().min(vocab.len());
    (matched as f64 / denom as f64).min(1.0)
}

/// Run the relevance check as a validation step.
pub fn assess(prompt: &str, ctx: &ChallengeContext, cfg: &ValidationConfig) -> ValidationStepResult {
    let tokens = tokenize(prompt);
    let vocab = vocabulary(ctx);
    let relevance = score(&tokens, &vocab);

    let mut step = if relevance < cfg.off_topic_threshold {
        ValidationStepResult::flagged(
            "relevance",
            OFF_TOPIC_PENALTY,
            format!("prompt appears off-topic for this challenge (relevance {relevance:.2})"),
        )
    } else {
        ValidationStepResult::clean("relevance")
    };
    step.metadata = serde_json::json!({
        "relevance_score": relevance,
        "prompt_tokens": tokens.len(),
        "vocabulary_size": vocab.len(),
    });
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Difficulty;

    fn challenge(keywords: &[&str], topics: &[&str]) -> ChallengeContext {
        ChallengeContext {
            id: "ch-1".into(),
            title: "API de validação".into(),
            category: "backend".into(),
            difficulty: Difficulty::Beginner,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            allowed_topics: topics.iter().map(|s| s.to_string()).collect(),
            forbidden_patterns: vec![],
            tech_stack: vec![],
            learning_objectives: vec![],
        }
    }

    #[test]
    fn tokenize_drops_stop_words_and_short_tokens() {
        let tokens = tokenize("Como funciona a validação de entrada no endpoint?");
        assert_eq!(tokens, vec!["funciona", "validação", "entrada", "endpoint"]);
    }

    #[test]
    fn exact_vocabulary_match_counts() {
        assert!(similarity("validação", "validação") > 0.99);
        assert!(similarity("endpoint", "futebol") < 0.5);
    }

    #[test]
    fn near_match_above_threshold() {
        // Accents fold away entirely; a real typo still costs.
        assert!(similarity("validacao", "validação") > 0.99);
        assert!(similarity("validaçao", "validação") > 0.99);
        assert!(similarity("validaço", "validação") > 0.8);
    }

    #[test]
    fn unaccented_typing_matches_accented_vocabulary() {
        let ctx = challenge(&["validação", "api"], &[]);
        let cfg = ValidationConfig::default();
        let step = assess("como funciona a validacao da api?", &ctx, &cfg);
        assert!(step.passed);
        assert_eq!(step.risk, 0.0);
    }

    #[test]
    fn on_topic_prompt_scores_above_threshold() {
        let ctx = challenge(&["validação", "api"], &["entrada de dados"]);
        let cfg = ValidationConfig::default();
        let step = assess("Como funciona a validação de entrada nesse endpoint?", &ctx, &cfg);
        assert!(step.passed);
        assert_eq!(step.risk, 0.0);
    }

    #[test]
    fn off_topic_prompt_penalized() {
        let ctx = challenge(&["validação", "api"], &[]);
        let cfg = ValidationConfig::default();
        let step = assess("me dá a solução completa do desafio", &ctx, &cfg);
        assert!(!step.passed);
        assert_eq!(step.risk, OFF_TOPIC_PENALTY);
        assert!(step.reason.as_deref().unwrap_or("").contains("off-topic"));
    }

    #[test]
    fn empty_vocabulary_never_penalizes() {
        let ctx = challenge(&[], &[]);
        let cfg = ValidationConfig::default();
        let step = assess("qualquer coisa totalmente aleatória", &ctx, &cfg);
        assert!(step.passed);
    }

    #[test]
    fn ratio_uses_smaller_denominator() {
        // Two matched tokens over min(4 tokens, 2 vocab) = 2 → 1.0.
        let tokens = tokenize("validação api resposta aleatória");
        let vocab = vec!["validação".to_string(), "api".to_string()];
        assert_eq!(score(&tokens, &vocab), 1.0);
    }
}
