//! Local manipulation-pattern scorer.
//!
//! Ten named social-engineering phrasings scored over the raw prompt,
//! with a combination bonus when two or more co-occur and a compound
//! bonus for polite phrasing paired with a solution request. No I/O,
//! no state — this probe works even while the circuit is open.

use regex::Regex;

use crate::config::ValidationConfig;

struct NamedPattern {
    name: &'static str,
    regex: Regex,
    weight: f64,
}

/// Score produced by the manipulation probe.
#[derive(Debug, Clone, Default)]
pub struct ManipulationAssessment {
    /// 0–100, clamped.
    pub score: f64,
    /// Names of the matched patterns.
    pub patterns: Vec<String>,
}

pub struct ManipulationScorer {
    patterns: Vec<NamedPattern>,
    polite: Regex,
    solution_request: Regex,
}

impl ManipulationScorer {
    pub fn new() -> Self {
        let table: &[(&str, &str, f64)] = &[
            (
                "authority_appeal",
                r"sou (o |a )?(professor|instrutor|monitor|administrador)|meu professor (mandou|pediu|autorizou)|i am (the|your) (professor|instructor|admin)",
                20.0,
            ),
            (
                "urgency_pressure",
                r"[ée] urgente|preciso (disso )?(agora|j[áa]|para hoje)|o prazo (acaba|termina) hoje|\burgent\b|right now|\bdeadline\b",
                15.0,
            ),
            (
                "emotional_appeal",
                r"estou desesperad[oa]|vou reprovar|vou perder (a vaga|o emprego)|te imploro|i('m| am) desperate|i('ll| will) fail",
                15.0,
            ),
            (
                "hypothetical_framing",
                r"hipoteticamente|suponha que|imagine que|num cen[áa]rio hipot[ée]tico|hypothetically|in theory|suppose that",
                15.0,
            ),
            (
                "academic_justification",
                r"para fins (acad[êe]micos|educacionais|did[áa]ticos|de estudo|de pesquisa)|for (academic|educational|research) purposes",
                20.0,
            ),
            (
                "roleplay_coercion",
                r"finja que|faz de conta que|aja como se|voc[êe] agora [ée]|pretend (to be|you are)|\broleplay\b",
                20.0,
            ),
            (
                "incremental_extraction",
                r"s[óo] (a|o) (primeir[ao]|pr[óo]xim[ao]) (linha|parte|passo)|apenas o pr[óo]ximo passo|just the (next|first) (line|step|part)",
                15.0,
            ),
            (
                "false_premise",
                r"voc[êe] (j[áa] )?disse que (podia|poderia|ia)|como (voc[êe] )?combinou|you (already )?said (you could|it was (ok|fine))",
                15.0,
            ),
            (
                "flattery_priming",
                r"voc[êe] [ée] (o melhor|incr[íi]vel|muito inteligente|genial)|you('re| are) (the best|so smart|amazing|brilliant)",
                10.0,
            ),
            (
                "semantic_bypass",
                r"elabor\w+ em detalhe|detalh(e|ar) (a|toda a) implementa[çc][ãa]o|explique passo a passo como implementar|describe in detail how to (implement|build)|elaborate in (full )?detail",
                20.0,
            ),
        ];
        let patterns = table
            .iter()
            .map(|(name, pattern, weight)| NamedPattern {
                name,
                regex: Regex::new(pattern).expect("builtin manipulation pattern"),
                weight: *weight,
            })
            .collect();
        Self {
            patterns,
            polite: Regex::new(r"por favor|por gentileza|poderia|\bplease\b|could you|would you mind")
                .expect("builtin polite pattern"),
            solution_request: Regex::new(
                r"solu[çc][ãa]o|c[óo]digo (completo|pronto)|resposta (completa|final)|implementa[çc][ãa]o completa|full solution|complete code|the answer",
            )
            .expect("builtin solution-request pattern"),
        }
    }

    /// Score `text` (matched case-insensitively via lowercasing).
    /// Bonuses come from the request's configuration so they can be
    /// recalibrated without code changes.
    pub fn score(&self, text: &str, cfg: &ValidationConfig) -> ManipulationAssessment {
        let lower = text.to_lowercase();
        let mut assessment = ManipulationAssessment::default();

        for pattern in &self.patterns {
            if pattern.regex.is_match(&lower) {
                assessment.patterns.push(pattern.name.to_string());
                assessment.score += pattern.weight;
            }
        }

        if assessment.patterns.len() >= 2 {
            assessment.score += cfg.manipulation_combination_bonus;
        }
        if self.polite.is_match(&lower) && self.solution_request.is_match(&lower) {
            assessment.score += cfg.manipulation_compound_bonus;
            assessment.patterns.push("polite_solution_request".to_string());
        }

        assessment.score = assessment.score.clamp(0.0, 100.0);
        assessment
    }
}

impl Default for ManipulationScorer {
    fn default() -> Self {
        Self::new()
    }
}
