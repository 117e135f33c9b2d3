//! Rule tables and the stateless pattern matcher.
//!
//! Rules are versioned `{family, name, pattern, weight, action}`
//! records compiled into a `RuleSet`. The builtin table covers the
//! four families in Portuguese and English; per-challenge custom
//! rules are compiled into a replacement set at update time, so rule
//! changes never require a redeploy. A malformed pattern is logged
//! and skipped — it can never fail a check.

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

/// The four pattern families the matcher evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternFamily {
    SolutionSeeking,
    SocialEngineering,
    OffTopic,
    Forbidden,
}

impl PatternFamily {
    pub const ALL: [PatternFamily; 4] = [
        Self::SolutionSeeking,
        Self::SocialEngineering,
        Self::OffTopic,
        Self::Forbidden,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SolutionSeeking => "solution_seeking",
            Self::SocialEngineering => "social_engineering",
            Self::OffTopic => "off_topic",
            Self::Forbidden => "forbidden",
        }
    }
}

/// What a matched rule asks the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Flag,
    Block,
}

/// One rule-table row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub family: PatternFamily,
    pub name: String,
    /// Regular-expression literal, matched against lowercased text.
    pub pattern: String,
    /// Risk contribution if matched, 0–100.
    pub weight: f64,
    pub action: RuleAction,
}

impl PatternRule {
    pub fn new(
        family: PatternFamily,
        name: impl Into<String>,
        pattern: impl Into<String>,
        weight: f64,
        action: RuleAction,
    ) -> Self {
        Self { family, name: name.into(), pattern: pattern.into(), weight, action }
    }
}

/// Match outcome for one family.
#[derive(Debug, Clone, Default)]
pub struct FamilyMatch {
    pub detected: bool,
    /// Names of the matched rules.
    pub patterns: Vec<String>,
    /// Highest weight among matched rules (rules within a family
    /// overlap heavily, so they do not sum).
    pub risk: f64,
    /// True if any matched rule carries a Block action.
    pub block: bool,
}

struct CompiledFamily {
    set: RegexSet,
    rules: Vec<PatternRule>,
}

impl CompiledFamily {
    fn compile(rules: Vec<PatternRule>) -> Self {
        let mut kept = Vec::with_capacity(rules.len());
        let mut sources = Vec::with_capacity(rules.len());
        for rule in rules {
            match Regex::new(&rule.pattern) {
                Ok(_) => {
                    sources.push(rule.pattern.clone());
                    kept.push(rule);
                }
                Err(err) => {
                    tracing::warn!(
                        family = rule.family.as_str(),
                        rule = %rule.name,
                        error = %err,
                        "skipping malformed pattern rule"
                    );
                }
            }
        }
        // Sources already validated individually, so the set compiles.
        let set = RegexSet::new(&sources).unwrap_or_else(|_| RegexSet::empty());
        Self { set, rules: kept }
    }

    fn matches(&self, text_lower: &str) -> FamilyMatch {
        let mut m = FamilyMatch::default();
        for idx in self.set.matches(text_lower) {
            let rule = &self.rules[idx];
            m.detected = true;
            m.patterns.push(rule.name.clone());
            m.risk = m.risk.max(rule.weight);
            m.block = m.block || rule.action == RuleAction::Block;
        }
        m
    }
}

/// A compiled, versioned rule table.
pub struct RuleSet {
    version: u32,
    solution: CompiledFamily,
    social: CompiledFamily,
    off_topic: CompiledFamily,
    forbidden: CompiledFamily,
}

impl RuleSet {
    /// The builtin rule table.
    pub fn builtin() -> Self {
        Self::compile(1, builtin_rules())
    }

    /// Compile a rule table, skipping malformed patterns.
    pub fn compile(version: u32, rules: Vec<PatternRule>) -> Self {
        let mut by_family: [Vec<PatternRule>; 4] = Default::default();
        for rule in rules {
            let slot = match rule.family {
                PatternFamily::SolutionSeeking => 0,
                PatternFamily::SocialEngineering => 1,
                PatternFamily::OffTopic => 2,
                PatternFamily::Forbidden => 3,
            };
            by_family[slot].push(rule);
        }
        let [solution, social, off_topic, forbidden] = by_family;
        Self {
            version,
            solution: CompiledFamily::compile(solution),
            social: CompiledFamily::compile(social),
            off_topic: CompiledFamily::compile(off_topic),
            forbidden: CompiledFamily::compile(forbidden),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Pure match over one family. `text_lower` must already be lowercased.
    pub fn match_family(&self, family: PatternFamily, text_lower: &str) -> FamilyMatch {
        match family {
            PatternFamily::SolutionSeeking => self.solution.matches(text_lower),
            PatternFamily::SocialEngineering => self.social.matches(text_lower),
            PatternFamily::OffTopic => self.off_topic.matches(text_lower),
            PatternFamily::Forbidden => self.forbidden.matches(text_lower),
        }
    }

    /// Forbidden-family match including a challenge's own pattern
    /// literals, compiled on the fly. Malformed entries are skipped.
    pub fn match_forbidden(&self, text_lower: &str, extra_patterns: &[String]) -> FamilyMatch {
        let mut m = self.forbidden.matches(text_lower);
        for pattern in extra_patterns {
            match Regex::new(pattern) {
                Ok(re) => {
                    if re.is_match(text_lower) {
                        m.detected = true;
                        m.patterns.push(pattern.clone());
                        m.risk = m.risk.max(FORBIDDEN_WEIGHT);
                        m.block = true;
                    }
                }
                Err(err) => {
                    tracing::warn!(pattern = %pattern, error = %err, "skipping malformed challenge pattern");
                }
            }
        }
        m
    }
}

const FORBIDDEN_WEIGHT: f64 = 40.0;

/// Builtin rule table, Portuguese plus English.
pub(crate) fn builtin_rules() -> Vec<PatternRule> {
    use PatternFamily::*;
    use RuleAction::*;
    vec![
        PatternRule::new(
            SolutionSeeking,
            "direct_solution_request",
            r"solu[çc][ãa]o (completa|inteira|pronta)|me d[áêe]? a solu[çc][ãa]o|d[êe][ -]?me a solu[çc][ãa]o|(full|complete|entire) solution|give me the (solution|answer|code)",
            60.0,
            Block,
        ),
        PatternRule::new(
            SolutionSeeking,
            "ready_code_request",
            r"c[óo]digo (completo|pronto|inteiro)|resposta (completa|final|pronta)|complete code|ready[ -]?made code|write the (entire|whole) (code|program)",
            60.0,
            Block,
        ),
        PatternRule::new(
            SolutionSeeking,
            "answer_request",
            r"qual [ée] a resposta|apenas a resposta|s[óo] a resposta|just (give me )?the answer",
            50.0,
            Block,
        ),
        PatternRule::new(
            SocialEngineering,
            "academic_framing",
            r"para fins (acad[êe]micos|educacionais|did[áa]ticos|de estudo)|for (academic|educational|research) purposes",
            30.0,
            Flag,
        ),
        PatternRule::new(
            SocialEngineering,
            "elaboration_request",
            r"elabor\w+ em detalhe|detalhe (a|toda a) implementa[çc][ãa]o|elaborate in (full )?detail|in full detail",
            30.0,
            Flag,
        ),
        PatternRule::new(
            SocialEngineering,
            "authority_claim",
            r"sou (o |a )?(professor|instrutor|monitor|administrador)|i am (the|your) (professor|instructor|admin)",
            35.0,
            Flag,
        ),
        PatternRule::new(
            SocialEngineering,
            "urgency_claim",
            r"[ée] urgente|preciso (disso )?(agora|j[áa]|para hoje)|\burgent\b|\basap\b",
            25.0,
            Flag,
        ),
        PatternRule::new(
            OffTopic,
            "unrelated_topic",
            r"receita de|futebol|hor[óo]scopo|filme|novela|\bpiada\b|\bjoke\b|\blottery\b|\bweather\b",
            20.0,
            Flag,
        ),
        PatternRule::new(
            OffTopic,
            "subject_change",
            r"muda(r|ndo)? de assunto|vamos falar de outra coisa|let'?s talk about something else",
            20.0,
            Flag,
        ),
    ]
}
