//! Deterministic lexical rules for clear-cut Dutch agreement / disagreement.
//!
//! Disagreement patterns are checked first, so "niet eens" never reads as "eens".
//! Matching is done on the lower-cased, whitespace-collapsed reaction.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ClassProbabilities, StanceModel, TextPair};
use crate::stance::Stance;

/// Confidence reported for a rule hit.
pub const RULE_CONFIDENCE: f64 = 0.95;

/// Neutral mass returned by the rule model when nothing fires.
pub const NO_RULE_NEUTRAL: f64 = 0.5;

static DISAGREE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\b(ik\s+ben\s+het\s+niet\s+eens|niet\s+eens)\b",
        r"\b(oneens|on\s*eens)\b",
        r"\b(helemaal\s+niet|absoluut\s+niet)\b",
        r"\b(nee,?\s*(dit|dat)?)\b",
        r"\btegen\s+deze?\s+stelling\b",
    ])
});

static AGREE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\b(ik\s+ben\s+het\s+(helemaal\s+)?eens|eens)\b",
        r"\b(ja,?\s*(dit|dat)?)\b",
        r"\b(helemaal\s+mee\s+eens|volledig\s+eens)\b",
        r"\bvoor\s+deze?\s+stelling\b",
        r"\b(volledig|helemaal)\s+voor\b",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("stance rule regex"))
        .collect()
}

/// Built-in Dutch rule set.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalRules;

impl LexicalRules {
    pub fn new() -> Self {
        Self
    }

    /// Stance if any rule fires, else `None` (ambiguous → defer to the model).
    pub fn match_reaction(&self, reaction: &str) -> Option<Stance> {
        let text = normalize(reaction);
        if text.is_empty() {
            return None;
        }
        if DISAGREE.iter().any(|re| re.is_match(&text)) {
            return Some(Stance::Disagree);
        }
        if AGREE.iter().any(|re| re.is_match(&text)) {
            return Some(Stance::Agree);
        }
        None
    }
}

/// The rule set behind the uniform model interface: a rule hit yields a
/// peaked distribution, no hit reads as neutral.
#[async_trait]
impl StanceModel for LexicalRules {
    async fn classify(&self, pair: &TextPair<'_>) -> Result<ClassProbabilities> {
        Ok(match self.match_reaction(pair.reaction) {
            Some(s) => ClassProbabilities::peaked(s, RULE_CONFIDENCE),
            None => ClassProbabilities::peaked(Stance::Neutral, NO_RULE_NEUTRAL),
        })
    }

    fn name(&self) -> &'static str {
        "lexical-rules"
    }
}

fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim().to_string()
}
