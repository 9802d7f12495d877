//! Stance classifier: (statement, reaction) → (stance, confidence).
//!
//! Order:
//! 1) Lexical rules (fixed confidence 0.95, model bypassed)
//! 2) 3-class model + neutral threshold
//! 3) Fallback: neutral with confidence 0 when the model is unavailable
//!
//! `classify_stance` never fails. `try_classify` reports model trouble as an
//! error instead, for callers that retry.

pub mod rules;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use rules::{LexicalRules, NO_RULE_NEUTRAL, RULE_CONFIDENCE};

use crate::dimensions::ModelRegistry;
use crate::models::{ClassProbabilities, TextPair};
use crate::stance::Stance;
use crate::telemetry::anon_hash;

pub const DEFAULT_NEUTRAL_THRESHOLD: f64 = 0.4;

/// Which path produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Rule,
    Model,
    Fallback,
}

impl ClassificationSource {
    fn as_str(&self) -> &'static str {
        match self {
            ClassificationSource::Rule => "rule",
            ClassificationSource::Model => "model",
            ClassificationSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StanceOutcome {
    pub stance: Stance,
    /// Probability of the chosen class, in [0, 1].
    pub confidence: f64,
    pub source: ClassificationSource,
}

/// Apply the neutral threshold to a model distribution.
/// `P(neutral) >= threshold` → neutral; else the larger of agree / disagree
/// (ties go to agree).
pub fn decide(probs: &ClassProbabilities, neutral_threshold: f64) -> (Stance, f64) {
    let stance = if probs.neutral >= neutral_threshold {
        Stance::Neutral
    } else if probs.disagree > probs.agree {
        Stance::Disagree
    } else {
        Stance::Agree
    };
    (stance, probs.get(stance).clamp(0.0, 1.0))
}

#[derive(Debug, Clone)]
pub struct StanceClassifier {
    registry: Arc<ModelRegistry>,
    rules: LexicalRules,
    neutral_threshold: f64,
}

impl StanceClassifier {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            rules: LexicalRules::new(),
            neutral_threshold: DEFAULT_NEUTRAL_THRESHOLD,
        }
    }

    pub fn with_neutral_threshold(mut self, threshold: f64) -> Self {
        self.neutral_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn neutral_threshold(&self) -> f64 {
        self.neutral_threshold
    }

    /// Classify with the configured threshold.
    pub async fn classify_stance(&self, statement: &str, reaction: &str) -> StanceOutcome {
        self.classify_with_threshold(statement, reaction, self.neutral_threshold)
            .await
    }

    pub async fn classify_with_threshold(
        &self,
        statement: &str,
        reaction: &str,
        neutral_threshold: f64,
    ) -> StanceOutcome {
        let outcome = match self.run(statement, reaction, neutral_threshold).await {
            Ok(o) => o,
            Err(e) => {
                warn!(target: "classify", error = %e, "stance model failed; defaulting to neutral");
                fallback()
            }
        };
        self.record(reaction, &outcome);
        outcome
    }

    /// Like `classify_stance`, but an unavailable or failing model is an
    /// error rather than a neutral fallback.
    pub async fn try_classify(&self, statement: &str, reaction: &str) -> Result<StanceOutcome> {
        let outcome = self
            .run(statement, reaction, self.neutral_threshold)
            .await?;
        self.record(reaction, &outcome);
        Ok(outcome)
    }

    fn record(&self, reaction: &str, outcome: &StanceOutcome) {
        counter!("matcher_classifications_total", "source" => outcome.source.as_str())
            .increment(1);
        debug!(
            target: "classify",
            id = %anon_hash(reaction),
            stance = %outcome.stance,
            confidence = outcome.confidence,
            source = outcome.source.as_str(),
            "classified reaction"
        );
    }

    async fn run(&self, statement: &str, reaction: &str, neutral_threshold: f64) -> Result<StanceOutcome> {
        if let Some(stance) = self.rules.match_reaction(reaction) {
            return Ok(StanceOutcome {
                stance,
                confidence: RULE_CONFIDENCE,
                source: ClassificationSource::Rule,
            });
        }

        let model = self
            .registry
            .stance_model()
            .await
            .ok_or_else(|| anyhow!("stance model unavailable"))?;

        let pair = TextPair::new(statement, reaction);
        let probs = model
            .classify(&pair)
            .await
            .map_err(|e| anyhow!("stance model {} failed: {e:#}", model.name()))?;
        let (stance, confidence) = decide(&probs, neutral_threshold);
        Ok(StanceOutcome {
            stance,
            confidence,
            source: ClassificationSource::Model,
        })
    }
}

fn fallback() -> StanceOutcome {
    StanceOutcome {
        stance: Stance::Neutral,
        confidence: 0.0,
        source: ClassificationSource::Fallback,
    }
}
