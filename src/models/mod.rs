//! Model-serving contract.
//!
//! The engine only consumes trained models as black boxes:
//! - `StanceModel::classify(text_pair) -> class probabilities`
//! - `AxisModel::score(text) -> scalar`
//!
//! A `ModelLoader` produces them on demand; the `ModelRegistry` in
//! `dimensions::registry` guarantees each one is loaded at most once.

pub mod http;
pub mod mock;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dimensions::Axis;
use crate::stance::Stance;

/// Statement + reaction pair fed to the stance model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPair<'a> {
    pub statement: &'a str,
    pub reaction: &'a str,
}

impl<'a> TextPair<'a> {
    pub fn new(statement: &'a str, reaction: &'a str) -> Self {
        Self { statement, reaction }
    }

    /// Single classification input the stance model was trained on.
    pub fn joined(&self) -> String {
        format!("Stelling: {}\nReactie: {}", self.statement, self.reaction)
    }
}

/// Three-class probability distribution.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub agree: f64,
    pub neutral: f64,
    pub disagree: f64,
}

impl ClassProbabilities {
    pub fn new(agree: f64, neutral: f64, disagree: f64) -> Self {
        Self {
            agree,
            neutral,
            disagree,
        }
    }

    pub fn get(&self, stance: Stance) -> f64 {
        match stance {
            Stance::Agree => self.agree,
            Stance::Neutral => self.neutral,
            Stance::Disagree => self.disagree,
        }
    }

    /// Near one-hot distribution putting `p` on `stance`.
    pub fn peaked(stance: Stance, p: f64) -> Self {
        let rest = (1.0 - p).max(0.0) / 2.0;
        let mut out = Self::new(rest, rest, rest);
        match stance {
            Stance::Agree => out.agree = p,
            Stance::Neutral => out.neutral = p,
            Stance::Disagree => out.disagree = p,
        }
        out
    }

    /// Build from raw `(label, score)` pairs as emitted by a classification head.
    /// Labels may be `LABEL_<n>`, a bare index, or a stance name.
    pub fn from_labeled<'a, I>(scores: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut out = Self::default();
        let mut seen = 0usize;
        for (label, score) in scores {
            let stance = parse_label(label)?;
            match stance {
                Stance::Agree => out.agree = score,
                Stance::Neutral => out.neutral = score,
                Stance::Disagree => out.disagree = score,
            }
            seen += 1;
        }
        if seen == 0 {
            return Err(anyhow!("classifier returned no class scores"));
        }
        Ok(out)
    }
}

fn parse_label(label: &str) -> Result<Stance> {
    let raw = label.strip_prefix("LABEL_").unwrap_or(label);
    if let Ok(idx) = raw.parse::<usize>() {
        return Stance::from_class_index(idx).ok_or_else(|| anyhow!("unknown class index {idx}"));
    }
    raw.parse::<Stance>()
}

/// 3-class stance model.
#[async_trait]
pub trait StanceModel: Send + Sync {
    async fn classify(&self, pair: &TextPair<'_>) -> Result<ClassProbabilities>;
    fn name(&self) -> &'static str;
}

/// Single-axis ideology regressor.
#[async_trait]
pub trait AxisModel: Send + Sync {
    async fn score(&self, text: &str) -> Result<f64>;
}

/// Produces model handles; called at most once per model by the registry.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_stance_model(&self) -> Result<Arc<dyn StanceModel>>;
    async fn load_axis_model(&self, axis: Axis) -> Result<Arc<dyn AxisModel>>;

    /// Free accelerator memory held for the last batch. Best-effort.
    async fn release_accelerator_memory(&self) {}

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_ids_map_to_stances() {
        let p = ClassProbabilities::from_labeled([
            ("LABEL_0", 0.1),
            ("LABEL_1", 0.2),
            ("LABEL_2", 0.7),
        ])
        .unwrap();
        assert_eq!(p, ClassProbabilities::new(0.7, 0.2, 0.1));

        let q = ClassProbabilities::from_labeled([("2", 0.9), ("neutral", 0.05)]).unwrap();
        assert_eq!(q.agree, 0.9);
        assert_eq!(q.neutral, 0.05);
        assert_eq!(q.disagree, 0.0);
    }

    #[test]
    fn unknown_labels_are_rejected() {
        assert!(ClassProbabilities::from_labeled([("LABEL_7", 1.0)]).is_err());
        assert!(ClassProbabilities::from_labeled(std::iter::empty::<(&str, f64)>()).is_err());
    }

    #[test]
    fn joined_input_matches_training_format() {
        let pair = TextPair::new("Klimaatbeleid is belangrijk", "Zeker");
        assert_eq!(
            pair.joined(),
            "Stelling: Klimaatbeleid is belangrijk\nReactie: Zeker"
        );
    }
}
