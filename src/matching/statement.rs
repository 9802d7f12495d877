//! Statement match calculator.
//!
//! final = clamp(base + modifier, 0, 100), one decimal, where
//! - base: stance alignment table (80 / 50 / 20)
//! - modifier: cosine similarity of the significant ideology axes × 20
//!
//! Pure functions first, then the async `StatementMatcher` that feeds them
//! model output. No randomness anywhere in this path.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::StanceClassifier;
use crate::config::ScoringConfig;
use crate::dimensions::{Axis, AxisScores, DimensionScorer, IdeologyVector};
use crate::stance::{PartyStance, Stance};
use crate::store::{PartyId, PartyPosition};

pub const SAME_STANCE_SCORE: f64 = 80.0;
pub const ONE_SIDE_NEUTRAL_SCORE: f64 = 50.0;
pub const OPPOSITE_STANCE_SCORE: f64 = 20.0;

/// Statement used to classify an opinion when the real statement is unknown.
pub const GENERIC_STATEMENT: &str = "Dit onderwerp is belangrijk";

/// Stance alignment score on the 3-point scale.
pub fn base_score(user: Stance, party: PartyStance) -> f64 {
    let party = party.normalize();
    if user == party {
        SAME_STANCE_SCORE
    } else if user == Stance::Neutral || party == Stance::Neutral {
        ONE_SIDE_NEUTRAL_SCORE
    } else {
        OPPOSITE_STANCE_SCORE
    }
}

/// Axes available on both sides where at least one side exceeds the threshold.
pub fn significant_axes(user: &AxisScores, party: &AxisScores, threshold: f64) -> Vec<Axis> {
    Axis::ALL
        .into_iter()
        .filter(|axis| match (user.get(*axis), party.get(*axis)) {
            (Some(u), Some(p)) => u.abs() > threshold || p.abs() > threshold,
            _ => false,
        })
        .collect()
}

/// Ideology modifier in [-max_modifier, +max_modifier]; 0 when there is
/// nothing significant to compare or either subvector has zero norm.
pub fn dimension_modifier(user: &AxisScores, party: &AxisScores, cfg: &ScoringConfig) -> f64 {
    let axes = significant_axes(user, party, cfg.significance_threshold);
    if axes.is_empty() {
        return 0.0;
    }

    let (mut dot, mut nu, mut np) = (0.0f64, 0.0f64, 0.0f64);
    for axis in &axes {
        let u = user.values[axis.index()];
        let p = party.values[axis.index()];
        dot += u * p;
        nu += u * u;
        np += p * p;
    }
    if nu == 0.0 || np == 0.0 {
        return 0.0;
    }

    let similarity = dot / (nu.sqrt() * np.sqrt());
    let m = (similarity * cfg.max_modifier).clamp(-cfg.max_modifier, cfg.max_modifier);
    if m.is_finite() {
        m
    } else {
        0.0
    }
}

/// Clamp to [0, 100] and round to one decimal.
pub fn final_score(base: f64, modifier: f64) -> f64 {
    round1((base + modifier).clamp(0.0, 100.0))
}

pub(crate) fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Uniform party input: whether it comes from a stored position or an ad hoc
/// tuple, it carries the same four fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyInput {
    pub party_id: PartyId,
    pub stance: PartyStance,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub ideology: Option<IdeologyVector>,
}

impl PartyInput {
    pub fn new(party_id: PartyId, stance: PartyStance, explanation: impl Into<String>) -> Self {
        Self {
            party_id,
            stance,
            explanation: explanation.into(),
            ideology: None,
        }
    }

    pub fn with_ideology(mut self, v: IdeologyVector) -> Self {
        self.ideology = Some(v);
        self
    }
}

impl From<&PartyPosition> for PartyInput {
    fn from(p: &PartyPosition) -> Self {
        Self {
            party_id: p.party_id,
            stance: p.stance,
            explanation: p.explanation.clone(),
            ideology: p.ideology.clone(),
        }
    }
}

/// Score breakdown for one (opinion, party) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatementScore {
    pub party_id: PartyId,
    pub base_score: f64,
    pub dimension_modifier: f64,
    pub final_score: f64,
}

/// Combine a user stance and two axis score sets into a score breakdown.
pub fn score_with_vectors(
    user_stance: Stance,
    user_vec: &AxisScores,
    party: &PartyInput,
    party_vec: &AxisScores,
    cfg: &ScoringConfig,
) -> StatementScore {
    let base = base_score(user_stance, party.stance);
    let modifier = dimension_modifier(user_vec, party_vec, cfg);
    StatementScore {
        party_id: party.party_id,
        base_score: base,
        dimension_modifier: modifier,
        final_score: final_score(base, modifier),
    }
}

#[derive(Debug, Clone)]
pub struct StatementMatcher {
    scorer: DimensionScorer,
    classifier: Arc<StanceClassifier>,
    cfg: ScoringConfig,
}

impl StatementMatcher {
    pub fn new(scorer: DimensionScorer, classifier: Arc<StanceClassifier>, cfg: ScoringConfig) -> Self {
        Self {
            scorer,
            classifier,
            cfg,
        }
    }

    pub fn scorer(&self) -> &DimensionScorer {
        &self.scorer
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.cfg
    }

    /// Axis scores for a party: its precomputed vector if present, else the
    /// explanation text scored on the spot (not written back here).
    pub async fn party_axes(&self, party: &PartyInput) -> AxisScores {
        match &party.ideology {
            Some(v) => v.to_scores(),
            None => self.scorer.score(&party.explanation).await,
        }
    }

    /// Final 0–100 score for one party. Never fails.
    pub async fn score_statement_match(
        &self,
        user_stance: Stance,
        user_opinion: &str,
        party: &PartyInput,
    ) -> f64 {
        self.score_breakdown(user_stance, user_opinion, party)
            .await
            .final_score
    }

    pub async fn score_breakdown(
        &self,
        user_stance: Stance,
        user_opinion: &str,
        party: &PartyInput,
    ) -> StatementScore {
        let user_vec = self.scorer.score(user_opinion).await;
        let party_vec = self.party_axes(party).await;
        score_with_vectors(user_stance, &user_vec, party, &party_vec, &self.cfg)
    }

    /// Score one opinion against several parties. Without a stance the opinion
    /// is classified first (against `statement`, or a generic statement).
    /// The opinion is scored once and reused for every party.
    pub async fn rank_parties(
        &self,
        user_opinion: &str,
        user_stance: Option<Stance>,
        parties: &[PartyInput],
        statement: Option<&str>,
    ) -> Result<Vec<StatementScore>> {
        if user_opinion.trim().is_empty() {
            bail!("user opinion must be non-empty");
        }
        if parties.is_empty() {
            return Ok(Vec::new());
        }

        let stance = match user_stance {
            Some(s) => s,
            None => {
                let stmt = statement
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(GENERIC_STATEMENT);
                self.classifier.classify_stance(stmt, user_opinion).await.stance
            }
        };

        let user_vec = self.scorer.score(user_opinion).await;
        let mut out = Vec::with_capacity(parties.len());
        for party in parties {
            let party_vec = self.party_axes(party).await;
            let s = score_with_vectors(stance, &user_vec, party, &party_vec, &self.cfg);
            debug!(
                target: "matching",
                party = party.party_id,
                base = s.base_score,
                modifier = s.dimension_modifier,
                score = s.final_score,
                "scored party"
            );
            out.push(s);
        }
        out.sort_by_key(|s| s.party_id);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::AXIS_COUNT;

    fn cfg() -> ScoringConfig {
        ScoringConfig::default()
    }

    fn vec7(v: [f64; AXIS_COUNT]) -> AxisScores {
        AxisScores::complete(v)
    }

    #[test]
    fn base_score_table() {
        assert_eq!(base_score(Stance::Agree, PartyStance::StronglyAgree), 80.0);
        assert_eq!(base_score(Stance::Agree, PartyStance::StronglyDisagree), 20.0);
        assert_eq!(base_score(Stance::Neutral, PartyStance::Agree), 50.0);
        assert_eq!(base_score(Stance::Disagree, PartyStance::StronglyDisagree), 80.0);
        assert_eq!(base_score(Stance::Disagree, PartyStance::Neutral), 50.0);
        assert_eq!(base_score(Stance::Neutral, PartyStance::Neutral), 80.0);
    }

    #[test]
    fn aligned_vectors_give_full_bonus() {
        let u = vec7([0.5, 0.0, 0.8, 0.0, 0.0, 0.0, 0.0]);
        let p = vec7([0.25, 0.0, 0.4, 0.0, 0.0, 0.0, 0.0]);
        assert!((dimension_modifier(&u, &p, &cfg()) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn opposite_vectors_give_full_penalty() {
        let u = vec7([0.0, 0.0, 0.7, 0.0, 0.0, 0.0, 0.0]);
        let p = vec7([0.0, 0.0, -0.7, 0.0, 0.0, 0.0, 0.0]);
        assert!((dimension_modifier(&u, &p, &cfg()) + 20.0).abs() < 1e-9);
    }

    #[test]
    fn insignificant_axes_yield_zero() {
        let u = vec7([0.1, -0.1, 0.05, 0.0, 0.0, 0.09, -0.02]);
        let p = vec7([-0.1, 0.1, 0.0, 0.03, 0.0, 0.0, 0.1]);
        assert_eq!(dimension_modifier(&u, &p, &cfg()), 0.0);
    }

    #[test]
    fn zero_norm_subvector_yields_zero() {
        let u = vec7([0.6, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let p = vec7([0.0; AXIS_COUNT]);
        assert_eq!(dimension_modifier(&u, &p, &cfg()), 0.0);
    }

    #[test]
    fn unavailable_axes_are_skipped() {
        let mut u = vec7([0.0, 0.0, 0.9, 0.0, 0.0, 0.0, 0.0]);
        let p = vec7([0.0, 0.0, -0.9, 0.0, 0.5, 0.0, 0.0]);
        u.mark_unavailable(Axis::Environmental);
        // only europe remains comparable and the user side is 0 there
        assert_eq!(dimension_modifier(&u, &p, &cfg()), 0.0);
        assert_eq!(significant_axes(&u, &p, 0.1), vec![Axis::Europe]);
    }

    #[test]
    fn final_score_clamps_and_rounds() {
        assert_eq!(final_score(80.0, 20.0), 100.0);
        assert_eq!(final_score(80.0, 25.0), 100.0);
        assert_eq!(final_score(20.0, -20.0), 0.0);
        assert_eq!(final_score(50.0, 3.14159), 53.1);
        assert_eq!(final_score(50.0, -7.06), 42.9);
    }
}
