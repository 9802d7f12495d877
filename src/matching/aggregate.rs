//! Profile aggregator: all statement scores of one (profile, party) pair →
//! one match record, with confidence / importance weighting and a coverage
//! penalty.
//!
//! agreement_score stays unpenalized so the raw signal remains auditable.

use serde::{Deserialize, Serialize};

use crate::config::AggregationConfig;

/// One statement score together with the weights of its source response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedScore {
    pub final_score: f64,
    /// 1..=5
    pub confidence: u8,
    /// 1..=5
    pub importance: u8,
}

impl WeightedScore {
    pub fn new(final_score: f64, confidence: u8, importance: u8) -> Self {
        Self {
            final_score,
            confidence,
            importance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub match_percentage: f64,
    pub agreement_score: f64,
    pub confidence_weighted_score: f64,
    pub importance_weighted_score: f64,
    pub total_statements: usize,
    pub matching_statements: usize,
    pub coverage_ratio: f64,
    pub penalty_factor: f64,
}

/// Ratio of covered statements to labeled responses (0 when nothing is labeled).
pub fn coverage_ratio(covered: usize, labeled_responses: usize) -> f64 {
    if labeled_responses == 0 {
        0.0
    } else {
        covered as f64 / labeled_responses as f64
    }
}

/// Penalty multiplier in [min_penalty_factor, 1.0]; 0 when nothing is labeled.
pub fn penalty_factor(ratio: f64, labeled_responses: usize, cfg: &AggregationConfig) -> f64 {
    if labeled_responses == 0 {
        return 0.0;
    }
    if ratio < cfg.coverage_threshold {
        (ratio / cfg.coverage_threshold).max(cfg.min_penalty_factor)
    } else {
        1.0
    }
}

/// Aggregate a profile/party score set. `None` for empty input: "never
/// computed" must stay distinct from "computed as 0%".
pub fn aggregate(
    scores: &[WeightedScore],
    labeled_responses: usize,
    cfg: &AggregationConfig,
) -> Option<Aggregate> {
    if scores.is_empty() {
        return None;
    }

    let mut total = 0.0f64;
    let mut conf_weighted = 0.0f64;
    let mut conf_sum = 0.0f64;
    let mut imp_weighted = 0.0f64;
    let mut imp_sum = 0.0f64;
    let mut matching = 0usize;

    for s in scores {
        let c = f64::from(s.confidence) / 5.0;
        let i = f64::from(s.importance) / 5.0;
        total += s.final_score;
        conf_weighted += s.final_score * c;
        conf_sum += c;
        imp_weighted += s.final_score * i;
        imp_sum += i;
        if s.final_score > cfg.matching_threshold {
            matching += 1;
        }
    }

    let count = scores.len();
    let agreement = total / count as f64;
    let conf_avg = conf_weighted / conf_sum.max(1.0);
    let imp_avg = imp_weighted / imp_sum.max(1.0);

    let ratio = coverage_ratio(count, labeled_responses);
    let factor = penalty_factor(ratio, labeled_responses, cfg);

    Some(Aggregate {
        match_percentage: clamp_pct(agreement * factor),
        agreement_score: clamp_pct(agreement),
        confidence_weighted_score: clamp_pct(conf_avg * factor),
        importance_weighted_score: clamp_pct(imp_avg * factor),
        total_statements: count,
        matching_statements: matching,
        coverage_ratio: ratio,
        penalty_factor: factor,
    })
}

fn clamp_pct(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AggregationConfig {
        AggregationConfig::default()
    }

    #[test]
    fn single_full_weight_match_round_trips() {
        let a = aggregate(&[WeightedScore::new(80.0, 5, 5)], 1, &cfg()).unwrap();
        assert_eq!(a.match_percentage, 80.0);
        assert_eq!(a.agreement_score, 80.0);
        assert_eq!(a.confidence_weighted_score, 80.0);
        assert_eq!(a.importance_weighted_score, 80.0);
        assert_eq!(a.total_statements, 1);
        assert_eq!(a.matching_statements, 1);
    }

    #[test]
    fn empty_input_produces_nothing() {
        assert!(aggregate(&[], 4, &cfg()).is_none());
    }

    #[test]
    fn penalty_factor_boundaries() {
        let c = cfg();
        assert_eq!(penalty_factor(1.0, 5, &c), 1.0);
        assert_eq!(penalty_factor(0.8, 5, &c), 1.0);
        assert_eq!(penalty_factor(0.4, 5, &c), 0.5);
        assert_eq!(penalty_factor(0.2, 5, &c), 0.5);
        assert!((penalty_factor(0.6, 5, &c) - 0.75).abs() < 1e-12);
        assert_eq!(penalty_factor(0.0, 0, &c), 0.0);
    }

    #[test]
    fn penalty_spares_agreement_score() {
        // 2 covered out of 5 labeled → ratio 0.4 → factor 0.5
        let scores = [WeightedScore::new(80.0, 5, 5), WeightedScore::new(60.0, 5, 5)];
        let a = aggregate(&scores, 5, &cfg()).unwrap();
        assert_eq!(a.agreement_score, 70.0);
        assert_eq!(a.match_percentage, 35.0);
        assert_eq!(a.confidence_weighted_score, 35.0);
        assert_eq!(a.importance_weighted_score, 35.0);
        // 60 is not "> 60"
        assert_eq!(a.matching_statements, 1);
    }

    #[test]
    fn weights_floor_denominator_at_one() {
        // one low-confidence answer: weight 0.2, sum floored to 1.0
        let a = aggregate(&[WeightedScore::new(90.0, 1, 3)], 1, &cfg()).unwrap();
        assert!((a.confidence_weighted_score - 18.0).abs() < 1e-9);
        assert!((a.importance_weighted_score - 54.0).abs() < 1e-9);
        assert_eq!(a.match_percentage, 90.0);
    }

    #[test]
    fn zero_labeled_responses_is_zero_percent() {
        let a = aggregate(&[WeightedScore::new(80.0, 5, 5)], 0, &cfg()).unwrap();
        assert_eq!(a.match_percentage, 0.0);
        assert_eq!(a.agreement_score, 80.0);
    }
}
