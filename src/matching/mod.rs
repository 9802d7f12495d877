//! Matching pipeline: per-statement scores and their per-profile aggregate.

pub mod aggregate;
pub mod statement;
pub mod vectors;

pub use aggregate::{aggregate, coverage_ratio, penalty_factor, Aggregate, WeightedScore};
pub use statement::{
    base_score, dimension_modifier, final_score, score_with_vectors, significant_axes,
    PartyInput, StatementMatcher, StatementScore, GENERIC_STATEMENT,
};
pub use vectors::PartyVectorCache;
