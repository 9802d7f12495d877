//! Write-through cache of party ideology vectors, keyed by position.
//!
//! Scoring itself never writes; callers resolve party vectors here first and
//! hand the resulting axis scores to `score_with_vectors`.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::dimensions::{AxisScores, DimensionScorer};
use crate::store::{MatchStore, PositionKey};

/// Confidence recorded on vectors derived from a party's explanation text.
pub const DERIVED_VECTOR_CONFIDENCE: f64 = 0.8;
pub const DERIVED_VECTOR_EVIDENCE: &str = "Calculated from statement explanation";

pub struct PartyVectorCache {
    store: Arc<dyn MatchStore>,
    scorer: DimensionScorer,
}

impl PartyVectorCache {
    pub fn new(store: Arc<dyn MatchStore>, scorer: DimensionScorer) -> Self {
        Self { store, scorer }
    }

    /// Cached vector for `key`, or compute it from the position's explanation.
    /// Only complete vectors (all seven axes available) are written back; a
    /// partial one is returned for this use and recomputed next time.
    /// `Ok(None)` when the position does not exist.
    pub async fn get_or_compute_vector(&self, key: PositionKey) -> Result<Option<AxisScores>> {
        let Some(position) = self.store.position(key).await? else {
            return Ok(None);
        };
        if let Some(v) = position.ideology {
            return Ok(Some(v.to_scores()));
        }

        let scores = self.scorer.score(&position.explanation).await;
        match scores.into_vector(DERIVED_VECTOR_CONFIDENCE, DERIVED_VECTOR_EVIDENCE) {
            Some(v) => {
                if let Err(e) = self.store.set_position_vector(key, v).await {
                    warn!(target: "matching", ?key, error = ?e, "could not cache party vector");
                } else {
                    info!(
                        target: "matching",
                        statement = key.statement_id,
                        party = key.party_id,
                        "cached party ideology vector"
                    );
                }
            }
            None => {
                warn!(
                    target: "matching",
                    statement = key.statement_id,
                    party = key.party_id,
                    available = scores.available_count(),
                    "partial party vector; not cached"
                );
            }
        }
        Ok(Some(scores))
    }
}
