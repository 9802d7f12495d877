//! Dimension scorer: text → 7-axis score set via the per-axis ensemble.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::{clamp_axis, Axis, AxisScores, ModelRegistry};
use crate::telemetry::anon_hash;

#[derive(Clone, Debug)]
pub struct DimensionScorer {
    registry: Arc<ModelRegistry>,
}

impl DimensionScorer {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Score `text` on every axis. Never fails: an axis whose model is missing,
    /// errors, or returns a non-finite value is reported as unavailable.
    pub async fn score(&self, text: &str) -> AxisScores {
        let mut out = AxisScores::unavailable();
        for axis in Axis::ALL {
            let Some(model) = self.registry.axis_model(axis).await else {
                continue;
            };
            match model.score(text).await {
                Ok(raw) => match clamp_axis(raw) {
                    Some(v) => out.set(axis, v),
                    None => {
                        warn!(target: "dimensions", %axis, "non-finite axis score; axis excluded");
                        counter!("matcher_axis_failures_total", "axis" => axis.name()).increment(1);
                    }
                },
                Err(e) => {
                    warn!(target: "dimensions", %axis, error = ?e, "axis scoring failed; axis excluded");
                    counter!("matcher_axis_failures_total", "axis" => axis.name()).increment(1);
                }
            }
        }
        debug!(
            target: "dimensions",
            id = %anon_hash(text),
            available = out.available_count(),
            "scored text"
        );
        out
    }
}
