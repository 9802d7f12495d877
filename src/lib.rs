// src/lib.rs
// Public library surface for the batch binary and integration tests.

pub mod classify;
pub mod config;
pub mod dimensions;
pub mod engine;
pub mod explain;
pub mod matching;
pub mod models;
pub mod stance;
pub mod store;
pub mod telemetry;
pub mod worker;

// ---- Re-exports for stable public API ----
pub use crate::classify::{StanceClassifier, StanceOutcome};
pub use crate::config::MatcherConfig;
pub use crate::dimensions::{AxisScores, DimensionScorer, IdeologyVector, ModelRegistry};
pub use crate::engine::MatchEngine;
pub use crate::explain::ExplanationService;
pub use crate::matching::{PartyInput, StatementMatcher};
pub use crate::stance::{PartyStance, Stance};
pub use crate::store::{InMemoryStore, MatchStore, PartyMatch, Snapshot};
pub use crate::worker::{Job, JobId, JobStatus, MatchWorker};

use std::sync::Arc;

use tracing::info;

use crate::models::http::ModelServerClient;
use crate::models::mock::InMemoryModelLoader;
use crate::models::ModelLoader;

/// Registry over the configured model server, or the in-process offline
/// models when `offline` is set.
pub fn build_registry(cfg: &MatcherConfig, offline: bool) -> anyhow::Result<Arc<ModelRegistry>> {
    let loader: Arc<dyn ModelLoader> = if offline {
        Arc::new(InMemoryModelLoader::offline())
    } else {
        Arc::new(ModelServerClient::new(&cfg.models)?)
    };
    info!(loader = loader.name(), endpoint = %cfg.models.endpoint, "model registry ready");
    Ok(Arc::new(ModelRegistry::new(loader)))
}
