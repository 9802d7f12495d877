//! Batch entrypoint: match every response of a JSON snapshot and print the
//! resulting party matches as JSON.
//!
//! Snapshot path: first CLI argument, else `$MATCHER_SNAPSHOT`.
//! `MATCHER_OFFLINE=1` uses the in-process models instead of the model server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use politiek_matcher::config::ai::{AiConfig, DEFAULT_AI_CONFIG_PATH};
use politiek_matcher::explain::generator_from_config;
use politiek_matcher::telemetry::{ensure_metrics_described, init_tracing};
use politiek_matcher::{
    build_registry, ExplanationService, InMemoryStore, Job, JobStatus, MatchEngine, MatchStore,
    MatchWorker, MatcherConfig, Snapshot,
};

const ENV_SNAPSHOT: &str = "MATCHER_SNAPSHOT";
const ENV_OFFLINE: &str = "MATCHER_OFFLINE";
const ENV_EXPLAIN: &str = "MATCHER_EXPLAIN";

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    init_tracing();
    ensure_metrics_described();

    let cfg = MatcherConfig::load()?;
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(ENV_SNAPSHOT).ok())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("usage: politiek-matcher <snapshot.json> (or set {ENV_SNAPSHOT})"))?;
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    let snapshot = Snapshot::from_json(&raw)?;
    let response_ids: Vec<_> = snapshot.responses.iter().map(|r| r.id).collect();

    let offline = std::env::var(ENV_OFFLINE).ok().as_deref() == Some("1");
    let store: Arc<dyn MatchStore> = Arc::new(InMemoryStore::from_snapshot(snapshot));
    let registry = build_registry(&cfg, offline)?;
    let engine = Arc::new(MatchEngine::new(store.clone(), registry, &cfg));
    let worker = MatchWorker::new(engine, cfg.worker.clone());

    let jobs: Vec<_> = response_ids
        .into_iter()
        .map(|id| worker.submit(Job::ProcessResponse(id)))
        .collect();
    let mut failed = 0usize;
    for status in worker.wait_all(&jobs).await? {
        if let JobStatus::Failed { error, attempts } = status {
            warn!(attempts, %error, "response job failed");
            failed += 1;
        }
    }

    let profiles = store.profiles().await?;
    let recalcs: Vec<_> = profiles
        .iter()
        .map(|p| worker.submit(Job::RecalculateProfile(*p)))
        .collect();
    worker.wait_all(&recalcs).await?;

    let explain = std::env::var(ENV_EXPLAIN).ok().as_deref() == Some("1");
    let explainer = if explain {
        let ai = AiConfig::load_or_default(DEFAULT_AI_CONFIG_PATH)?;
        Some(ExplanationService::new(store.clone(), generator_from_config(&ai)?))
    } else {
        None
    };

    let mut out = Vec::new();
    for p in &profiles {
        for m in store.party_matches_for_profile(*p).await? {
            if let Some(svc) = &explainer {
                svc.explain_match(&m).await?;
            }
        }
        out.extend(store.party_matches_for_profile(*p).await?);
    }

    info!(
        profiles = profiles.len(),
        party_matches = out.len(),
        failed_jobs = failed,
        "batch finished"
    );
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
