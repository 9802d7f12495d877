//! Tracing setup, metric descriptions and log-safe text fingerprints.

use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_JSON: &str = "MATCHER_LOG_JSON";

/// Install the global subscriber. `RUST_LOG` wins over the default filter;
/// `MATCHER_LOG_JSON=1` switches to JSON lines. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("politiek_matcher=info,warn"));
    let json = std::env::var(ENV_LOG_JSON).ok().as_deref() == Some("1");

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// One-time metrics registration (so series carry help text once exported).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "matcher_classifications_total",
            "Stance classifications by source (rule, model, fallback)."
        );
        describe_counter!(
            "matcher_axis_failures_total",
            "Axis model failures that excluded an axis from similarity."
        );
        describe_counter!(
            "matcher_statement_matches_total",
            "Statement matches written."
        );
        describe_counter!("matcher_party_matches_total", "Party matches written.");
        describe_counter!("matcher_jobs_total", "Finished jobs by outcome.");
        describe_counter!("matcher_job_retries_total", "Job attempts that were retried.");
        describe_histogram!("matcher_job_ms", "Job wall time in milliseconds.");
    });
}

/// Short SHA-256 prefix standing in for free text in logs. Raw text is never logged.
pub fn anon_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
