// src/config/mod.rs
//! Engine configuration (TOML), with env overrides and sanitisation.
//!
//! Path: `$MATCHER_CONFIG_PATH` or `config/matcher.toml`. A missing file means
//! defaults; out-of-range values fall back to their defaults.

pub mod ai;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::DEFAULT_NEUTRAL_THRESHOLD;

pub const DEFAULT_CONFIG_PATH: &str = "config/matcher.toml";
pub const ENV_CONFIG_PATH: &str = "MATCHER_CONFIG_PATH";
pub const ENV_NEUTRAL_THRESHOLD: &str = "MATCHER_NEUTRAL_THRESHOLD";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub classifier: ClassifierConfig,
    pub scoring: ScoringConfig,
    pub aggregation: AggregationConfig,
    pub worker: WorkerConfig,
    pub models: ModelServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub neutral_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            neutral_threshold: DEFAULT_NEUTRAL_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// An axis is significant when |value| exceeds this on either side.
    pub significance_threshold: f64,
    /// Similarity is mapped to [-max_modifier, +max_modifier].
    pub max_modifier: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            significance_threshold: 0.1,
            max_modifier: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Statements scoring strictly above this count as matching.
    pub matching_threshold: f64,
    /// Coverage below this ratio is penalised.
    pub coverage_threshold: f64,
    pub min_penalty_factor: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            matching_threshold: 60.0,
            coverage_threshold: 0.8,
            min_penalty_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            max_attempts: 3,
            backoff_base_ms: 1000,
            poll_interval_ms: 250,
        }
    }
}

impl WorkerConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelServerConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ModelServerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8700".to_string(),
            timeout_secs: 30,
        }
    }
}

impl MatcherConfig {
    /// Load from `$MATCHER_CONFIG_PATH` or the default path, then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut cfg = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            info!(target: "config", path = %path.display(), "no config file; using defaults");
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut cfg: MatcherConfig = toml::from_str(raw)?;
        cfg.sanitize();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(t) = parse_threshold_env(std::env::var(ENV_NEUTRAL_THRESHOLD).ok()) {
            self.classifier.neutral_threshold = t;
        }
    }

    /// Reset invalid values to their defaults.
    pub fn sanitize(&mut self) {
        let d = MatcherConfig::default();

        if !unit_interval(self.classifier.neutral_threshold) {
            warn!(target: "config", value = self.classifier.neutral_threshold, "neutral_threshold out of range");
            self.classifier.neutral_threshold = d.classifier.neutral_threshold;
        }
        if !unit_interval(self.scoring.significance_threshold) {
            self.scoring.significance_threshold = d.scoring.significance_threshold;
        }
        if !(self.scoring.max_modifier.is_finite() && self.scoring.max_modifier >= 0.0) {
            self.scoring.max_modifier = d.scoring.max_modifier;
        }
        if !(0.0..=100.0).contains(&self.aggregation.matching_threshold) {
            self.aggregation.matching_threshold = d.aggregation.matching_threshold;
        }
        if !(self.aggregation.coverage_threshold > 0.0 && self.aggregation.coverage_threshold <= 1.0) {
            self.aggregation.coverage_threshold = d.aggregation.coverage_threshold;
        }
        if !unit_interval(self.aggregation.min_penalty_factor) {
            self.aggregation.min_penalty_factor = d.aggregation.min_penalty_factor;
        }
        if self.worker.pool_size == 0 {
            self.worker.pool_size = d.worker.pool_size;
        }
        if self.worker.max_attempts == 0 {
            self.worker.max_attempts = d.worker.max_attempts;
        }
        if self.worker.poll_interval_ms == 0 {
            self.worker.poll_interval_ms = d.worker.poll_interval_ms;
        }
        if self.models.timeout_secs == 0 {
            self.models.timeout_secs = d.models.timeout_secs;
        }
    }
}

fn unit_interval(x: f64) -> bool {
    (0.0..=1.0).contains(&x)
}

// parse optional float env and clamp to <0.0..=1.0>
fn parse_threshold_env(raw: Option<String>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
}
