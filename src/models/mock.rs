//! In-process model stand-ins: deterministic, no network, no accelerator.
//!
//! Used by the tests and by the batch binary when no model server is
//! configured (`InMemoryModelLoader::offline`).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{AxisModel, ClassProbabilities, ModelLoader, StanceModel, TextPair};
use crate::classify::LexicalRules;
use crate::dimensions::{Axis, AXIS_COUNT};

/// Returns the same distribution for every input.
#[derive(Debug, Default)]
pub struct FixedStanceModel {
    probs: ClassProbabilities,
    calls: AtomicUsize,
}

impl FixedStanceModel {
    pub fn new(probs: ClassProbabilities) -> Self {
        Self {
            probs,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StanceModel for FixedStanceModel {
    async fn classify(&self, _pair: &TextPair<'_>) -> Result<ClassProbabilities> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.probs)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Fails every inference call.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStanceModel;

#[async_trait]
impl StanceModel for FailingStanceModel {
    async fn classify(&self, _pair: &TextPair<'_>) -> Result<ClassProbabilities> {
        bail!("stance inference failed")
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Axis regressor over a term lexicon: sum of the weights of every term
/// found in the lower-cased text, clamped to [-1, 1].
#[derive(Debug, Clone, Default)]
pub struct LexiconAxisModel {
    terms: Vec<(String, f64)>,
    fail: bool,
}

impl LexiconAxisModel {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|(t, w)| (t.into().to_lowercase(), w))
                .collect(),
            fail: false,
        }
    }

    /// A model that loads fine but errors on every inference.
    pub fn failing() -> Self {
        Self {
            terms: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl AxisModel for LexiconAxisModel {
    async fn score(&self, text: &str) -> Result<f64> {
        if self.fail {
            bail!("axis inference failed");
        }
        let text = text.to_lowercase();
        let sum: f64 = self
            .terms
            .iter()
            .filter(|(t, _)| text.contains(t.as_str()))
            .map(|(_, w)| *w)
            .sum();
        Ok(sum.clamp(-1.0, 1.0))
    }
}

/// Loader over in-process models, with load accounting for tests.
pub struct InMemoryModelLoader {
    stance: Option<Arc<dyn StanceModel>>,
    axes: BTreeMap<Axis, Arc<dyn AxisModel>>,
    failing_loads: BTreeSet<Axis>,
    load_delay: Option<Duration>,
    transient_failures: AtomicUsize,
    stance_loads: AtomicUsize,
    axis_loads: AtomicUsize,
    releases: AtomicUsize,
}

impl Default for InMemoryModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryModelLoader {
    /// No stance model, no axes.
    pub fn new() -> Self {
        Self {
            stance: None,
            axes: BTreeMap::new(),
            failing_loads: BTreeSet::new(),
            load_delay: None,
            transient_failures: AtomicUsize::new(0),
            stance_loads: AtomicUsize::new(0),
            axis_loads: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    /// Lexical rules as stance model and a small Dutch lexicon per axis.
    pub fn offline() -> Self {
        let mut loader = Self::new().with_stance(Arc::new(LexicalRules::new()));
        for (axis, terms) in DUTCH_LEXICON {
            loader = loader.with_axis(axis, Arc::new(LexiconAxisModel::new(terms.iter().copied())));
        }
        loader
    }

    pub fn with_stance(mut self, model: Arc<dyn StanceModel>) -> Self {
        self.stance = Some(model);
        self
    }

    pub fn with_axis(mut self, axis: Axis, model: Arc<dyn AxisModel>) -> Self {
        self.axes.insert(axis, model);
        self
    }

    /// Loading this axis fails.
    pub fn with_failing_load(mut self, axis: Axis) -> Self {
        self.failing_loads.insert(axis);
        self
    }

    /// Every load sleeps first, so concurrent callers overlap.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// The next `n` loads of any model fail, later ones succeed.
    pub fn with_transient_load_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn stance_loads(&self) -> usize {
        self.stance_loads.load(Ordering::SeqCst)
    }

    pub fn axis_loads(&self) -> usize {
        self.axis_loads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> Result<()> {
        if let Some(d) = self.load_delay {
            tokio::time::sleep(d).await;
        }
        let left = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if left.is_ok() {
            bail!("model load timed out");
        }
        Ok(())
    }
}

#[async_trait]
impl ModelLoader for InMemoryModelLoader {
    async fn load_stance_model(&self) -> Result<Arc<dyn StanceModel>> {
        self.stance_loads.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        self.stance
            .clone()
            .ok_or_else(|| anyhow!("no stance model configured"))
    }

    async fn load_axis_model(&self, axis: Axis) -> Result<Arc<dyn AxisModel>> {
        self.axis_loads.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        if self.failing_loads.contains(&axis) {
            bail!("weights for axis {axis} could not be loaded");
        }
        self.axes
            .get(&axis)
            .cloned()
            .ok_or_else(|| anyhow!("no model for axis {axis}"))
    }

    async fn release_accelerator_memory(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

// Positive = economically left, progressive, green, open to migration,
// pro-EU, libertarian, pro-institution.
const DUTCH_LEXICON: [(Axis, &[(&str, f64)]); AXIS_COUNT] = [
    (
        Axis::Economic,
        &[
            ("herverdel", 0.6),
            ("minimumloon", 0.5),
            ("belasting verlagen", -0.6),
            ("vrije markt", -0.6),
            ("te duur", -0.3),
        ],
    ),
    (
        Axis::Social,
        &[
            ("gelijke rechten", 0.6),
            ("euthanasie", 0.4),
            ("traditionele waarden", -0.6),
        ],
    ),
    (
        Axis::Environmental,
        &[
            ("klimaat", 0.6),
            ("duurzam", 0.5),
            ("natuur", 0.4),
            ("fossiel", -0.7),
            ("te duur", -0.5),
            ("stikstof", -0.2),
        ],
    ),
    (
        Axis::Immigration,
        &[
            ("asielzoeker", 0.3),
            ("opvang", 0.4),
            ("grenzen dicht", -0.8),
            ("migratiestop", -0.8),
        ],
    ),
    (
        Axis::Europe,
        &[
            ("europese samenwerking", 0.7),
            ("brussel", -0.4),
            ("nexit", -0.9),
        ],
    ),
    (
        Axis::Authority,
        &[
            ("privacy", 0.5),
            ("hardere straffen", -0.6),
            ("meer politie", -0.5),
        ],
    ),
    (
        Axis::Institutionality,
        &[
            ("rechtsstaat", 0.6),
            ("referendum", -0.4),
            ("kartel", -0.7),
        ],
    ),
];
