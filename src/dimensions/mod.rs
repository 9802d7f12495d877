//! Seven-axis ideology model.
//!
//! Every text is projected onto the same fixed axes by seven independent
//! single-axis regressors. Missing axes are kept as `0.0` with a parallel
//! availability flag so "neutral" and "no data" stay distinguishable.

pub mod registry;
pub mod scorer;

pub use registry::ModelRegistry;
pub use scorer::DimensionScorer;

use serde::{Deserialize, Serialize};
use std::fmt;

pub const AXIS_COUNT: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Economic,
    Social,
    Environmental,
    Immigration,
    Europe,
    Authority,
    Institutionality,
}

impl Axis {
    pub const ALL: [Axis; AXIS_COUNT] = [
        Axis::Economic,
        Axis::Social,
        Axis::Environmental,
        Axis::Immigration,
        Axis::Europe,
        Axis::Authority,
        Axis::Institutionality,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Axis::Economic => "economic",
            Axis::Social => "social",
            Axis::Environmental => "environmental",
            Axis::Immigration => "immigration",
            Axis::Europe => "europe",
            Axis::Authority => "authority",
            Axis::Institutionality => "institutionality",
        }
    }

    /// Position in every 7-vector.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Clamp a raw regressor output into [-1, 1]. Non-finite values are rejected.
pub fn clamp_axis(raw: f64) -> Option<f64> {
    if raw.is_finite() {
        Some(raw.clamp(-1.0, 1.0))
    } else {
        None
    }
}

/// Persisted ideology vector of a party position. Immutable; replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeologyVector {
    pub values: [f64; AXIS_COUNT],
    pub confidence: f64,
    pub evidence: String,
}

impl IdeologyVector {
    pub fn new(values: [f64; AXIS_COUNT], confidence: f64, evidence: impl Into<String>) -> Self {
        let mut clamped = [0.0; AXIS_COUNT];
        for (dst, v) in clamped.iter_mut().zip(values) {
            *dst = clamp_axis(v).unwrap_or(0.0);
        }
        Self {
            values: clamped,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: evidence.into(),
        }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        self.values[axis.index()]
    }

    /// Full availability view for similarity computation.
    pub fn to_scores(&self) -> AxisScores {
        AxisScores {
            values: self.values,
            available: [true; AXIS_COUNT],
        }
    }
}

/// Scorer output: always seven slots, with per-axis availability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisScores {
    pub values: [f64; AXIS_COUNT],
    pub available: [bool; AXIS_COUNT],
}

impl Default for AxisScores {
    fn default() -> Self {
        Self::unavailable()
    }
}

impl AxisScores {
    /// Every axis missing.
    pub fn unavailable() -> Self {
        Self {
            values: [0.0; AXIS_COUNT],
            available: [false; AXIS_COUNT],
        }
    }

    pub fn complete(values: [f64; AXIS_COUNT]) -> Self {
        let mut out = Self::unavailable();
        for axis in Axis::ALL {
            out.set(axis, values[axis.index()]);
        }
        out
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match clamp_axis(value) {
            Some(v) => {
                self.values[axis.index()] = v;
                self.available[axis.index()] = true;
            }
            None => self.mark_unavailable(axis),
        }
    }

    pub fn mark_unavailable(&mut self, axis: Axis) {
        self.values[axis.index()] = 0.0;
        self.available[axis.index()] = false;
    }

    pub fn get(&self, axis: Axis) -> Option<f64> {
        self.available[axis.index()].then(|| self.values[axis.index()])
    }

    pub fn is_complete(&self) -> bool {
        self.available.iter().all(|a| *a)
    }

    pub fn available_count(&self) -> usize {
        self.available.iter().filter(|a| **a).count()
    }

    /// Convert into a persistable vector; only complete score sets qualify.
    pub fn into_vector(self, confidence: f64, evidence: &str) -> Option<IdeologyVector> {
        self.is_complete()
            .then(|| IdeologyVector::new(self.values, confidence, evidence))
    }
}
