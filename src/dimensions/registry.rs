//! Process-scoped model registry.
//!
//! Built once at startup and passed by `Arc` into the classifier and scorer.
//! Each model lives in its own `tokio::sync::OnceCell`: the first caller runs
//! the load, concurrent callers wait on the same cell and reuse its result.
//! Only a successful load is kept; after a failure the next caller loads again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::{Axis, AXIS_COUNT};
use crate::models::{AxisModel, ModelLoader, StanceModel};

pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    stance: OnceCell<Arc<dyn StanceModel>>,
    axes: [OnceCell<Arc<dyn AxisModel>>; AXIS_COUNT],
    loads: AtomicUsize,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            stance: OnceCell::new(),
            axes: std::array::from_fn(|_| OnceCell::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Stance model, or `None` when this load attempt failed.
    pub async fn stance_model(&self) -> Option<Arc<dyn StanceModel>> {
        let loaded = self
            .stance
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::Relaxed);
                let started = Instant::now();
                let model = self.loader.load_stance_model().await?;
                info!(
                    target: "models",
                    loader = self.loader.name(),
                    model = model.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "stance model loaded"
                );
                Ok::<_, anyhow::Error>(model)
            })
            .await;
        match loaded {
            Ok(model) => Some(model.clone()),
            Err(e) => {
                warn!(target: "models", error = ?e, "stance model unavailable");
                None
            }
        }
    }

    /// Regressor for one axis, or `None` when this load attempt failed.
    pub async fn axis_model(&self, axis: Axis) -> Option<Arc<dyn AxisModel>> {
        let loaded = self.axes[axis.index()]
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::Relaxed);
                let started = Instant::now();
                let model = self.loader.load_axis_model(axis).await?;
                info!(
                    target: "models",
                    %axis,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "axis model loaded"
                );
                Ok::<_, anyhow::Error>(model)
            })
            .await;
        match loaded {
            Ok(model) => Some(model.clone()),
            Err(e) => {
                warn!(target: "models", %axis, error = ?e, "axis model unavailable; axis excluded");
                None
            }
        }
    }

    /// Eagerly load every model (optional; first use loads lazily otherwise).
    pub async fn warm_up(&self) -> usize {
        let mut ready = 0;
        if self.stance_model().await.is_some() {
            ready += 1;
        }
        for axis in Axis::ALL {
            if self.axis_model(axis).await.is_some() {
                ready += 1;
            }
        }
        ready
    }

    /// Axes whose model is loaded and usable. Does not trigger loading.
    pub fn loaded_axes(&self) -> Vec<Axis> {
        Axis::ALL
            .into_iter()
            .filter(|a| self.axes[a.index()].initialized())
            .collect()
    }

    /// Number of load attempts performed so far, failed ones included.
    pub fn load_attempts(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub async fn release_accelerator_memory(&self) {
        self.loader.release_accelerator_memory().await;
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("loader", &self.loader.name())
            .field("loaded_axes", &self.loaded_axes())
            .field("load_attempts", &self.load_attempts())
            .finish()
    }
}
