//! Dispatch-and-poll job runner over the match engine.
//!
//! `submit` returns a job id at once; the work runs on a spawned task,
//! bounded by a semaphore with `pool_size` permits. Failures are retried with
//! exponential backoff up to `max_attempts`; a result that lost the
//! last-writer check ends the job as `Discarded`.
//!
//! A finished status is handed out once by `wait` and then forgotten. Unread
//! finished statuses are capped at `FINISHED_RETAINED`, oldest dropped first.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::engine::{MatchEngine, MatchOutcome};
use crate::store::{ProfileId, ResponseId};

pub type JobId = u64;

/// Finished statuses kept for polling before the oldest are dropped.
pub const FINISHED_RETAINED: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Job {
    /// classify → match → re-aggregate
    ProcessResponse(ResponseId),
    /// match → re-aggregate
    MatchResponse(ResponseId),
    RecalculateProfile(ProfileId),
}

impl Job {
    fn kind(&self) -> &'static str {
        match self {
            Job::ProcessResponse(_) => "process_response",
            Job::MatchResponse(_) => "match_response",
            Job::RecalculateProfile(_) => "recalculate_profile",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running { attempt: u32 },
    /// Party matches written by the job.
    Succeeded { party_matches: usize },
    Failed { error: String, attempts: u32 },
    /// Result arrived after its response changed.
    Discarded,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded { .. } | JobStatus::Failed { .. } | JobStatus::Discarded
        )
    }

    fn outcome(&self) -> &'static str {
        match self {
            JobStatus::Succeeded { .. } => "succeeded",
            JobStatus::Failed { .. } => "failed",
            JobStatus::Discarded => "discarded",
            JobStatus::Queued | JobStatus::Running { .. } => "pending",
        }
    }
}

enum Attempt {
    Done(usize),
    Stale,
}

#[derive(Clone)]
pub struct MatchWorker {
    engine: Arc<MatchEngine>,
    cfg: WorkerConfig,
    permits: Arc<Semaphore>,
    jobs: Arc<RwLock<BTreeMap<JobId, JobStatus>>>,
    next_id: Arc<AtomicU64>,
}

impl MatchWorker {
    pub fn new(engine: Arc<MatchEngine>, cfg: WorkerConfig) -> Self {
        let pool = cfg.pool_size.max(1);
        Self {
            engine,
            permits: Arc::new(Semaphore::new(pool)),
            cfg,
            jobs: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn engine(&self) -> &Arc<MatchEngine> {
        &self.engine
    }

    /// Queue a job and return its id. Must be called inside a Tokio runtime.
    pub fn submit(&self, job: Job) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.set_status(id, JobStatus::Queued);

        let worker = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = worker.permits.clone().acquire_owned().await else {
                worker.set_status(
                    id,
                    JobStatus::Failed {
                        error: "worker pool closed".into(),
                        attempts: 0,
                    },
                );
                return;
            };
            let started = Instant::now();
            let status = worker.run(id, job).await;
            worker.engine.registry().release_accelerator_memory().await;

            counter!("matcher_jobs_total", "kind" => job.kind(), "outcome" => status.outcome())
                .increment(1);
            histogram!("matcher_job_ms", "kind" => job.kind())
                .record(started.elapsed().as_millis() as f64);
            worker.set_status(id, status);
        });
        id
    }

    /// Last known status; `None` for ids this worker never issued.
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.read().ok()?.get(&id).cloned()
    }

    /// Poll until the job reaches a final state, then forget it.
    pub async fn wait(&self, id: JobId) -> Result<JobStatus> {
        loop {
            match self.status(id) {
                None => return Err(anyhow!("unknown job {id}")),
                Some(s) if s.is_finished() => {
                    if let Ok(mut g) = self.jobs.write() {
                        g.remove(&id);
                    }
                    return Ok(s);
                }
                Some(_) => tokio::time::sleep(self.cfg.poll_interval()).await,
            }
        }
    }

    /// Statuses currently held, finished or not.
    pub fn tracked_jobs(&self) -> usize {
        self.jobs.read().map(|g| g.len()).unwrap_or(0)
    }

    pub async fn wait_all(&self, ids: &[JobId]) -> Result<Vec<JobStatus>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.wait(*id).await?);
        }
        Ok(out)
    }

    /// Dispatch one `ProcessResponse` job per unlabeled response of a profile.
    pub async fn pending_classifications(&self, profile: ProfileId) -> Result<Vec<JobId>> {
        let pending = self.engine.unlabeled_responses(profile).await?;
        info!(target: "worker", profile, count = pending.len(), "dispatching pending classifications");
        Ok(pending
            .into_iter()
            .map(|id| self.submit(Job::ProcessResponse(id)))
            .collect())
    }

    async fn run(&self, id: JobId, job: Job) -> JobStatus {
        let max = self.cfg.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.set_status(id, JobStatus::Running { attempt });
            match self.attempt(job).await {
                Ok(Attempt::Done(party_matches)) => {
                    return JobStatus::Succeeded { party_matches };
                }
                Ok(Attempt::Stale) => {
                    info!(target: "worker", job = id, kind = job.kind(), "stale result discarded");
                    return JobStatus::Discarded;
                }
                Err(e) if attempt < max => {
                    let delay = backoff(self.cfg.backoff_base(), attempt);
                    warn!(
                        target: "worker",
                        job = id,
                        kind = job.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "job failed; retrying"
                    );
                    counter!("matcher_job_retries_total", "kind" => job.kind()).increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(target: "worker", job = id, kind = job.kind(), attempts = attempt, error = %e, "job failed");
                    return JobStatus::Failed {
                        error: format!("{e:#}"),
                        attempts: attempt,
                    };
                }
            }
        }
    }

    async fn attempt(&self, job: Job) -> Result<Attempt> {
        match job {
            Job::ProcessResponse(rid) => {
                let out = self.engine.process_response(rid).await?;
                if out.is_stale() {
                    Ok(Attempt::Stale)
                } else {
                    Ok(Attempt::Done(out.party_matches_updated))
                }
            }
            Job::MatchResponse(rid) => match self.engine.match_response(rid).await? {
                MatchOutcome::Stale => Ok(Attempt::Stale),
                MatchOutcome::Matched(_) | MatchOutcome::Unlabeled => {
                    let profile = self
                        .engine
                        .store()
                        .response(rid)
                        .await?
                        .ok_or_else(|| anyhow!("response {rid} not found"))?
                        .profile_id;
                    let n = self.engine.recalculate_profile_matches(profile).await?;
                    Ok(Attempt::Done(n))
                }
            },
            Job::RecalculateProfile(pid) => {
                let n = self.engine.recalculate_profile_matches(pid).await?;
                Ok(Attempt::Done(n))
            }
        }
    }

    fn set_status(&self, id: JobId, status: JobStatus) {
        match self.jobs.write() {
            Ok(mut g) => {
                let finished = status.is_finished();
                g.insert(id, status);
                if finished {
                    prune_finished(&mut g, FINISHED_RETAINED);
                }
            }
            Err(_) => warn!(target: "worker", job = id, "job table lock poisoned"),
        }
    }
}

/// Drop the oldest finished statuses beyond `keep`. Pending jobs stay.
fn prune_finished(jobs: &mut BTreeMap<JobId, JobStatus>, keep: usize) {
    let finished: Vec<JobId> = jobs
        .iter()
        .filter(|(_, s)| s.is_finished())
        .map(|(id, _)| *id)
        .collect();
    let excess = finished.len().saturating_sub(keep);
    for id in &finished[..excess] {
        jobs.remove(id);
    }
}

/// `base * 2^(attempt-1)`.
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
}
