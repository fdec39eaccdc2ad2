//! In-process implementation of the storage contracts.
//!
//! Backs the test suite and the simulation binary. One lock guards jobs and
//! runners together, so every trait method is a single atomic step against
//! the whole store -- the same discipline a SQL-backed store gets from
//! conditional `UPDATE ... WHERE status = ...` statements.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dispatch::job::{dispatch_order, FailureReason, Job, JobStatus};
use crate::dispatch::runner::Runner;
use crate::error::{DispatchError, Result};
use crate::store::{JobStore, RunnerRegistry};

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<Uuid, Job>,
    runners: HashMap<u64, Runner>,
}

/// In-memory job store and runner registry behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_job(&self, job: Job) {
        let mut inner = self.inner.write().await;
        inner.jobs.insert(job.id, job);
    }

    pub async fn register_runner(&self, runner: Runner) {
        let mut inner = self.inner.write().await;
        inner.runners.insert(runner.id, runner);
    }

    /// Current copy of a job, if it exists.
    pub async fn job(&self, job_id: Uuid) -> Option<Job> {
        self.inner.read().await.jobs.get(&job_id).cloned()
    }

    pub async fn running_count(&self, runner_id: u64) -> Option<u32> {
        self.inner
            .read()
            .await
            .runners
            .get(&runner_id)
            .map(|r| r.current_running_count)
    }

    /// Jobs currently in `status`, across all partitions.
    pub async fn jobs_with_status(&self, status: JobStatus) -> Vec<Job> {
        self.inner
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect()
    }

    /// Move a running job to a terminal status and release its slot on the
    /// bound runner. Conditional on the job still being `running`, so a job
    /// the reaper got to first is left alone. Returns whether this call
    /// performed the transition.
    pub async fn finish_job(&self, job_id: Uuid, status: JobStatus) -> Result<bool> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let job = match inner.jobs.get_mut(&job_id) {
            Some(job) => job,
            None => return Err(DispatchError::JobNotFound(job_id)),
        };
        if job.status != JobStatus::Running {
            return Ok(false);
        }
        job.status = status;
        job.finished_at = Some(Utc::now());
        let runner_id = job.runner_id;
        if let Some(runner) = runner_id.and_then(|id| inner.runners.get_mut(&id)) {
            runner.current_running_count = runner.current_running_count.saturating_sub(1);
        }
        Ok(true)
    }

    /// Flip a running job to `canceling`, as the pipeline layer would on a
    /// user cancel request.
    pub async fn request_cancel(&self, job_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let job = match inner.jobs.get_mut(&job_id) {
            Some(job) => job,
            None => return Err(DispatchError::JobNotFound(job_id)),
        };
        if job.status != JobStatus::Running {
            return Ok(false);
        }
        job.status = JobStatus::Canceling;
        Ok(true)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn partition_ids(&self) -> Result<Vec<u32>> {
        let inner = self.inner.read().await;
        let ids: BTreeSet<u32> = inner.jobs.values().map(|j| j.partition_id).collect();
        Ok(ids.into_iter().collect())
    }

    async fn fetch_candidates(&self, partition_ids: &[u32], limit: usize) -> Result<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && partition_ids.contains(&j.partition_id))
            .cloned()
            .collect();
        candidates.sort_by(dispatch_order);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn try_claim(&self, job_id: Uuid, runner_id: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let job = match inner.jobs.get_mut(&job_id) {
            Some(job) => job,
            None => return Err(DispatchError::JobNotFound(job_id)),
        };
        // Compare-and-swap on status: only the first claimant wins.
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.runner_id = Some(runner_id);
        Ok(true)
    }

    async fn find_timed_out(
        &self,
        partition_id: u32,
        status: JobStatus,
        default_timeout_seconds: u32,
        buffer_seconds: u32,
    ) -> Result<Vec<Job>> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|j| {
                j.partition_id == partition_id
                    && j.status == status
                    && j.overdue(default_timeout_seconds, buffer_seconds, now)
            })
            .cloned()
            .collect())
    }

    async fn bulk_transition(
        &self,
        job_ids: &[Uuid],
        expected: JobStatus,
        new_status: JobStatus,
        failure_reason: Option<FailureReason>,
    ) -> Result<usize> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let mut transitioned = 0;
        for job_id in job_ids {
            let job = match inner.jobs.get_mut(job_id) {
                Some(job) => job,
                None => {
                    tracing::warn!(job_id = %job_id, "Skipping unknown job in bulk transition");
                    continue;
                }
            };
            // Same conditional-update discipline as try_claim: a job that
            // moved on since it was selected is skipped, not failed.
            if job.status != expected {
                tracing::debug!(
                    job_id = %job_id,
                    expected = %expected,
                    actual = %job.status,
                    "Job changed state before bulk transition"
                );
                continue;
            }
            job.status = new_status;
            job.failure_reason = failure_reason;
            job.finished_at = Some(Utc::now());
            let runner_id = job.runner_id;
            if let Some(runner) = runner_id.and_then(|id| inner.runners.get_mut(&id)) {
                runner.current_running_count = runner.current_running_count.saturating_sub(1);
            }
            transitioned += 1;
        }
        Ok(transitioned)
    }
}

#[async_trait]
impl RunnerRegistry for MemoryStore {
    async fn runner_snapshot(&self, runner_id: u64) -> Result<Runner> {
        self.inner
            .read()
            .await
            .runners
            .get(&runner_id)
            .cloned()
            .ok_or(DispatchError::RunnerNotFound(runner_id))
    }

    async fn increment_running_count(&self, runner_id: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let runner = match inner.runners.get_mut(&runner_id) {
            Some(runner) => runner,
            None => return Err(DispatchError::RunnerNotFound(runner_id)),
        };
        if runner.at_capacity() {
            return Ok(false);
        }
        runner.current_running_count += 1;
        Ok(true)
    }
}
