//! Shared builders and instrumented store wrappers for dispatch tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use dispatch_lite::config::DispatchConfig;
use dispatch_lite::dispatch::arbiter::LeaseArbiter;
use dispatch_lite::dispatch::job::{FailureReason, Job, JobStatus};
use dispatch_lite::dispatch::runner::Runner;
use dispatch_lite::error::Result;
use dispatch_lite::store::{JobStore, MemoryStore, RunnerRegistry};

pub fn pending_job(partition_id: u32, priority: i32) -> Job {
    Job::new(partition_id, priority)
}

/// A running job started `age_seconds` ago with the given timeout override.
pub fn running_job(partition_id: u32, timeout_seconds: u32, age_seconds: i64) -> Job {
    let mut job = Job::new(partition_id, 0).with_timeout_seconds(timeout_seconds);
    job.status = JobStatus::Running;
    job.started_at = Some(Utc::now() - Duration::seconds(age_seconds));
    job
}

/// A canceling job started `age_seconds` ago with the given timeout override.
pub fn canceling_job(partition_id: u32, timeout_seconds: u32, age_seconds: i64) -> Job {
    let mut job = running_job(partition_id, timeout_seconds, age_seconds);
    job.status = JobStatus::Canceling;
    job
}

pub async fn store_with_jobs(jobs: Vec<Job>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for job in jobs {
        store.insert_job(job).await;
    }
    store
}

/// Arbiter whose store and registry are the same in-memory instance.
pub fn arbiter_for(store: &Arc<MemoryStore>, config: DispatchConfig) -> LeaseArbiter {
    let job_store: Arc<dyn JobStore> = store.clone();
    let registry: Arc<dyn RunnerRegistry> = store.clone();
    LeaseArbiter::new(job_store, registry, config)
}

pub fn untagged_runner(id: u64, budget: u32) -> Runner {
    Runner::new(id, budget)
}

pub fn tagged_runner(id: u64, budget: u32, tags: &[&str]) -> Runner {
    Runner::new(id, budget).with_tags(tags.iter().copied())
}

// =============================================================================
// Instrumented store wrappers
// =============================================================================

/// JobStore wrapper counting every store round-trip, for asserting that
/// fast paths never touch the store.
pub struct CountingStore {
    inner: Arc<MemoryStore>,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for CountingStore {
    async fn partition_ids(&self) -> Result<Vec<u32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.partition_ids().await
    }

    async fn fetch_candidates(&self, partition_ids: &[u32], limit: usize) -> Result<Vec<Job>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_candidates(partition_ids, limit).await
    }

    async fn try_claim(&self, job_id: Uuid, runner_id: u64) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.try_claim(job_id, runner_id).await
    }

    async fn find_timed_out(
        &self,
        partition_id: u32,
        status: JobStatus,
        default_timeout_seconds: u32,
        buffer_seconds: u32,
    ) -> Result<Vec<Job>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .find_timed_out(partition_id, status, default_timeout_seconds, buffer_seconds)
            .await
    }

    async fn bulk_transition(
        &self,
        job_ids: &[Uuid],
        expected: JobStatus,
        new_status: JobStatus,
        failure_reason: Option<FailureReason>,
    ) -> Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .bulk_transition(job_ids, expected, new_status, failure_reason)
            .await
    }
}

/// JobStore wrapper that finishes one victim job right after it is selected
/// for reaping, simulating a concurrent modification between select and
/// transition.
pub struct RacingStore {
    inner: Arc<MemoryStore>,
    victim: Uuid,
}

impl RacingStore {
    pub fn new(inner: Arc<MemoryStore>, victim: Uuid) -> Self {
        Self { inner, victim }
    }
}

#[async_trait]
impl JobStore for RacingStore {
    async fn partition_ids(&self) -> Result<Vec<u32>> {
        self.inner.partition_ids().await
    }

    async fn fetch_candidates(&self, partition_ids: &[u32], limit: usize) -> Result<Vec<Job>> {
        self.inner.fetch_candidates(partition_ids, limit).await
    }

    async fn try_claim(&self, job_id: Uuid, runner_id: u64) -> Result<bool> {
        self.inner.try_claim(job_id, runner_id).await
    }

    async fn find_timed_out(
        &self,
        partition_id: u32,
        status: JobStatus,
        default_timeout_seconds: u32,
        buffer_seconds: u32,
    ) -> Result<Vec<Job>> {
        let jobs = self
            .inner
            .find_timed_out(partition_id, status, default_timeout_seconds, buffer_seconds)
            .await?;
        if jobs.iter().any(|j| j.id == self.victim) {
            let _ = self.inner.finish_job(self.victim, JobStatus::Success).await;
        }
        Ok(jobs)
    }

    async fn bulk_transition(
        &self,
        job_ids: &[Uuid],
        expected: JobStatus,
        new_status: JobStatus,
        failure_reason: Option<FailureReason>,
    ) -> Result<usize> {
        self.inner
            .bulk_transition(job_ids, expected, new_status, failure_reason)
            .await
    }
}
