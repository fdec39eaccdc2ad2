//! Storage contracts consumed by the dispatch core.
//!
//! The arbiter and reaper never talk to a database directly; they go through
//! [`JobStore`] and [`RunnerRegistry`]. Correctness-relevant filtering (tag
//! matching, candidate ordering) lives in the dispatch layer, not behind
//! these traits -- a store only has to honor status transitions and the
//! fixed candidate order.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::dispatch::job::{FailureReason, Job, JobStatus};
use crate::dispatch::runner::Runner;
use crate::error::Result;

pub use memory::MemoryStore;

/// Durable job storage with atomic conditional transitions.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Partitions currently holding jobs. The store owns partition
    /// enumeration; callers only iterate what they are handed.
    async fn partition_ids(&self) -> Result<Vec<u32>>;

    /// Pending jobs in the given partitions, in dispatch order
    /// ([`dispatch_order`]), at most `limit` of them.
    ///
    /// [`dispatch_order`]: crate::dispatch::job::dispatch_order
    async fn fetch_candidates(&self, partition_ids: &[u32], limit: usize) -> Result<Vec<Job>>;

    /// Atomically transition the job from `pending` to `running` and bind it
    /// to the runner. Returns `Ok(true)` iff this call performed the
    /// transition; a lost race is `Ok(false)`, never an error.
    async fn try_claim(&self, job_id: Uuid, runner_id: u64) -> Result<bool>;

    /// Jobs in `status` within the partition whose running time exceeds
    /// their effective timeout plus `buffer_seconds`.
    async fn find_timed_out(
        &self,
        partition_id: u32,
        status: JobStatus,
        default_timeout_seconds: u32,
        buffer_seconds: u32,
    ) -> Result<Vec<Job>>;

    /// Transition every listed job from `expected` to `new_status`, skipping
    /// (not failing) jobs that no longer match. Returns how many jobs this
    /// call actually transitioned.
    async fn bulk_transition(
        &self,
        job_ids: &[Uuid],
        expected: JobStatus,
        new_status: JobStatus,
        failure_reason: Option<FailureReason>,
    ) -> Result<usize>;
}

/// Runner bookkeeping consumed by the arbiter.
#[async_trait]
pub trait RunnerRegistry: Send + Sync {
    /// Snapshot of the runner's descriptor and current load.
    async fn runner_snapshot(&self, runner_id: u64) -> Result<Runner>;

    /// Account one more running job to the runner. Returns `Ok(false)` if
    /// the increment would exceed the runner's budget.
    async fn increment_running_count(&self, runner_id: u64) -> Result<bool>;
}
