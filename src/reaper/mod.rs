//! Timeout reaping: force-terminating jobs stuck in stale states.
//!
//! The reaper performs exactly two transitions, both through the store's
//! conditional bulk update so a job can never be concurrently reaped and
//! claimed:
//! - `running` -> `failed(job_execution_timeout)`
//! - `canceling` -> `failed(job_execution_server_timeout)` (feature-gated)
//!
//! Sweeps iterate partition by partition and are idempotent: with no new
//! stuck jobs, a second sweep transitions nothing.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{FeatureToggles, ReaperConfig, REAP_CANCELING};
use crate::dispatch::job::{FailureReason, JobStatus};
use crate::error::Result;
use crate::store::JobStore;

pub struct TimeoutReaper {
    store: Arc<dyn JobStore>,
    config: ReaperConfig,
    toggles: FeatureToggles,
}

impl TimeoutReaper {
    pub fn new(store: Arc<dyn JobStore>, config: ReaperConfig, toggles: FeatureToggles) -> Self {
        Self {
            store,
            config,
            toggles,
        }
    }

    /// Reap `running` jobs whose execution time exceeds their timeout plus
    /// the buffer. Returns how many jobs were transitioned.
    pub async fn sweep_running(&self, buffer_seconds: u32) -> Result<usize> {
        self.sweep(
            JobStatus::Running,
            FailureReason::JobExecutionTimeout,
            buffer_seconds,
        )
        .await
    }

    /// Reap `canceling` jobs the same way, under their own failure reason.
    /// Disabled entirely when the `reap_canceling` toggle is off.
    pub async fn sweep_canceling(&self, buffer_seconds: u32) -> Result<usize> {
        if !self.toggles.enabled(REAP_CANCELING) {
            tracing::debug!("Canceling reap disabled by feature toggle");
            return Ok(0);
        }
        self.sweep(
            JobStatus::Canceling,
            FailureReason::JobExecutionServerTimeout,
            buffer_seconds,
        )
        .await
    }

    async fn sweep(
        &self,
        status: JobStatus,
        reason: FailureReason,
        buffer_seconds: u32,
    ) -> Result<usize> {
        let mut total = 0;
        for partition_id in self.store.partition_ids().await? {
            let stuck = self
                .store
                .find_timed_out(
                    partition_id,
                    status,
                    self.config.default_timeout_seconds,
                    buffer_seconds,
                )
                .await?;
            if stuck.is_empty() {
                continue;
            }

            let job_ids: Vec<Uuid> = stuck.iter().map(|j| j.id).collect();
            let transitioned = self
                .store
                .bulk_transition(&job_ids, status, JobStatus::Failed, Some(reason))
                .await?;

            // Jobs that moved on between selection and transition are
            // skipped by the store, not failed; the sweep keeps going.
            if transitioned < job_ids.len() {
                tracing::warn!(
                    partition_id,
                    selected = job_ids.len(),
                    transitioned,
                    "Some jobs changed state before reaping"
                );
            }
            if transitioned > 0 {
                tracing::info!(
                    partition_id,
                    count = transitioned,
                    from = %status,
                    reason = %reason,
                    "Reaped timed-out jobs"
                );
            }
            total += transitioned;
        }
        Ok(total)
    }

    /// Periodic driver for both sweeps.
    ///
    /// Starts after a random fraction of the interval so replicas do not
    /// sweep in lockstep, then ticks until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.config.interval_ms / 10);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(jitter_ms)) => {}
        }

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reaper shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_cycle().await {
                        tracing::warn!(error = %e, "Reaper sweep cycle failed");
                    }
                }
            }
        }
    }

    async fn sweep_cycle(&self) -> Result<()> {
        let running = self.sweep_running(self.config.buffer_seconds).await?;
        let canceling = self.sweep_canceling(self.config.buffer_seconds).await?;
        if running + canceling > 0 {
            tracing::info!(running, canceling, "Sweep cycle complete");
        }
        Ok(())
    }
}
