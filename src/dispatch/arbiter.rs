use std::sync::Arc;
use std::time::Instant;

use crate::config::DispatchConfig;
use crate::dispatch::instrument::RegistrationLog;
use crate::dispatch::job::Job;
use crate::dispatch::match_engine::{MatchEngine, ScanBounds};
use crate::dispatch::runner::Runner;
use crate::error::Result;
use crate::store::{JobStore, RunnerRegistry};

/// Outcome of one runner poll. Expected misses are variants, not errors;
/// store failures surface as `Err` and mean "try again later".
#[derive(Debug)]
pub enum LeaseResult {
    /// The runner was handed this job. Exactly one pending -> running
    /// transition happened on its behalf.
    Assigned(Job),
    /// No eligible job within the configured bounds
    NoJobAvailable,
    /// The runner is already at its concurrency budget; the job store was
    /// not touched
    RunnerAtCapacity,
}

/// Top-level dispatcher: one runner poll = one attempt to obtain one job.
pub struct LeaseArbiter {
    store: Arc<dyn JobStore>,
    registry: Arc<dyn RunnerRegistry>,
    engine: MatchEngine,
    config: DispatchConfig,
}

impl LeaseArbiter {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<dyn RunnerRegistry>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            engine: MatchEngine::new(store.clone()),
            store,
            registry,
            config,
        }
    }

    /// Attempt to lease one job to the runner.
    ///
    /// The whole cycle is instrumented; a cycle slower than the configured
    /// threshold emits one structured warning on commit.
    pub async fn register(&self, runner_id: u64) -> Result<LeaseResult> {
        let mut log = RegistrationLog::new(runner_id, self.config.slow_log_threshold());
        let result = self.register_inner(runner_id, &mut log).await;
        log.commit();
        result
    }

    async fn register_inner(
        &self,
        runner_id: u64,
        log: &mut RegistrationLog,
    ) -> Result<LeaseResult> {
        let runner = self.registry.runner_snapshot(runner_id).await?;

        // Fast path: nothing to gain from the store when the runner cannot
        // take work anyway.
        if runner.at_capacity() {
            tracing::debug!(
                runner_id,
                running = runner.current_running_count,
                budget = runner.concurrency_budget,
                "Runner at capacity"
            );
            return Ok(LeaseResult::RunnerAtCapacity);
        }

        let candidates = self.fetch_candidates(&runner, log).await?;

        let bounds = ScanBounds::from(&self.config);
        let scan_started = Instant::now();
        let claimed = self
            .engine
            .find_and_claim(&runner, candidates, &bounds, log)
            .await;
        log.record_once("match_and_claim", scan_started.elapsed());

        match claimed? {
            Some(job) => {
                // Bookkeeping belongs to the same logical operation as the
                // claim; the registry enforces the budget a second time in
                // case another poll for this runner raced us.
                if !self.registry.increment_running_count(runner_id).await? {
                    tracing::warn!(
                        runner_id,
                        job_id = %job.id,
                        "Runner reached budget between snapshot and claim"
                    );
                }
                tracing::info!(job_id = %job.id, runner_id, "Job leased");
                Ok(LeaseResult::Assigned(job))
            }
            None => Ok(LeaseResult::NoJobAvailable),
        }
    }

    async fn fetch_candidates(
        &self,
        runner: &Runner,
        log: &mut RegistrationLog,
    ) -> Result<Vec<Job>> {
        let partitions = match &runner.eligible_partitions {
            Some(partitions) => partitions.clone(),
            None => self.store.partition_ids().await?,
        };
        log.observe_once(
            "fetch_candidates",
            self.store
                .fetch_candidates(&partitions, self.config.max_candidates),
        )
        .await
    }
}
