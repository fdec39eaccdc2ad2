use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::DispatchConfig;
use crate::dispatch::instrument::RegistrationLog;
use crate::dispatch::job::{ClaimAttempt, ClaimOutcome, Job, JobStatus};
use crate::dispatch::runner::Runner;
use crate::error::Result;
use crate::store::JobStore;

/// Bounds on one match-and-claim scan: caps on what a single poll may cost
/// under a large backlog.
#[derive(Debug, Clone, Copy)]
pub struct ScanBounds {
    pub max_candidates: usize,
    pub time_budget: Duration,
}

impl From<&DispatchConfig> for ScanBounds {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_candidates: config.max_candidates,
            time_budget: config.time_budget(),
        }
    }
}

/// Finds the first claimable job for a runner within an ordered candidate
/// window.
pub struct MatchEngine {
    store: Arc<dyn JobStore>,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Walk candidates in dispatch order and atomically claim the first one
    /// the runner can take.
    ///
    /// `Ok(None)` covers every expected miss: no eligible candidate, lost
    /// every race, runner at capacity, or a tripped scan bound. Only store
    /// failures surface as `Err`.
    pub async fn find_and_claim(
        &self,
        runner: &Runner,
        candidates: Vec<Job>,
        bounds: &ScanBounds,
        log: &mut RegistrationLog,
    ) -> Result<Option<Job>> {
        let deadline = Instant::now() + bounds.time_budget;

        for (examined, mut job) in candidates.into_iter().enumerate() {
            if examined >= bounds.max_candidates {
                tracing::debug!(runner_id = runner.id, examined, "Candidate bound reached");
                return Ok(None);
            }
            if Instant::now() >= deadline {
                tracing::debug!(runner_id = runner.id, examined, "Scan wall-clock budget exhausted");
                return Ok(None);
            }
            // A runner at capacity cannot take this candidate or any later one.
            if runner.at_capacity() {
                tracing::debug!(runner_id = runner.id, "Runner at capacity, stopping scan");
                return Ok(None);
            }

            let check_started = Instant::now();
            if !runner.can_serve(&job) {
                log.record_attempt(ClaimAttempt {
                    job_id: job.id,
                    runner_id: runner.id,
                    outcome: ClaimOutcome::TagMismatch,
                });
                log.record("process_candidate", check_started.elapsed());
                continue;
            }

            let claimed = log
                .observe("try_claim", self.store.try_claim(job.id, runner.id))
                .await?;
            log.record("process_candidate", check_started.elapsed());

            if claimed {
                log.record_attempt(ClaimAttempt {
                    job_id: job.id,
                    runner_id: runner.id,
                    outcome: ClaimOutcome::Claimed,
                });
                // Reflect the transition on the returned copy; the store
                // holds the authoritative record.
                job.status = JobStatus::Running;
                job.runner_id = Some(runner.id);
                job.started_at = Some(Utc::now());
                return Ok(Some(job));
            }

            // Lost the race. Contention is not an error; advance and never
            // retry the same job.
            log.record_attempt(ClaimAttempt {
                job_id: job.id,
                runner_id: runner.id,
                outcome: ClaimOutcome::Conflict,
            });
        }

        Ok(None)
    }
}
