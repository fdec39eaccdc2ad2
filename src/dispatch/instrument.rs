//! Per-cycle instrumentation for job registration.
//!
//! A [`RegistrationLog`] lives for exactly one `register` call. Operations
//! record their elapsed time into it as the cycle proceeds; `commit` emits a
//! single structured warning only when the whole cycle ran slow, so the fast
//! path produces no log volume at all.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::dispatch::job::{ClaimAttempt, ClaimOutcome};

#[derive(Debug, Default)]
struct Observation {
    durations: Vec<Duration>,
    /// Once-mode observations hold a single overwritten sample; accumulate
    /// mode appends and is summarized as count/sum/max.
    once: bool,
}

/// Timing ledger for one registration cycle.
pub struct RegistrationLog {
    runner_id: u64,
    started: Instant,
    threshold: Duration,
    observations: BTreeMap<&'static str, Observation>,
    attempts: Vec<ClaimAttempt>,
}

impl RegistrationLog {
    pub fn new(runner_id: u64, threshold: Duration) -> Self {
        Self {
            runner_id,
            started: Instant::now(),
            threshold,
            observations: BTreeMap::new(),
            attempts: Vec::new(),
        }
    }

    /// Run `fut` and record its duration in accumulate mode.
    pub async fn observe<T, F>(&mut self, name: &'static str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let out = fut.await;
        self.record(name, start.elapsed());
        out
    }

    /// Run `fut` and record its duration in once mode.
    pub async fn observe_once<T, F>(&mut self, name: &'static str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let out = fut.await;
        self.record_once(name, start.elapsed());
        out
    }

    /// Accumulate a sample for a repeated phase.
    pub fn record(&mut self, name: &'static str, elapsed: Duration) {
        let obs = self.observations.entry(name).or_default();
        obs.once = false;
        obs.durations.push(elapsed);
    }

    /// Overwrite the sample for a one-shot phase.
    pub fn record_once(&mut self, name: &'static str, elapsed: Duration) {
        let obs = self.observations.entry(name).or_default();
        obs.once = true;
        obs.durations.clear();
        obs.durations.push(elapsed);
    }

    pub fn record_attempt(&mut self, attempt: ClaimAttempt) {
        tracing::debug!(
            job_id = %attempt.job_id,
            runner_id = attempt.runner_id,
            outcome = ?attempt.outcome,
            "Claim attempt"
        );
        self.attempts.push(attempt);
    }

    pub fn total_elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn is_slow(&self) -> bool {
        self.total_elapsed() >= self.threshold
    }

    fn attempt_count(&self, outcome: ClaimOutcome) -> usize {
        self.attempts.iter().filter(|a| a.outcome == outcome).count()
    }

    fn breakdown(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, obs) in &self.observations {
            let value = if obs.once {
                let ms = obs
                    .durations
                    .first()
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                serde_json::json!({ "duration_ms": ms })
            } else {
                let sum: Duration = obs.durations.iter().sum();
                let max = obs.durations.iter().max().copied().unwrap_or_default();
                serde_json::json!({
                    "count": obs.durations.len(),
                    "sum_ms": sum.as_millis() as u64,
                    "max_ms": max.as_millis() as u64,
                })
            };
            map.insert((*name).to_string(), value);
        }
        serde_json::Value::Object(map)
    }

    /// Emit the cycle report if the cycle ran slow; silent otherwise.
    /// Emitting goes through `tracing` only, so it can never abort dispatch.
    pub fn commit(&self) {
        if !self.is_slow() {
            return;
        }
        tracing::warn!(
            runner_id = self.runner_id,
            total_ms = self.total_elapsed().as_millis() as u64,
            attempts = self.attempts.len(),
            conflicts = self.attempt_count(ClaimOutcome::Conflict),
            tag_mismatches = self.attempt_count(ClaimOutcome::TagMismatch),
            breakdown = %self.breakdown(),
            "Slow registration cycle"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn log_with_threshold(threshold: Duration) -> RegistrationLog {
        RegistrationLog::new(7, threshold)
    }

    #[test]
    fn accumulate_mode_appends() {
        let mut log = log_with_threshold(Duration::from_secs(5));
        log.record("phase", Duration::from_millis(10));
        log.record("phase", Duration::from_millis(30));
        log.record("phase", Duration::from_millis(20));

        let breakdown = log.breakdown();
        assert_eq!(breakdown["phase"]["count"], 3);
        assert_eq!(breakdown["phase"]["sum_ms"], 60);
        assert_eq!(breakdown["phase"]["max_ms"], 30);
    }

    #[test]
    fn once_mode_overwrites() {
        let mut log = log_with_threshold(Duration::from_secs(5));
        log.record_once("total", Duration::from_millis(100));
        log.record_once("total", Duration::from_millis(250));

        let breakdown = log.breakdown();
        assert_eq!(breakdown["total"]["duration_ms"], 250);
        assert!(breakdown["total"].get("count").is_none());
    }

    #[test]
    fn slow_gate_respects_threshold() {
        let log = log_with_threshold(Duration::ZERO);
        assert!(log.is_slow());

        let log = log_with_threshold(Duration::from_secs(3600));
        assert!(!log.is_slow());
        // A fast cycle commits nothing; this must not panic either way.
        log.commit();
    }

    #[test]
    fn attempt_counters_by_outcome() {
        let mut log = log_with_threshold(Duration::from_secs(5));
        for outcome in [
            ClaimOutcome::Conflict,
            ClaimOutcome::Conflict,
            ClaimOutcome::TagMismatch,
            ClaimOutcome::Claimed,
        ] {
            log.record_attempt(ClaimAttempt {
                job_id: Uuid::new_v4(),
                runner_id: 7,
                outcome,
            });
        }
        assert_eq!(log.attempt_count(ClaimOutcome::Conflict), 2);
        assert_eq!(log.attempt_count(ClaimOutcome::TagMismatch), 1);
        assert_eq!(log.attempt_count(ClaimOutcome::Claimed), 1);
    }

    #[tokio::test]
    async fn observe_returns_future_output() {
        let mut log = log_with_threshold(Duration::from_secs(5));
        let value = log.observe("op", async { 41 + 1 }).await;
        assert_eq!(value, 42);
        assert_eq!(log.breakdown()["op"]["count"], 1);
    }
}
