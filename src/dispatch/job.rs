use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Canceling,
    Success,
    Failed,
    Canceled,
    Skipped,
}

impl JobStatus {
    /// Terminal statuses are never transitioned out of.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled | JobStatus::Skipped
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Canceling => write!(f, "canceling"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Canceled => write!(f, "canceled"),
            JobStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a job was force-failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// A running job exceeded its execution timeout
    JobExecutionTimeout,
    /// A canceling job never reached a terminal state in time
    JobExecutionServerTimeout,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::JobExecutionTimeout => write!(f, "job_execution_timeout"),
            FailureReason::JobExecutionServerTimeout => write!(f, "job_execution_server_timeout"),
        }
    }
}

/// One schedulable unit of CI work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub partition_id: u32,
    pub status: JobStatus,
    /// Tags the job requires from a runner. Empty means any runner may take it.
    pub tags: HashSet<String>,
    /// Per-job timeout override; falls back to the instance default
    pub timeout_seconds: Option<u32>,
    /// Lower is dispatched first; ties broken by creation order
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, by the claim that moved the job out of `pending`
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<FailureReason>,
    /// Runner the job is bound to, set by a successful claim
    pub runner_id: Option<u64>,
}

impl Job {
    pub fn new(partition_id: u32, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            partition_id,
            status: JobStatus::Pending,
            tags: HashSet::new(),
            timeout_seconds: None,
            priority,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            failure_reason: None,
            runner_id: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u32) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// The timeout that actually applies to this job.
    pub fn effective_timeout_seconds(&self, default_timeout_seconds: u32) -> u32 {
        self.timeout_seconds.unwrap_or(default_timeout_seconds)
    }

    /// Whether this job has been stuck past its timeout plus the skew buffer.
    ///
    /// Strictly greater than the boundary: a job exactly at
    /// `timeout + buffer` is left alone until the next sweep.
    pub fn overdue(
        &self,
        default_timeout_seconds: u32,
        buffer_seconds: u32,
        now: DateTime<Utc>,
    ) -> bool {
        let started_at = match self.started_at {
            Some(t) => t,
            None => return false,
        };
        let allowed = i64::from(self.effective_timeout_seconds(default_timeout_seconds))
            + i64::from(buffer_seconds);
        now - started_at > Duration::seconds(allowed)
    }
}

/// Candidate ordering for dispatch: priority ascending, then creation order,
/// then id so the order is total and deterministic.
pub fn dispatch_order(a: &Job, b: &Job) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Outcome of a single claim attempt, recorded for instrumentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimOutcome {
    /// This attempt performed the pending -> running transition
    Claimed,
    /// Another claimant won the race; not an error
    Conflict,
    /// The job requires a tag the runner does not have; no claim attempted
    TagMismatch,
}

/// Ephemeral record of one claim attempt. Never persisted.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClaimAttempt {
    pub job_id: Uuid,
    pub runner_id: u64,
    pub outcome: ClaimOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_pending_and_unbound() {
        let job = Job::new(0, 1);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.tags.is_empty());
        assert!(job.started_at.is_none());
        assert!(job.runner_id.is_none());
        assert!(job.failure_reason.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Canceling.is_terminal());
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
    }

    #[test]
    fn effective_timeout_prefers_override() {
        let job = Job::new(0, 0).with_timeout_seconds(120);
        assert_eq!(job.effective_timeout_seconds(3_600), 120);

        let job = Job::new(0, 0);
        assert_eq!(job.effective_timeout_seconds(3_600), 3_600);
    }

    #[test]
    fn overdue_respects_buffer_boundary() {
        let now = Utc::now();
        let mut job = Job::new(0, 0).with_timeout_seconds(60);
        job.status = JobStatus::Running;

        // One second past timeout + buffer: overdue
        job.started_at = Some(now - Duration::seconds(60 + 900 + 1));
        assert!(job.overdue(3_600, 900, now));

        // One second short of the boundary: not overdue
        job.started_at = Some(now - Duration::seconds(60 + 900 - 1));
        assert!(!job.overdue(3_600, 900, now));

        // Exactly at the boundary: not overdue
        job.started_at = Some(now - Duration::seconds(60 + 900));
        assert!(!job.overdue(3_600, 900, now));
    }

    #[test]
    fn overdue_requires_started_at() {
        let job = Job::new(0, 0).with_timeout_seconds(0);
        assert!(!job.overdue(0, 0, Utc::now() + Duration::days(365)));
    }

    #[test]
    fn dispatch_order_priority_then_age() {
        let now = Utc::now();
        let old_urgent = Job::new(0, 0).with_created_at(now - Duration::seconds(10));
        let new_urgent = Job::new(0, 0).with_created_at(now);
        let old_lazy = Job::new(0, 5).with_created_at(now - Duration::seconds(60));

        assert_eq!(dispatch_order(&old_urgent, &new_urgent), Ordering::Less);
        assert_eq!(dispatch_order(&old_urgent, &old_lazy), Ordering::Less);
        assert_eq!(dispatch_order(&old_lazy, &new_urgent), Ordering::Greater);
    }

    #[test]
    fn status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Canceling.to_string(), "canceling");
        assert_eq!(
            FailureReason::JobExecutionTimeout.to_string(),
            "job_execution_timeout"
        );
        assert_eq!(
            FailureReason::JobExecutionServerTimeout.to_string(),
            "job_execution_server_timeout"
        );
    }
}
