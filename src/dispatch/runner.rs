use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::dispatch::job::Job;

/// A polling worker, as seen by the dispatcher.
///
/// This is a snapshot taken at the start of a registration cycle; the
/// registry owns the authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: u64,
    /// Tags this runner can serve
    pub tags: HashSet<String>,
    /// Executor features the runner advertises (descriptor only)
    pub executor_capabilities: HashSet<String>,
    /// Max simultaneous running jobs
    pub concurrency_budget: u32,
    pub current_running_count: u32,
    /// Partitions this runner may pull from; `None` means all
    pub eligible_partitions: Option<Vec<u32>>,
}

impl Runner {
    pub fn new(id: u64, concurrency_budget: u32) -> Self {
        Self {
            id,
            tags: HashSet::new(),
            executor_capabilities: HashSet::new(),
            concurrency_budget,
            current_running_count: 0,
            eligible_partitions: None,
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

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executor_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_eligible_partitions(mut self, partitions: Vec<u32>) -> Self {
        self.eligible_partitions = Some(partitions);
        self
    }

    pub fn at_capacity(&self) -> bool {
        self.current_running_count >= self.concurrency_budget
    }

    /// Tag matching: the runner must cover every tag the job requires.
    pub fn can_serve(&self, job: &Job) -> bool {
        job.tags.is_subset(&self.tags)
    }
}
