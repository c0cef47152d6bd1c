use crate::job::WorkItem;
use crate::state::{ErrorKind, JobStatus, WorkItemState};
use std::collections::VecDeque;

/// Number of recent error kinds kept per job
pub const RECENT_ERRORS: usize = 20;

/// Point-in-time progress of one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub status: JobStatus,
    pub queued: usize,
    pub leased: usize,
    pub in_flight: usize,
    pub done: usize,
    pub dead_lettered: usize,
    pub cancelled: usize,

    /// Items that completed as duplicates of an earlier result
    pub duplicates: usize,

    pub total: usize,
    pub resume_cursor: usize,

    /// Most recent attempt failures, oldest first
    pub recent_errors: Vec<ErrorKind>,

    /// Why the job failed, if it did
    pub failure: Option<String>,
}

/// What a caller should make of a job's progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Pending, running or paused
    InProgress,
    Completed,
    CompletedWithErrors(usize),
    Failed(String),
    Cancelled,
}

impl JobProgress {
    /// Counts items by state
    pub fn from_items<'a>(
        status: JobStatus,
        items: impl IntoIterator<Item = &'a WorkItem>,
        duplicates: usize,
        resume_cursor: usize,
        recent_errors: Vec<ErrorKind>,
        failure: Option<String>,
    ) -> Self {
        let mut progress = Self {
            status,
            queued: 0,
            leased: 0,
            in_flight: 0,
            done: 0,
            dead_lettered: 0,
            cancelled: 0,
            duplicates,
            total: 0,
            resume_cursor,
            recent_errors,
            failure,
        };

        for item in items {
            progress.total += 1;
            match item.state {
                WorkItemState::Queued => progress.queued += 1,
                WorkItemState::Leased => progress.leased += 1,
                WorkItemState::InFlight => progress.in_flight += 1,
                WorkItemState::Done => progress.done += 1,
                WorkItemState::DeadLettered => progress.dead_lettered += 1,
                WorkItemState::Cancelled => progress.cancelled += 1,
            }
        }

        progress
    }

    /// Distinguishes partial success from a failed run
    pub fn outcome(&self) -> JobOutcome {
        match self.status {
            JobStatus::Pending | JobStatus::Running | JobStatus::Paused => JobOutcome::InProgress,
            JobStatus::Completed if self.dead_lettered == 0 => JobOutcome::Completed,
            JobStatus::Completed => JobOutcome::CompletedWithErrors(self.dead_lettered),
            JobStatus::Failed => JobOutcome::Failed(
                self.failure
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string()),
            ),
            JobStatus::Cancelled => JobOutcome::Cancelled,
        }
    }
}

/// Bounded tail of recent attempt failures
#[derive(Debug, Clone, Default)]
pub struct ErrorTail {
    kinds: VecDeque<ErrorKind>,
}

impl ErrorTail {
    pub fn push(&mut self, kind: ErrorKind) {
        if self.kinds.len() == RECENT_ERRORS {
            self.kinds.pop_front();
        }
        self.kinds.push_back(kind);
    }

    pub fn to_vec(&self) -> Vec<ErrorKind> {
        self.kinds.iter().copied().collect()
    }
}

impl FromIterator<ErrorKind> for ErrorTail {
    fn from_iter<I: IntoIterator<Item = ErrorKind>>(iter: I) -> Self {
        let mut tail = Self::default();
        for kind in iter {
            tail.push(kind);
        }
        tail
    }
}
