/// Work item state definitions for tracking fetch progress
///
/// This module defines all states a work item can be in while a job runs,
/// and the transitions the scheduler is allowed to make between them.
use std::fmt;

/// Represents the current state of a work item within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkItemState {
    // ===== Active States =====
    /// Waiting in the frontier (first attempt or scheduled retry)
    Queued,

    /// Claimed by a worker, which is acquiring a credential lease and admission
    Leased,

    /// The network fetch is running
    InFlight,

    // ===== Terminal States =====
    /// Fetched, processed and handed to the sink (or reported as duplicate)
    Done,

    /// Abandoned after the retry policy gave up
    DeadLettered,

    /// The job was cancelled before this item finished
    Cancelled,
}

impl WorkItemState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::DeadLettered | Self::Cancelled)
    }

    /// Returns true if this item is held by a worker
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Leased | Self::InFlight)
    }

    /// Checks whether the scheduler may move an item from `self` to `next`
    ///
    /// The forward path is Queued → Leased → InFlight → {Done | Queued | DeadLettered}.
    /// Every attempt outcome, including a failure before the network fetch
    /// starts, is recorded from InFlight. Leased → Queued only un-claims an
    /// item that was never attempted. Any non-terminal item can be cancelled.
    pub fn can_transition_to(&self, next: WorkItemState) -> bool {
        use WorkItemState::*;
        match (self, next) {
            (Queued, Leased) => true,
            (Leased, InFlight) | (Leased, Queued) => true,
            (InFlight, Done) | (InFlight, Queued) | (InFlight, DeadLettered) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Converts the state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::DeadLettered => "dead_lettered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a state from a database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "leased" => Some(Self::Leased),
            "in_flight" => Some(Self::InFlight),
            "done" => Some(Self::Done),
            "dead_lettered" => Some(Self::DeadLettered),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns all possible work item states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Leased,
            Self::InFlight,
            Self::Done,
            Self::DeadLettered,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
