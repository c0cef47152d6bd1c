use crate::credentials::LeaseToken;
use crate::state::{ErrorKind, WorkItemState};
use crate::url::{domain_of, parse_target};
use crate::{HarvestError, UrlError};
use url::Url;

/// One unit of fetch work within a job
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Index in the job's frontier
    pub position: usize,

    pub url: Url,

    /// Lowercase host, the key for rate buckets and credential scopes
    pub domain: String,

    pub state: WorkItemState,

    /// Retries granted so far; the first attempt is not a retry
    pub retry_count: u32,

    /// Content errors seen so far
    pub content_errors: u32,

    pub last_error: Option<ErrorKind>,

    /// Lease held while the item is in flight
    pub lease_token: Option<LeaseToken>,
}

impl WorkItem {
    /// Creates a queued item for a frontier entry
    pub fn new(position: usize, target: &str) -> Result<Self, UrlError> {
        let url = parse_target(target)?;
        let domain = domain_of(&url)?;
        Ok(Self {
            position,
            url,
            domain,
            state: WorkItemState::Queued,
            retry_count: 0,
            content_errors: 0,
            last_error: None,
            lease_token: None,
        })
    }

    /// Moves the item to `next`, rejecting moves the state machine forbids
    pub fn transition(&mut self, next: WorkItemState) -> Result<(), HarvestError> {
        if !self.state.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        if !matches!(next, WorkItemState::InFlight) {
            self.lease_token = None;
        }
        Ok(())
    }
}
