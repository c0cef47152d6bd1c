//! Fetch Executor: one attempt at one work item

use crate::credentials::{CredentialOutcome, CredentialPool, Lease, LeaseError, LeaseToken};
use crate::engine::fetcher::{FetchRequest, FetchedPage, Fetcher};
use crate::governor::{Admission, RateGovernor};
use crate::state::ErrorKind;
use crate::HarvestError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// How an attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Fetched(FetchedPage),
    Failed(ErrorKind),

    /// Cancelled before the fetch finished, or it outlived the grace period
    Cancelled,
}

/// Runs attempts: lease, admission, fetch, release
pub struct FetchExecutor {
    fetcher: Arc<dyn Fetcher>,
    credentials: Arc<CredentialPool>,
    governor: Arc<RateGovernor>,
    fetch_timeout: Duration,
    cancel_grace: Duration,
}

impl FetchExecutor {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        credentials: Arc<CredentialPool>,
        governor: Arc<RateGovernor>,
        fetch_timeout: Duration,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            fetcher,
            credentials,
            governor,
            fetch_timeout,
            cancel_grace,
        }
    }

    /// Performs one attempt
    ///
    /// Every wait (lease, admission, fetch) is bounded and watches `cancel`.
    /// `on_in_flight` runs once the lease and admission are held, right
    /// before the network fetch starts; an error from it aborts the attempt.
    /// The lease, if any, is released however the attempt ends.
    ///
    /// # Arguments
    ///
    /// * `url` - The target
    /// * `domain` - Key for the credential scope and rate bucket
    /// * `require_credentials` - Whether the attempt must hold a lease
    /// * `cancel` - The job's cancellation signal
    /// * `on_in_flight` - Called with the lease token as the fetch starts
    ///
    /// # Returns
    ///
    /// * `Ok(AttemptOutcome)` - What happened to the attempt
    /// * `Err(HarvestError)` - `on_in_flight` failed
    pub async fn attempt<F>(
        &self,
        url: &Url,
        domain: &str,
        require_credentials: bool,
        cancel: &CancellationToken,
        on_in_flight: F,
    ) -> Result<AttemptOutcome, HarvestError>
    where
        F: FnOnce(Option<LeaseToken>) -> Result<(), HarvestError> + Send,
    {
        let lease = if require_credentials {
            match self.credentials.lease(domain, cancel).await {
                Ok(lease) => Some(lease),
                Err(LeaseError::NoCredentialAvailable { .. }) => {
                    return Ok(AttemptOutcome::Failed(ErrorKind::NoCredentialAvailable))
                }
                Err(LeaseError::Timeout { .. }) => {
                    return Ok(AttemptOutcome::Failed(ErrorKind::LeaseUnavailable))
                }
                Err(LeaseError::Cancelled) => return Ok(AttemptOutcome::Cancelled),
            }
        } else {
            None
        };

        match self.governor.admit(domain, cancel).await {
            Admission::Immediate | Admission::AfterWait(_) => {}
            Admission::Denied { .. } => {
                self.release(lease.as_ref());
                return Ok(AttemptOutcome::Failed(ErrorKind::RateLimited));
            }
            Admission::Cancelled => {
                self.release(lease.as_ref());
                return Ok(AttemptOutcome::Cancelled);
            }
        }

        if let Err(e) = on_in_flight(lease.as_ref().map(|l| l.token)) {
            self.release(lease.as_ref());
            return Err(e);
        }

        let request = FetchRequest {
            url: url.clone(),
            credential: lease.as_ref().map(|l| l.payload.clone()),
        };
        let fetch = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(request));
        tokio::pin!(fetch);

        let result = tokio::select! {
            result = &mut fetch => result,
            _ = cancel.cancelled() => {
                match tokio::time::timeout(self.cancel_grace, &mut fetch).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!("Abandoned fetch of {} after cancel grace", url);
                        self.release(lease.as_ref());
                        return Ok(AttemptOutcome::Cancelled);
                    }
                }
            }
        };

        let result = result.unwrap_or(Err(ErrorKind::Timeout));

        if let Some(lease) = &lease {
            let outcome = match &result {
                Ok(_) => CredentialOutcome::Success,
                Err(kind) if kind.is_client_error() => CredentialOutcome::ClientError,
                Err(_) => CredentialOutcome::Other,
            };
            self.credentials.finish(lease, outcome);
        }

        Ok(match result {
            Ok(page) => {
                tracing::debug!("Fetched {} ({})", url, page.status_code);
                AttemptOutcome::Fetched(page)
            }
            Err(kind) => {
                tracing::debug!("Attempt at {} failed: {}", url, kind);
                AttemptOutcome::Failed(kind)
            }
        })
    }

    fn release(&self, lease: Option<&Lease>) {
        if let Some(lease) = lease {
            self.credentials.release(lease.token);
        }
    }
}
