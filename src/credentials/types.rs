use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// Identifier of a credential in the pool
pub type CredentialId = Uuid;

/// Proof of one lease; the only handle that can release it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseToken(pub Uuid);

impl LeaseToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a credential's payload is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialKind {
    /// Sent as the `Cookie` request header
    Cookie,

    /// Proxy URL the request is routed through
    Proxy,
}

impl CredentialKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Cookie => "cookie",
            Self::Proxy => "proxy",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "cookie" => Some(Self::Cookie),
            "proxy" => Some(Self::Proxy),
            _ => None,
        }
    }
}

/// Lifecycle of a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialStatus {
    Available,

    /// Exactly one outstanding lease, with an expiry
    Leased,

    /// Retired after repeated client errors; never issued again
    Invalid,
}

impl CredentialStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Leased => "leased",
            Self::Invalid => "invalid",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "leased" => Some(Self::Leased),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }
}

/// A credential upload from an external collaborator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialSpec {
    /// Domain the credential applies to, including its subdomains
    pub scope: String,
    pub kind: CredentialKind,

    /// Opaque blob: a cookie header value or a proxy URL
    pub payload: String,
}

/// The part of a credential a fetcher needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPayload {
    pub kind: CredentialKind,
    pub value: String,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveLease {
    pub token: LeaseToken,
    pub expires_at: Instant,
}

/// A credential owned by the pool
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: CredentialId,
    pub scope: String,
    pub kind: CredentialKind,
    pub payload: String,
    pub status: CredentialStatus,
    pub usage_count: u64,
    pub consecutive_client_errors: u32,
    pub(crate) lease: Option<ActiveLease>,
    pub(crate) last_used: Option<Instant>,
}

impl Credential {
    pub fn new(spec: CredentialSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope: spec.scope,
            kind: spec.kind,
            payload: spec.payload,
            status: CredentialStatus::Available,
            usage_count: 0,
            consecutive_client_errors: 0,
            lease: None,
            last_used: None,
        }
    }

    /// Reverts an expired lease
    ///
    /// # Returns
    ///
    /// The token of the reclaimed lease, if there was one
    pub(crate) fn reclaim_if_expired(&mut self, now: Instant) -> Option<LeaseToken> {
        match self.lease {
            Some(lease) if lease.expires_at <= now => {
                self.lease = None;
                if self.status == CredentialStatus::Leased {
                    self.status = CredentialStatus::Available;
                }
                Some(lease.token)
            }
            _ => None,
        }
    }

    pub fn view(&self, now: Instant) -> CredentialView {
        CredentialView {
            id: self.id,
            scope: self.scope.clone(),
            kind: self.kind,
            status: self.status,
            usage_count: self.usage_count,
            lease_expires_in: self
                .lease
                .map(|lease| lease.expires_at.saturating_duration_since(now)),
        }
    }
}

/// Read-only snapshot of a credential; never exposes the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialView {
    pub id: CredentialId,
    pub scope: String,
    pub kind: CredentialKind,
    pub status: CredentialStatus,
    pub usage_count: u64,
    pub lease_expires_in: Option<Duration>,
}

/// A granted lease
#[derive(Debug, Clone)]
pub struct Lease {
    pub token: LeaseToken,
    pub credential_id: CredentialId,
    pub scope: String,
    pub payload: CredentialPayload,
    pub expires_at: Instant,
}

/// How a leased attempt went, as far as the credential is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOutcome {
    Success,

    /// The target answered 4xx (other than 429)
    ClientError,

    /// Anything that says nothing about the credential
    Other,
}

/// Counts per scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub available: usize,
    pub leased: usize,
    pub invalid: usize,
}

/// Why a lease could not be granted
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("No usable credential for {domain}")]
    NoCredentialAvailable { domain: String },

    #[error("Timed out waiting for a credential for {domain}")]
    Timeout { domain: String },

    #[error("Lease acquisition cancelled")]
    Cancelled,
}
