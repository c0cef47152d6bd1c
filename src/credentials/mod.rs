//! Credential Lease Manager
//!
//! Cookies and proxies uploaded by callers live in a [`CredentialPool`].
//! Workers check them out with time-boxed leases; a background reclaimer
//! returns leases whose holder never released them.
//!
//! # Lease lifecycle
//!
//! ```text
//! Available --lease--> Leased --release / TTL--> Available
//!                        |
//!                        +--N consecutive 4xx--> Invalid
//! ```

mod pool;
mod reclaimer;
mod types;

pub use pool::CredentialPool;
pub use reclaimer::{persist_credentials, spawn_reclaimer};
pub use types::{
    Credential, CredentialId, CredentialKind, CredentialOutcome, CredentialPayload,
    CredentialSpec, CredentialStatus, CredentialView, Lease, LeaseError, LeaseToken, PoolStats,
};
