//! State module for tracking job progress
//!
//! # Components
//!
//! - `WorkItemState`: state machine of one unit of fetch work
//! - `JobStatus`: lifecycle of a whole job
//! - `ErrorKind`: why an attempt failed

mod error_kind;
mod item_state;
mod job_status;

// Re-export main types
pub use error_kind::ErrorKind;
pub use item_state::WorkItemState;
pub use job_status::JobStatus;
