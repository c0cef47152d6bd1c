//! Job data model
//!
//! A job is a frontier of work items plus the settings it was submitted
//! with. This module holds the submitted specification, the work items, the
//! resume cursor and the progress view returned to callers.

mod cursor;
mod progress;
mod spec;
mod work_item;

pub use cursor::ResumeCursor;
pub use progress::{ErrorTail, JobOutcome, JobProgress, RECENT_ERRORS};
pub use spec::{FrontierOrdering, JobSpec, RateLimitSpec};
pub use work_item::WorkItem;
