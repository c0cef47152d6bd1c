//! Output module: where clean items go and how progress is shown
//!
//! This module handles:
//! - The `ResultSink` capability the pipeline hands clean items to
//! - A JSON-lines file sink and an in-memory sink
//! - Rendering job progress

mod jsonl;
mod memory;
pub mod stats;
mod traits;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;
pub use stats::{format_progress, load_job_progress, print_progress};
pub use traits::{ResultSink, SinkError, SinkResult};
