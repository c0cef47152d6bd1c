use crate::pipeline::Item;
use thiserror::Error;

/// Why a stage refused an item
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("stage '{stage}' rejected item: {reason}")]
pub struct PipelineRejection {
    pub stage: String,
    pub reason: String,
}

impl PipelineRejection {
    pub fn new(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// One transformation or validation step
///
/// Stages are composed into an ordered chain when a job is submitted. A
/// rejection stops the chain.
pub trait Stage: Send + Sync {
    /// Short name used in rejections and logs
    fn name(&self) -> &str;

    fn process(&self, item: Item) -> Result<Item, PipelineRejection>;
}
