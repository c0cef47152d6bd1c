use crate::output::{ResultSink, SinkResult};
use crate::pipeline::Item;
use crate::JobId;
use async_trait::async_trait;
use std::sync::Mutex;

/// Keeps results in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct MemorySink {
    items: Mutex<Vec<(JobId, Item)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything stored so far, in arrival order
    pub fn items(&self) -> Vec<(JobId, Item)> {
        self.items.lock().unwrap().clone()
    }

    /// Items stored for one job
    pub fn items_for(&self, job: JobId) -> Vec<Item> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter(|(owner, _)| *owner == job)
            .map(|(_, item)| item.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn store(&self, job: JobId, item: &Item) -> SinkResult<()> {
        self.items.lock().unwrap().push((job, item.clone()));
        Ok(())
    }
}
