use crate::output::{ResultSink, SinkResult};
use crate::pipeline::Item;
use crate::JobId;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Serialize)]
struct Line<'a> {
    job: JobId,
    item: &'a Item,
}

/// Appends one JSON object per item to a file
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it if needed
    pub async fn open(path: &Path) -> SinkResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn store(&self, job: JobId, item: &Item) -> SinkResult<()> {
        let mut line = serde_json::to_vec(&Line { job, item })?;
        line.push(b'\n');

        // One write per line under the lock keeps lines from interleaving
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
