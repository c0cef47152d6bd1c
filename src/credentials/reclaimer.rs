use crate::credentials::CredentialPool;
use crate::storage::{CheckpointStore, SharedStore, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Writes the pool to storage if it changed since the last write
pub fn persist_credentials(pool: &CredentialPool, store: &SharedStore) -> Result<(), StorageError> {
    if !pool.take_dirty() {
        return Ok(());
    }

    let records = pool.records();
    let result = store.lock().unwrap().save_credentials(&records);
    if result.is_err() {
        pool.mark_dirty();
    }
    result
}

/// Spawns the background reclaimer
///
/// Every `interval` it reverts expired leases and persists changed
/// credential state. It stops, after one last persist, when `shutdown` is
/// cancelled.
pub fn spawn_reclaimer(
    pool: Arc<CredentialPool>,
    store: SharedStore,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reclaimed = pool.reclaim_expired();
            if reclaimed > 0 {
                tracing::info!("Reclaimed {} expired credential lease(s)", reclaimed);
            }

            if let Err(e) = persist_credentials(&pool, &store) {
                tracing::warn!("Failed to persist credential state: {}", e);
            }
        }

        if let Err(e) = persist_credentials(&pool, &store) {
            tracing::warn!("Failed to persist credential state on shutdown: {}", e);
        }
        tracing::debug!("Credential reclaimer stopped");
    })
}
