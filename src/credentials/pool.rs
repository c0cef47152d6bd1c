//! Credential pool with time-boxed leases
//!
//! Credentials are sharded by scope; each shard is guarded by its own lock,
//! so leasing for one domain never waits on another domain's shard.

use crate::config::CredentialConfig;
use crate::credentials::types::{
    ActiveLease, Credential, CredentialId, CredentialOutcome, CredentialPayload, CredentialSpec,
    CredentialStatus, CredentialView, Lease, LeaseError, LeaseToken, PoolStats,
};
use crate::storage::CredentialRecord;
use crate::url::scope_candidates;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type Shard = Arc<Mutex<Vec<Credential>>>;

/// Result of one non-blocking lease attempt
#[derive(Debug)]
pub(crate) enum Selection {
    Granted(Lease),

    /// Usable credentials exist but all are leased; carries the earliest expiry
    Busy(Option<Instant>),

    /// Nothing usable covers the domain
    Exhausted,
}

/// Credential Lease Manager
pub struct CredentialPool {
    /// Scope -> credentials scoped to it
    shards: DashMap<String, Shard>,

    /// Outstanding lease token -> (scope, credential)
    outstanding: DashMap<LeaseToken, (String, CredentialId)>,

    config: CredentialConfig,

    /// Signalled whenever a credential may have become available
    released: Notify,

    /// Set when state worth persisting has changed
    dirty: AtomicBool,
}

impl CredentialPool {
    pub fn new(config: CredentialConfig) -> Self {
        Self {
            shards: DashMap::new(),
            outstanding: DashMap::new(),
            config,
            released: Notify::new(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Adds an uploaded credential to the pool
    pub fn add(&self, spec: CredentialSpec) -> CredentialId {
        let credential = Credential::new(spec);
        let id = credential.id;
        tracing::debug!(
            "Adding {} credential {} for scope {}",
            credential.kind.to_db_string(),
            id,
            credential.scope
        );

        self.shard_or_insert(&credential.scope)
            .lock()
            .unwrap()
            .push(credential);

        self.mark_dirty();
        self.released.notify_waiters();
        id
    }

    /// Leases a credential for `domain`
    ///
    /// Waits up to the configured acquisition timeout while every usable
    /// credential is leased. Fails immediately when nothing usable covers
    /// the domain.
    ///
    /// # Returns
    ///
    /// * `Ok(Lease)` - A lease on the least recently used available credential
    /// * `Err(LeaseError::NoCredentialAvailable)` - Pool for the domain is empty or all invalid
    /// * `Err(LeaseError::Timeout)` - Every usable credential stayed leased
    /// * `Err(LeaseError::Cancelled)` - The caller was cancelled while waiting
    pub async fn lease(
        &self,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<Lease, LeaseError> {
        let deadline = Instant::now() + self.config.lease_acquire_timeout();

        loop {
            // Register before checking so a release in between is not missed
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let wake_at = match self.try_lease(domain) {
                Selection::Granted(lease) => return Ok(lease),
                Selection::Exhausted => {
                    return Err(LeaseError::NoCredentialAvailable {
                        domain: domain.to_string(),
                    })
                }
                Selection::Busy(next_expiry) => {
                    next_expiry.map_or(deadline, |expiry| expiry.min(deadline))
                }
            };

            if Instant::now() >= deadline {
                return Err(LeaseError::Timeout {
                    domain: domain.to_string(),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(LeaseError::Cancelled),
                _ = &mut released => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Attempts to lease without waiting
    ///
    /// Scopes are tried most specific first. A scope holding any credential
    /// that is not invalid is authoritative: if all of them are leased the
    /// caller waits rather than falling back to a parent scope.
    pub(crate) fn try_lease(&self, domain: &str) -> Selection {
        let now = Instant::now();

        for scope in scope_candidates(domain) {
            let Some(shard) = self.shard(scope) else {
                continue;
            };
            let mut credentials = shard.lock().unwrap();

            let reclaimed: Vec<LeaseToken> = credentials
                .iter_mut()
                .filter_map(|credential| credential.reclaim_if_expired(now))
                .collect();
            self.forget(&reclaimed);

            if credentials
                .iter()
                .all(|credential| credential.status == CredentialStatus::Invalid)
            {
                continue;
            }

            let candidate = credentials
                .iter_mut()
                .filter(|credential| credential.status == CredentialStatus::Available)
                .min_by_key(|credential| (credential.last_used, credential.id));

            if let Some(credential) = candidate {
                let token = LeaseToken::new();
                let expires_at = now + self.config.lease_ttl();
                credential.status = CredentialStatus::Leased;
                credential.lease = Some(ActiveLease { token, expires_at });
                credential.last_used = Some(now);

                let lease = Lease {
                    token,
                    credential_id: credential.id,
                    scope: credential.scope.clone(),
                    payload: CredentialPayload {
                        kind: credential.kind,
                        value: credential.payload.clone(),
                    },
                    expires_at,
                };
                self.outstanding
                    .insert(token, (credential.scope.clone(), credential.id));
                self.mark_dirty();

                tracing::trace!(
                    "Leased credential {} (scope {}) for {}",
                    credential.id,
                    credential.scope,
                    domain
                );
                return Selection::Granted(lease);
            }

            let next_expiry = credentials
                .iter()
                .filter_map(|credential| credential.lease.map(|lease| lease.expires_at))
                .min();
            return Selection::Busy(next_expiry);
        }

        Selection::Exhausted
    }

    /// Releases a lease
    ///
    /// Idempotent: releasing a lease that already expired, was already
    /// released, or was never granted is a no-op. Only the token holder can
    /// release; a token cannot touch a lease issued to someone else.
    ///
    /// # Returns
    ///
    /// `true` if this call released the lease
    pub fn release(&self, token: LeaseToken) -> bool {
        let Some((_, (scope, id))) = self.outstanding.remove(&token) else {
            return false;
        };
        let Some(shard) = self.shard(&scope) else {
            return false;
        };

        let released = {
            let mut credentials = shard.lock().unwrap();
            match credentials.iter_mut().find(|credential| credential.id == id) {
                Some(credential)
                    if credential.lease.map(|lease| lease.token) == Some(token) =>
                {
                    credential.lease = None;
                    if credential.status == CredentialStatus::Leased {
                        credential.status = CredentialStatus::Available;
                    }
                    true
                }
                _ => false,
            }
        };

        if released {
            self.mark_dirty();
            self.released.notify_waiters();
        }
        released
    }

    /// Records how an attempt went, then releases the lease
    pub fn finish(&self, lease: &Lease, outcome: CredentialOutcome) {
        self.record_outcome(lease, outcome);
        self.release(lease.token);
    }

    fn record_outcome(&self, lease: &Lease, outcome: CredentialOutcome) {
        let Some(shard) = self.shard(&lease.scope) else {
            return;
        };
        let mut credentials = shard.lock().unwrap();
        let Some(credential) = credentials
            .iter_mut()
            .find(|credential| credential.id == lease.credential_id)
        else {
            return;
        };

        credential.usage_count += 1;
        match outcome {
            CredentialOutcome::Success => credential.consecutive_client_errors = 0,
            CredentialOutcome::ClientError => {
                credential.consecutive_client_errors += 1;
                if credential.consecutive_client_errors >= self.config.invalid_after_client_errors
                    && credential.status != CredentialStatus::Invalid
                {
                    tracing::warn!(
                        "Credential {} for {} marked invalid after {} consecutive client errors",
                        credential.id,
                        credential.scope,
                        credential.consecutive_client_errors
                    );
                    credential.status = CredentialStatus::Invalid;
                }
            }
            CredentialOutcome::Other => {}
        }
        self.mark_dirty();
    }

    /// Reverts every lease whose TTL has elapsed
    ///
    /// # Returns
    ///
    /// The number of leases reclaimed
    pub fn reclaim_expired(&self) -> usize {
        let now = Instant::now();
        let mut reclaimed = Vec::new();

        for shard in self.all_shards() {
            let mut credentials = shard.lock().unwrap();
            reclaimed.extend(
                credentials
                    .iter_mut()
                    .filter_map(|credential| credential.reclaim_if_expired(now)),
            );
        }

        self.forget(&reclaimed);
        if !reclaimed.is_empty() {
            self.mark_dirty();
            self.released.notify_waiters();
        }
        reclaimed.len()
    }

    /// Snapshot of every credential
    pub fn views(&self) -> Vec<CredentialView> {
        let now = Instant::now();
        let mut views: Vec<CredentialView> = self
            .all_shards()
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|credential| credential.view(now))
                    .collect::<Vec<_>>()
            })
            .collect();
        views.sort_by(|a, b| a.scope.cmp(&b.scope).then(a.id.cmp(&b.id)));
        views
    }

    /// Credential counts per scope
    pub fn stats(&self) -> BTreeMap<String, PoolStats> {
        let mut stats: BTreeMap<String, PoolStats> = BTreeMap::new();
        for view in self.views() {
            let entry = stats.entry(view.scope).or_default();
            match view.status {
                CredentialStatus::Available => entry.available += 1,
                CredentialStatus::Leased => entry.leased += 1,
                CredentialStatus::Invalid => entry.invalid += 1,
            }
        }
        stats
    }

    /// Persistable form of every credential
    pub fn records(&self) -> Vec<CredentialRecord> {
        self.all_shards()
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .unwrap()
                    .iter()
                    .map(CredentialRecord::from)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Loads persisted credentials
    ///
    /// Leases from a previous process are not restored: those credentials
    /// come back available. Invalid status and usage counters survive.
    pub fn restore(&self, records: Vec<CredentialRecord>) -> usize {
        let mut restored = 0;
        for record in records {
            let shard = self.shard_or_insert(&record.scope);
            let mut credentials = shard.lock().unwrap();
            if credentials.iter().any(|credential| credential.id == record.id) {
                continue;
            }

            let status = match record.status {
                CredentialStatus::Invalid => CredentialStatus::Invalid,
                _ => CredentialStatus::Available,
            };
            credentials.push(Credential {
                id: record.id,
                scope: record.scope,
                kind: record.kind,
                payload: record.payload,
                status,
                usage_count: record.usage_count,
                consecutive_client_errors: record.consecutive_client_errors,
                lease: None,
                last_used: None,
            });
            restored += 1;
        }

        if restored > 0 {
            tracing::info!("Restored {} credential(s) from storage", restored);
            self.released.notify_waiters();
        }
        restored
    }

    /// Clears the dirty flag
    ///
    /// # Returns
    ///
    /// `true` if there were unpersisted changes
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn shard(&self, scope: &str) -> Option<Shard> {
        self.shards.get(scope).map(|shard| Arc::clone(shard.value()))
    }

    fn shard_or_insert(&self, scope: &str) -> Shard {
        Arc::clone(self.shards.entry(scope.to_string()).or_default().value())
    }

    fn all_shards(&self) -> Vec<Shard> {
        self.shards
            .iter()
            .map(|shard| Arc::clone(shard.value()))
            .collect()
    }

    fn forget(&self, tokens: &[LeaseToken]) {
        for token in tokens {
            self.outstanding.remove(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialKind;
    use std::time::Duration;

    fn config() -> CredentialConfig {
        CredentialConfig {
            lease_ttl_secs: 60,
            lease_acquire_timeout_ms: 5_000,
            reclaim_interval_ms: 1_000,
            invalid_after_client_errors: 3,
        }
    }

    fn cookie(scope: &str, payload: &str) -> CredentialSpec {
        CredentialSpec {
            scope: scope.to_string(),
            kind: CredentialKind::Cookie,
            payload: payload.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_and_release() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "session=a"));
        let cancel = CancellationToken::new();

        let lease = pool.lease("example.com", &cancel).await.unwrap();
        assert_eq!(lease.payload.value, "session=a");
        assert_eq!(pool.stats()["example.com"].leased, 1);

        assert!(pool.release(lease.token));
        assert_eq!(pool.stats()["example.com"].available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_idempotent() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "session=a"));
        let cancel = CancellationToken::new();

        let lease = pool.lease("example.com", &cancel).await.unwrap();
        assert!(pool.release(lease.token));
        assert!(!pool.release(lease.token));
        assert!(!pool.release(LeaseToken::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pool_fails_immediately() {
        let pool = CredentialPool::new(config());
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let result = pool.lease("example.com", &cancel).await;
        assert!(matches!(
            result,
            Err(LeaseError::NoCredentialAvailable { .. })
        ));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_leased_times_out() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "session=a"));
        let cancel = CancellationToken::new();

        let _held = pool.lease("example.com", &cancel).await.unwrap();
        let start = Instant::now();
        let result = pool.lease("example.com", &cancel).await;
        assert!(matches!(result, Err(LeaseError::Timeout { .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wakes_on_release() {
        let pool = Arc::new(CredentialPool::new(config()));
        pool.add(cookie("example.com", "session=a"));
        let cancel = CancellationToken::new();

        let held = pool.lease("example.com", &cancel).await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.lease("example.com", &cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        pool.release(held.token);

        let lease = waiter.await.unwrap().unwrap();
        assert_ne!(lease.token, held.token);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreleased_lease_reverts_after_exact_ttl() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "session=a"));
        let cancel = CancellationToken::new();

        let abandoned = pool.lease("example.com", &cancel).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(pool.reclaim_expired(), 0);
        assert_eq!(pool.stats()["example.com"].leased, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(pool.reclaim_expired(), 1);
        assert_eq!(pool.stats()["example.com"].available, 1);

        // The stale holder can no longer release anything
        assert!(!pool.release(abandoned.token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_cannot_release_new_lease() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "session=a"));
        let cancel = CancellationToken::new();

        let stale = pool.lease("example.com", &cancel).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        let fresh = pool.lease("example.com", &cancel).await.unwrap();

        assert!(!pool.release(stale.token));
        assert_eq!(pool.stats()["example.com"].leased, 1);
        assert!(pool.release(fresh.token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_least_recently_used_selection() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "session=a"));
        pool.add(cookie("example.com", "session=b"));
        let cancel = CancellationToken::new();

        let first = pool.lease("example.com", &cancel).await.unwrap();
        pool.release(first.token);
        tokio::time::advance(Duration::from_millis(10)).await;

        let second = pool.lease("example.com", &cancel).await.unwrap();
        assert_ne!(first.credential_id, second.credential_id);
        pool.release(second.token);
        tokio::time::advance(Duration::from_millis(10)).await;

        let third = pool.lease("example.com", &cancel).await.unwrap();
        assert_eq!(third.credential_id, first.credential_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_scope_applies_to_subdomain() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "parent"));
        let cancel = CancellationToken::new();

        let lease = pool.lease("shop.example.com", &cancel).await.unwrap();
        assert_eq!(lease.payload.value, "parent");
        assert_eq!(lease.scope, "example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_match_wins() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "parent"));
        pool.add(cookie("shop.example.com", "exact"));
        let cancel = CancellationToken::new();

        let lease = pool.lease("shop.example.com", &cancel).await.unwrap();
        assert_eq!(lease.payload.value, "exact");

        // Exact credential busy: wait for it rather than use the parent
        let result = pool.lease("shop.example.com", &cancel).await;
        assert!(matches!(result, Err(LeaseError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_client_errors_invalidate() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "session=a"));
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let lease = pool.lease("example.com", &cancel).await.unwrap();
            pool.finish(&lease, CredentialOutcome::ClientError);
        }

        assert_eq!(pool.stats()["example.com"].invalid, 1);
        assert!(matches!(
            pool.lease("example.com", &cancel).await,
            Err(LeaseError::NoCredentialAvailable { .. })
        ));
        assert_eq!(pool.views()[0].usage_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_client_error_streak() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "session=a"));
        let cancel = CancellationToken::new();

        for outcome in [
            CredentialOutcome::ClientError,
            CredentialOutcome::ClientError,
            CredentialOutcome::Success,
            CredentialOutcome::ClientError,
        ] {
            let lease = pool.lease("example.com", &cancel).await.unwrap();
            pool.finish(&lease, outcome);
        }

        assert_eq!(pool.stats()["example.com"].available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_exact_scope_falls_back_to_parent() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "parent"));
        pool.add(cookie("shop.example.com", "exact"));
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let lease = pool.lease("shop.example.com", &cancel).await.unwrap();
            assert_eq!(lease.payload.value, "exact");
            pool.finish(&lease, CredentialOutcome::ClientError);
        }

        let lease = pool.lease("shop.example.com", &cancel).await.unwrap();
        assert_eq!(lease.payload.value, "parent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "session=a"));
        let cancel = CancellationToken::new();
        let _held = pool.lease("example.com", &cancel).await.unwrap();

        cancel.cancel();
        assert_eq!(
            pool.lease("example.com", &cancel).await.unwrap_err(),
            LeaseError::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_drops_leases_and_keeps_invalid() {
        let pool = CredentialPool::new(config());
        pool.add(cookie("example.com", "a"));
        pool.add(cookie("other.com", "b"));
        let cancel = CancellationToken::new();

        let _held = pool.lease("example.com", &cancel).await.unwrap();
        for _ in 0..3 {
            let lease = pool.lease("other.com", &cancel).await.unwrap();
            pool.finish(&lease, CredentialOutcome::ClientError);
        }

        let restarted = CredentialPool::new(config());
        assert_eq!(restarted.restore(pool.records()), 2);

        let stats = restarted.stats();
        assert_eq!(stats["example.com"].available, 1);
        assert_eq!(stats["other.com"].invalid, 1);

        // Restoring twice does not duplicate
        assert_eq!(restarted.restore(pool.records()), 0);
    }
}
