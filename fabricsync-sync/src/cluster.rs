//! Cluster Sync Client.
//!
//! [`ClusterApi`] is the narrow control-plane surface the engine consumes.
//! [`RetryingCluster`] adds a per-call timeout and bounded exponential
//! backoff on transient failures; [`MemoryCluster`] is an in-process control
//! plane used by tests and dry runs.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use fabricsync_core::{BackoffConfig, ResourceKey, ResourceKind};
use fabricsync_manifest::Resource;

use crate::error::SyncError;

/// The control plane's view of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterObject {
    pub key: ResourceKey,
    /// Canonical single-document YAML.
    pub content: String,
    pub hash: String,
}

/// One entry of a `list` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEntry {
    pub key: ResourceKey,
    pub hash: String,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create or update; returns the hash the control plane now holds.
    async fn apply(&self, resource: &Resource) -> Result<String, SyncError>;

    async fn get(&self, key: &ResourceKey) -> Result<Option<ClusterObject>, SyncError>;

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ClusterEntry>, SyncError>;

    /// Returns `false` if there was nothing to delete.
    async fn delete(&self, key: &ResourceKey) -> Result<bool, SyncError>;
}

#[async_trait]
impl<T: ClusterApi + ?Sized> ClusterApi for Arc<T> {
    async fn apply(&self, resource: &Resource) -> Result<String, SyncError> {
        (**self).apply(resource).await
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<ClusterObject>, SyncError> {
        (**self).get(key).await
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ClusterEntry>, SyncError> {
        (**self).list(kind).await
    }

    async fn delete(&self, key: &ResourceKey) -> Result<bool, SyncError> {
        (**self).delete(key).await
    }
}

// ---------------------------------------------------------------------------
// RetryingCluster
// ---------------------------------------------------------------------------

/// Wraps a [`ClusterApi`] with timeouts and retry.
///
/// A call that exceeds `timeout` counts as a transient connection failure.
/// Non-transient errors are returned immediately.
pub struct RetryingCluster<C> {
    inner: C,
    backoff: BackoffConfig,
    timeout: Duration,
}

impl<C: ClusterApi> RetryingCluster<C> {
    pub fn new(inner: C, backoff: BackoffConfig, timeout: Duration) -> Self {
        Self {
            inner,
            backoff,
            timeout,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, SyncError>> + Send,
        T: Send,
    {
        let timeout = self.timeout;
        let action = || {
            let attempt = call();
            async move {
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::ClusterConnection(format!(
                        "{op} timed out after {}ms",
                        timeout.as_millis()
                    ))),
                }
            }
        };
        let retryable = |err: &SyncError| {
            let transient = err.is_transient();
            if transient {
                debug!(op, "retrying cluster call: {err}");
            }
            transient
        };

        let result = RetryIf::spawn(retry_strategy(&self.backoff), action, retryable).await;
        if let Err(err) = &result {
            if err.is_transient() {
                warn!(op, attempts = self.backoff.max_attempts, "cluster call failed after retries: {err}");
            }
        }
        result
    }
}

/// Delays between attempts: `initial_delay_ms`, then growing by
/// `multiplier` up to `max_delay_ms`, for `max_attempts - 1` retries.
pub(crate) fn retry_strategy(backoff: &BackoffConfig) -> impl Iterator<Item = Duration> {
    let max_delay = Duration::from_millis(backoff.max_delay_ms);
    let factor = backoff.multiplier.round().max(1.0) as u64;
    let growth = ExponentialBackoff::from_millis(factor)
        .factor(backoff.initial_delay_ms)
        .max_delay(max_delay);
    std::iter::once(Duration::from_millis(backoff.initial_delay_ms).min(max_delay))
        .chain(growth)
        .take(backoff.max_attempts.saturating_sub(1) as usize)
}

#[async_trait]
impl<C: ClusterApi> ClusterApi for RetryingCluster<C> {
    async fn apply(&self, resource: &Resource) -> Result<String, SyncError> {
        self.with_retry("apply", || self.inner.apply(resource)).await
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<ClusterObject>, SyncError> {
        self.with_retry("get", || self.inner.get(key)).await
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ClusterEntry>, SyncError> {
        self.with_retry("list", || self.inner.list(kind)).await
    }

    async fn delete(&self, key: &ResourceKey) -> Result<bool, SyncError> {
        self.with_retry("delete", || self.inner.delete(key)).await
    }
}

// ---------------------------------------------------------------------------
// MemoryCluster
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<ResourceKey, Resource>,
}

/// In-memory control plane. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<MemoryState>>,
    applies: Arc<AtomicUsize>,
    unreachable: Arc<AtomicBool>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies that actually changed stored content.
    pub fn apply_count(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    /// Make every call fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Store `resource` directly, as an out-of-band edit would.
    pub fn insert(&self, resource: Resource) {
        self.state.lock().objects.insert(resource.key(), resource);
    }

    /// Remove a resource directly, as an out-of-band delete would.
    pub fn remove(&self, key: &ResourceKey) -> Option<Resource> {
        self.state.lock().objects.remove(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.state.lock().objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_reachable(&self) -> Result<(), SyncError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(SyncError::ClusterConnection("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn apply(&self, resource: &Resource) -> Result<String, SyncError> {
        self.check_reachable()?;
        let hash = resource.content_hash();
        let mut state = self.state.lock();
        let key = resource.key();
        let unchanged = state
            .objects
            .get(&key)
            .map(|current| current.content_hash() == hash)
            .unwrap_or(false);
        if !unchanged {
            state.objects.insert(key, resource.clone());
            self.applies.fetch_add(1, Ordering::SeqCst);
        }
        Ok(hash)
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<ClusterObject>, SyncError> {
        self.check_reachable()?;
        let state = self.state.lock();
        let Some(resource) = state.objects.get(key) else {
            return Ok(None);
        };
        Ok(Some(ClusterObject {
            key: key.clone(),
            content: resource.to_canonical_yaml()?,
            hash: resource.content_hash(),
        }))
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ClusterEntry>, SyncError> {
        self.check_reachable()?;
        let state = self.state.lock();
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(key, resource)| ClusterEntry {
                key: key.clone(),
                hash: resource.content_hash(),
            })
            .collect())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<bool, SyncError> {
        self.check_reachable()?;
        Ok(self.state.lock().objects.remove(key).is_some())
    }
}
