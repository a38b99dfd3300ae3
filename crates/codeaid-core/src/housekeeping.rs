//! Scoped pruning of container images pulled by a run.
//!
//! The image cache is shared with everything else on the host, so only images
//! that a run referenced and that were absent before it started are removed,
//! and never with force. Every failure here is logged and swallowed.
//!
//! Runs that share one [`ImageCache`] hold a lease from before their snapshot
//! until their prune. A run that finishes while others still hold leases
//! defers its candidates. The last run out removes them, so a concurrent run
//! never loses an image it pulled after another run's snapshot.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tokio_util::sync::CancellationToken;

use crate::domain::normalize_image_reference;
use crate::sandbox::ContainerRuntime;

/// Images present in the local cache at some point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSnapshot {
    images: BTreeSet<String>,
}

impl ImageSnapshot {
    pub fn new<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            images: images
                .into_iter()
                .map(|i| normalize_image_reference(i.as_ref()))
                .collect(),
        }
    }

    pub fn contains(&self, image: &str) -> bool {
        self.images.contains(&normalize_image_reference(image))
    }
}

/// What one prune pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub removed: Vec<String>,
    /// Images that were candidates but could not be removed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Candidates handed to the last active run because others were in flight.
    #[serde(default)]
    pub deferred: Vec<String>,
}

/// Prune coordination for runs sharing one local image cache.
#[derive(Debug, Default)]
pub struct ImageCache {
    active: Arc<RwLock<()>>,
    deferred: Mutex<BTreeSet<String>>,
}

impl ImageCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Images waiting for a quiet moment to be removed.
    pub fn deferred(&self) -> Vec<String> {
        self.pending().iter().cloned().collect()
    }

    fn pending(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.deferred
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Marks a run as active on an [`ImageCache`] until handed back to [`ImagePruner::prune`].
#[derive(Debug)]
pub struct CacheLease {
    _guard: OwnedRwLockReadGuard<()>,
}

/// Removes the images a run introduced.
pub struct ImagePruner {
    runtime: Arc<dyn ContainerRuntime>,
    cache: Arc<ImageCache>,
}

impl ImagePruner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            cache: ImageCache::new(),
        }
    }

    /// Coordinate with every other pruner holding the same cache.
    pub fn with_cache(mut self, cache: Arc<ImageCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Register an active run. Waits only while another run is pruning.
    pub async fn lease(&self) -> CacheLease {
        CacheLease {
            _guard: self.cache.active.clone().read_owned().await,
        }
    }

    /// Current cache contents, or `None` if the runtime could not list them.
    pub async fn snapshot(&self, cancel: &CancellationToken) -> Option<ImageSnapshot> {
        match self.runtime.list_images(cancel).await {
            Ok(images) => {
                let snapshot = ImageSnapshot::new(images);
                tracing::debug!(images = snapshot.images.len(), "Image cache snapshot");
                Some(snapshot)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not list images; pruning disabled for this run");
                None
            }
        }
    }

    /// Remove every image in `referenced` that `before` did not contain.
    ///
    /// Releases `lease`. If other runs are still active the candidates are
    /// deferred to whichever of them finishes last.
    pub async fn prune(
        &self,
        before: &ImageSnapshot,
        referenced: &[String],
        lease: CacheLease,
        cancel: &CancellationToken,
    ) -> PruneReport {
        drop(lease);
        let candidates: BTreeSet<String> = referenced
            .iter()
            .map(|i| normalize_image_reference(i))
            .filter(|i| !before.contains(i))
            .collect();

        let mut report = PruneReport::default();
        let Ok(_exclusive) = self.cache.active.try_write() else {
            if !candidates.is_empty() {
                tracing::info!(images = candidates.len(), "Other runs active; deferring prune");
                self.cache.pending().extend(candidates.iter().cloned());
            }
            report.deferred = candidates.into_iter().collect();
            return report;
        };

        let mut targets = std::mem::take(&mut *self.cache.pending());
        targets.extend(candidates);
        for image in targets {
            match self.runtime.remove_image(&image, cancel).await {
                Ok(()) => {
                    tracing::info!(image = %image, "Pruned image");
                    report.removed.push(image);
                }
                Err(e) => {
                    tracing::warn!(image = %image, error = %e, "Image prune failed");
                    report.failed.push((image, e.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeContainerRuntime;

    #[test]
    fn test_snapshot_normalizes_references() {
        let snapshot = ImageSnapshot::new(["python", "openjdk:17"]);
        assert!(snapshot.contains("python:latest"));
        assert!(snapshot.contains("openjdk:17"));
        assert!(!snapshot.contains("openjdk:21"));
        assert!(!snapshot.contains("node"));
    }

    #[tokio::test]
    async fn test_prune_removes_only_new_images() {
        let runtime = Arc::new(FakeContainerRuntime::new().with_images(["python:3.12"]));
        let pruner = ImagePruner::new(runtime.clone());
        let cancel = CancellationToken::new();

        let lease = pruner.lease().await;
        let before = pruner.snapshot(&cancel).await.unwrap();
        let report = pruner
            .prune(
                &before,
                &[
                    "python:3.12".to_string(),
                    "openjdk:17".to_string(),
                    "openjdk:17".to_string(),
                ],
                lease,
                &cancel,
            )
            .await;

        assert_eq!(report.removed, vec!["openjdk:17"]);
        assert!(report.failed.is_empty());
        assert!(report.deferred.is_empty());
        assert_eq!(runtime.removed_images(), vec!["openjdk:17"]);
    }

    #[tokio::test]
    async fn test_prune_failure_is_reported_not_raised() {
        let runtime = Arc::new(FakeContainerRuntime::new().failing_image_removal());
        let pruner = ImagePruner::new(runtime);
        let lease = pruner.lease().await;
        let report = pruner
            .prune(
                &ImageSnapshot::default(),
                &["python:3.12".to_string()],
                lease,
                &CancellationToken::new(),
            )
            .await;
        assert!(report.removed.is_empty());
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_prune_defers_while_another_run_is_active() {
        let runtime = Arc::new(FakeContainerRuntime::new());
        let cache = ImageCache::new();
        let first = ImagePruner::new(runtime.clone()).with_cache(cache.clone());
        let second = ImagePruner::new(runtime.clone()).with_cache(cache.clone());
        let cancel = CancellationToken::new();

        let first_lease = first.lease().await;
        let second_lease = second.lease().await;
        let before = ImageSnapshot::default();

        let early = first
            .prune(&before, &["node:20".to_string()], first_lease, &cancel)
            .await;
        assert!(early.removed.is_empty());
        assert_eq!(early.deferred, vec!["node:20"]);
        assert_eq!(cache.deferred(), vec!["node:20"]);
        assert!(runtime.removed_images().is_empty());

        let last = second
            .prune(&before, &["python:3.12".to_string()], second_lease, &cancel)
            .await;
        assert_eq!(last.removed, vec!["node:20", "python:3.12"]);
        assert!(cache.deferred().is_empty());
    }
}
