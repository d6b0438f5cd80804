//! Event-driven reconciliation: translates watcher callbacks into metadata
//! operations against the storage service.

mod claim;
mod pod;
mod volume;

use crate::config::SyncerConfig;
use crate::fullsync::FullSyncLedger;
use crate::watcher::{ObjectCache, WatchEvent};
use data_types::UpdateSpec;
use sms_client::VolumeManager;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Routes watcher events to the per-resource handlers.
///
/// Every handler is a terminal consumer: failures are logged and the handler
/// returns, leaving convergence to the next event or the next full sweep.
#[derive(Debug)]
pub struct EventReconciler {
    config: SyncerConfig,
    volume_manager: Arc<dyn VolumeManager>,
    cache: Arc<dyn ObjectCache>,
    // Serialises every service-mutating call in the process; the full-sync
    // ledger lives under the same guard.
    volume_operations: Arc<Mutex<FullSyncLedger>>,
}

impl EventReconciler {
    /// Return a reconciler over the given collaborators.
    pub fn new(
        config: SyncerConfig,
        volume_manager: Arc<dyn VolumeManager>,
        cache: Arc<dyn ObjectCache>,
        volume_operations: Arc<Mutex<FullSyncLedger>>,
    ) -> Self {
        Self {
            config,
            volume_manager,
            cache,
            volume_operations,
        }
    }

    fn driver_name(&self) -> &str {
        &self.config.driver_name
    }

    fn cluster_id(&self) -> &str {
        &self.config.cluster_id
    }

    /// Issue an `UpdateMetadata` while holding the operations lock.
    async fn locked_update(&self, spec: UpdateSpec) -> sms_client::Result<()> {
        let _operations = self.volume_operations.lock().await;
        self.volume_manager.update_metadata(spec).await
    }

    /// Route one event. Add events carry nothing to reconcile; the first
    /// Bound/Running transition arrives as an update.
    pub async fn dispatch(&self, event: WatchEvent) {
        match event {
            WatchEvent::ClaimUpdated { old, new } => self.claim_updated(&old, &new).await,
            WatchEvent::ClaimDeleted(claim) => self.claim_deleted(&claim).await,
            WatchEvent::VolumeUpdated { old, new } => self.volume_updated(&old, &new).await,
            WatchEvent::VolumeDeleted(volume) => self.volume_deleted(&volume).await,
            WatchEvent::PodUpdated { old, new } => self.pod_updated(&old, &new).await,
            WatchEvent::PodDeleted(pod) => self.pod_deleted(&pod).await,
            WatchEvent::ClaimAdded(claim) => {
                debug!(claim = %claim.name, namespace = %claim.namespace, "ignoring claim add");
            }
            WatchEvent::VolumeAdded(volume) => {
                debug!(volume = %volume.name, "ignoring volume add");
            }
            WatchEvent::PodAdded(pod) => {
                debug!(pod = %pod.name, namespace = %pod.namespace, "ignoring pod add");
            }
        }
    }
}

/// Consume watcher events until the channel closes or shutdown is
/// signalled. In-flight handlers finish before the loop exits.
pub(crate) async fn perform(
    reconciler: EventReconciler,
    mut events: mpsc::Receiver<WatchEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                break;
            }
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => reconciler.dispatch(event).await,
                    None => {
                        warn!("watcher event channel closed, stopping event reconciliation");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{bound_claim, bound_volume, test_config};
    use data_types::{Claim, ClaimPhase};
    use sms_client::MemVolumeManager;

    #[tokio::test]
    async fn add_events_issue_no_service_calls() {
        let manager = Arc::new(MemVolumeManager::new());
        let cache = Arc::new(crate::watcher::MemObjectCache::new());
        let reconciler = EventReconciler::new(
            test_config(),
            Arc::clone(&manager) as _,
            cache as _,
            Arc::default(),
        );

        let mut claim: Claim = bound_claim("ns-1", "c-1", "pv-1");
        claim.phase = ClaimPhase::Pending;
        reconciler.dispatch(WatchEvent::ClaimAdded(claim)).await;
        reconciler
            .dispatch(WatchEvent::VolumeAdded(bound_volume("pv-1", "h-1", "c-1")))
            .await;

        assert!(manager.operations().is_empty());
    }

    #[tokio::test]
    async fn perform_stops_when_the_channel_closes() {
        let manager = Arc::new(MemVolumeManager::new());
        let cache = Arc::new(crate::watcher::MemObjectCache::new());
        let reconciler = EventReconciler::new(
            test_config(),
            manager as _,
            cache as _,
            Arc::default(),
        );

        let (tx, rx) = mpsc::channel(4);
        drop(tx);
        // Must return rather than hang.
        perform(reconciler, rx, CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn perform_stops_on_shutdown() {
        let manager = Arc::new(MemVolumeManager::new());
        let cache = Arc::new(crate::watcher::MemObjectCache::new());
        let reconciler = EventReconciler::new(
            test_config(),
            manager as _,
            cache as _,
            Arc::default(),
        );

        let (_tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        perform(reconciler, rx, shutdown).await;
    }
}
