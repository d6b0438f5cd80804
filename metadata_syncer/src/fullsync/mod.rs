//! Periodic full synchronization: reconciles the whole orchestrator↔catalog
//! mapping from scratch.
//!
//! One sweep snapshots both sides, diffs them, and acts — but a handle seen
//! on only one side is acted on only after two consecutive sweeps agree, so
//! eventual-consistency lag on either side never triggers a premature create
//! or delete. The [`FullSyncLedger`] carries that confirmation window
//! between sweeps.

mod ledger;

pub use ledger::FullSyncLedger;

use crate::config::SyncerConfig;
use crate::metadata::{
    build_claim_metadata, build_create_spec, build_pod_metadata, build_update_spec,
    build_volume_metadata, volume_type_of,
};
use crate::watcher::ObjectCache;
use data_types::{
    Claim, EntityKey, EntityMetadata, EntityReference, Labels, Pod, PodPhase, QueryFilter,
    ReclaimPolicy, Volume, VolumeHandle, VolumePhase,
};
use sms_client::VolumeManager;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs one full reconciliation sweep at a time.
#[derive(Debug)]
pub struct FullSyncEngine {
    config: SyncerConfig,
    volume_manager: Arc<dyn VolumeManager>,
    cache: Arc<dyn ObjectCache>,
    volume_operations: Arc<Mutex<FullSyncLedger>>,
}

impl FullSyncEngine {
    /// Return an engine over the given collaborators.
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

    /// Run one sweep. Every catalog call is best-effort: a failure is logged
    /// and the handle stays unconfirmed, so the next sweep retries it.
    pub async fn sweep(&self) {
        let start = Instant::now();

        // Snapshot the orchestrator side: stably phased volumes of this
        // driver, keyed by handle, plus the claims they reference and the
        // running pods. Pending and Failed volumes have no business in the
        // catalog, and volumes already being deleted are left to the delete
        // path.
        let mut co_volumes: HashMap<VolumeHandle, Volume> = HashMap::new();
        for volume in self.cache.volumes() {
            let Some(source) = volume
                .csi()
                .filter(|s| s.driver == self.config.driver_name)
            else {
                continue;
            };
            if matches!(volume.phase, VolumePhase::Pending | VolumePhase::Failed)
                || volume.deletion_timestamp.is_some()
            {
                continue;
            }
            co_volumes.insert(source.handle.clone(), volume);
        }

        let mut co_claims: HashMap<(String, String), Claim> = HashMap::new();
        for volume in co_volumes.values() {
            if let Some(claim_ref) = &volume.claim_ref {
                if let Some(claim) = self.cache.get_claim(&claim_ref.namespace, &claim_ref.name) {
                    co_claims.insert((claim.namespace.clone(), claim.name.clone()), claim);
                }
            }
        }

        let co_pods: Vec<Pod> = self
            .cache
            .pods()
            .into_iter()
            .filter(|pod| pod.phase == PodPhase::Running)
            .collect();

        // Snapshot the catalog side, one page at a time. A failed page
        // aborts the sweep with the ledger untouched, keeping the
        // confirmation window intact.
        let mut sms_records: HashMap<VolumeHandle, data_types::VolumeRecord> = HashMap::new();
        let mut filter = QueryFilter::by_cluster(&self.config.cluster_id);
        loop {
            match self.volume_manager.query(filter.clone()).await {
                Ok(result) => {
                    for record in result.records {
                        sms_records.insert(record.handle.clone(), record);
                    }
                    match result.cursor {
                        Some(cursor) => filter.cursor = Some(cursor),
                        None => break,
                    }
                }
                Err(e) => {
                    warn!("full sync: catalog query failed, skipping sweep: {e}");
                    return;
                }
            }
        }

        let only_in_co: Vec<VolumeHandle> = co_volumes
            .keys()
            .filter(|handle| !sms_records.contains_key(handle))
            .cloned()
            .collect();
        let only_in_sms: Vec<VolumeHandle> = sms_records
            .keys()
            .filter(|handle| !co_volumes.contains_key(handle))
            .cloned()
            .collect();
        let in_both: Vec<VolumeHandle> = co_volumes
            .keys()
            .filter(|handle| sms_records.contains_key(handle))
            .cloned()
            .collect();

        let (prior_create, prior_delete) = self.volume_operations.lock().await.take_snapshot();
        let mut next = FullSyncLedger::default();
        let cluster = self.config.container_cluster();

        let mut created = 0usize;
        let mut deleted = 0usize;
        let mut updated = 0usize;

        // Creates, confirmed by the previous sweep.
        for handle in &only_in_co {
            if !prior_create.contains(handle) {
                debug!(%handle, "full sync: volume absent from catalog, deferring create");
                next.mark_pending_create(handle.clone());
                continue;
            }
            let volume = &co_volumes[handle];
            let Some(source) = volume.csi() else {
                continue;
            };
            let entries = self.desired_entries(volume, &co_claims, &co_pods);
            let spec = build_create_spec(volume, source, volume_type_of(volume), &cluster, entries);

            let _operations = self.volume_operations.lock().await;
            match self.volume_manager.create_volume(spec).await {
                Ok(_) => {
                    info!(%handle, volume = %volume.name, "full sync: registered volume in catalog");
                    created += 1;
                }
                Err(e) => {
                    warn!(%handle, "full sync: create failed, will retry next sweep: {e}");
                    next.mark_pending_create(handle.clone());
                }
            }
        }

        // Deletes, confirmed by the previous sweep. The orchestrator object
        // is gone, so the reclaim policy comes from the last-known record.
        for handle in &only_in_sms {
            if !prior_delete.contains(handle) {
                debug!(%handle, "full sync: record has no volume, deferring delete");
                next.mark_pending_delete(handle.clone());
                continue;
            }
            let record = &sms_records[handle];
            let delete_disk = record.reclaim_policy == ReclaimPolicy::Delete;

            let _operations = self.volume_operations.lock().await;
            match self.volume_manager.delete_volume(handle, delete_disk).await {
                Ok(()) => {
                    info!(%handle, delete_disk, "full sync: removed stale catalog record");
                    deleted += 1;
                }
                Err(e) => {
                    warn!(%handle, "full sync: delete failed, will retry next sweep: {e}");
                    next.mark_pending_delete(handle.clone());
                }
            }
        }

        // Updates for volumes on both sides whose projection drifted. No
        // ledger entry on failure: the drift persists, so the next sweep
        // retries on its own.
        for handle in &in_both {
            let volume = &co_volumes[handle];
            let record = &sms_records[handle];
            let desired = self.desired_entries(volume, &co_claims, &co_pods);
            if !projection_differs(&record.entity_metadata, &desired, &self.config.cluster_id) {
                continue;
            }
            debug!(%handle, "full sync: metadata drifted, updating");
            let spec = build_update_spec(handle, &cluster, desired);

            let _operations = self.volume_operations.lock().await;
            match self.volume_manager.update_metadata(spec).await {
                Ok(()) => updated += 1,
                Err(e) => {
                    warn!(%handle, "full sync: update failed, will retry next sweep: {e}");
                }
            }
        }

        *self.volume_operations.lock().await = next;

        info!(
            matched = in_both.len(),
            created,
            deleted,
            updated,
            pending_create = only_in_co.len() - created,
            pending_delete = only_in_sms.len() - deleted,
            duration = ?start.elapsed(),
            "full sync: sweep complete"
        );
    }

    /// The metadata entries the record should carry for this cluster: the
    /// volume itself, its bound claim if cached, and every running pod
    /// mounting that claim.
    fn desired_entries(
        &self,
        volume: &Volume,
        claims: &HashMap<(String, String), Claim>,
        pods: &[Pod],
    ) -> Vec<EntityMetadata> {
        let cluster_id = &self.config.cluster_id;
        let mut entries = vec![build_volume_metadata(volume, false, cluster_id)];
        let Some(claim_ref) = &volume.claim_ref else {
            return entries;
        };
        let Some(claim) = claims.get(&(claim_ref.namespace.clone(), claim_ref.name.clone())) else {
            return entries;
        };
        entries.push(build_claim_metadata(claim, false, cluster_id, &volume.name));
        for pod in pods {
            let mounts_claim = pod.namespace == claim.namespace
                && pod
                    .volumes
                    .iter()
                    .any(|v| v.claim_name.as_deref() == Some(claim.name.as_str()));
            if mounts_claim {
                entries.push(build_pod_metadata(pod, false, cluster_id, Some(claim)));
            }
        }
        entries
    }
}

/// Whether this cluster's entries on the record differ from the desired
/// projection, keyed per entity and compared order-insensitively. Entries
/// from other clusters never count as drift.
fn projection_differs(
    current: &[EntityMetadata],
    desired: &[EntityMetadata],
    cluster_id: &str,
) -> bool {
    fn index<'a>(
        entries: &'a [EntityMetadata],
        cluster_id: &str,
    ) -> BTreeMap<EntityKey, (&'a Labels, &'a [EntityReference])> {
        entries
            .iter()
            .filter(|e| e.cluster_id == cluster_id)
            .map(|e| (e.key(), (&e.labels, e.references.as_slice())))
            .collect()
    }
    index(current, cluster_id) != index(desired, cluster_id)
}

/// Fire a sweep every `sync_interval` until shutdown. Ticks that land while
/// a sweep is still running are dropped, not queued.
pub(crate) async fn perform(
    engine: FullSyncEngine,
    sync_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // An interval's first tick fires immediately; the first sweep should
    // wait a full interval like every later one.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                debug!("full sync: triggered");
                engine.sweep().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{bound_claim, bound_volume, record_for, test_config};
    use crate::watcher::MemObjectCache;
    use data_types::EntityKind;
    use sms_client::{Error, MemVolumeManager, Operation};

    fn engine_fixture() -> (
        FullSyncEngine,
        Arc<MemVolumeManager>,
        Arc<MemObjectCache>,
        Arc<Mutex<FullSyncLedger>>,
    ) {
        let manager = Arc::new(MemVolumeManager::new());
        let cache = Arc::new(MemObjectCache::new());
        let ledger = Arc::new(Mutex::new(FullSyncLedger::default()));
        let engine = FullSyncEngine::new(
            test_config(),
            Arc::clone(&manager) as _,
            Arc::clone(&cache) as _,
            Arc::clone(&ledger),
        );
        (engine, manager, cache, ledger)
    }

    fn seed_bound_pair(cache: &MemObjectCache, volume: &str, handle: &str, claim: &str) {
        cache.upsert_volume(bound_volume(volume, handle, claim));
        cache.upsert_claim(bound_claim("ns-1", claim, volume));
    }

    #[tokio::test]
    async fn creates_need_two_consecutive_sweeps() {
        let (engine, manager, cache, ledger) = engine_fixture();
        seed_bound_pair(&cache, "pv-1", "h-1", "c-1");

        engine.sweep().await;
        assert!(manager.mutations().is_empty());
        assert!(!ledger.lock().await.is_empty());

        engine.sweep().await;
        let mutations = manager.mutations();
        assert_eq!(mutations.len(), 1);
        let Operation::CreateVolume(spec) = &mutations[0] else {
            panic!("expected a create, got {mutations:?}");
        };
        assert_eq!(spec.name, "pv-1");
        // The new record carries the full projection: volume plus claim.
        let record = manager.record(&VolumeHandle::from("h-1")).unwrap();
        assert!(record
            .entity_metadata
            .iter()
            .any(|e| e.kind == EntityKind::Volume));
        assert!(record
            .entity_metadata
            .iter()
            .any(|e| e.kind == EntityKind::Claim));
        // Confirmed entries left the ledger.
        assert!(ledger.lock().await.is_empty());
    }

    #[tokio::test]
    async fn transient_catalog_lag_is_absorbed() {
        let (engine, manager, cache, _ledger) = engine_fixture();
        seed_bound_pair(&cache, "pv-2", "h-2", "c-2");

        // Sweep 1: the catalog has not caught up yet.
        engine.sweep().await;
        assert!(manager.mutations().is_empty());

        // The catalog catches up before sweep 2.
        manager.insert_record(record_for("pv-2", "h-2"));
        engine.sweep().await;

        // No create; the drifted (empty) projection is updated instead.
        let mutations = manager.mutations();
        assert!(!mutations
            .iter()
            .any(|op| matches!(op, Operation::CreateVolume(_))));
        assert_eq!(
            mutations
                .iter()
                .filter(|op| matches!(op, Operation::UpdateMetadata(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn deletes_need_two_consecutive_sweeps() {
        let (engine, manager, _cache, _ledger) = engine_fixture();
        let mut record = record_for("pv-9", "h-9");
        record.reclaim_policy = ReclaimPolicy::Delete;
        manager.insert_record(record);

        engine.sweep().await;
        assert!(manager.mutations().is_empty());

        engine.sweep().await;
        let mutations = manager.mutations();
        assert_eq!(
            mutations,
            vec![Operation::DeleteVolume {
                handle: VolumeHandle::from("h-9"),
                delete_disk: true,
            }]
        );
    }

    #[tokio::test]
    async fn retained_records_keep_their_disk_on_full_sync_delete() {
        let (engine, manager, _cache, _ledger) = engine_fixture();
        manager.insert_record(record_for("pv-9", "h-9"));

        engine.sweep().await;
        engine.sweep().await;

        let mutations = manager.mutations();
        assert_eq!(
            mutations,
            vec![Operation::DeleteVolume {
                handle: VolumeHandle::from("h-9"),
                delete_disk: false,
            }]
        );
    }

    #[tokio::test]
    async fn records_of_other_clusters_are_untouched() {
        let (engine, manager, _cache, _ledger) = engine_fixture();
        let mut record = record_for("pv-b", "h-b");
        record.cluster_id = "cluster-b".into();
        manager.insert_record(record);

        engine.sweep().await;
        engine.sweep().await;

        assert!(manager.mutations().is_empty());
    }

    #[tokio::test]
    async fn converged_sides_produce_no_calls() {
        let (engine, manager, cache, _ledger) = engine_fixture();
        seed_bound_pair(&cache, "pv-1", "h-1", "c-1");

        // Converge through the two-sweep create, then clear the history.
        engine.sweep().await;
        engine.sweep().await;
        manager.take_operations();

        engine.sweep().await;
        engine.sweep().await;
        assert!(manager.mutations().is_empty());
    }

    #[tokio::test]
    async fn running_pods_join_the_projection() {
        let (engine, manager, cache, _ledger) = engine_fixture();
        seed_bound_pair(&cache, "pv-1", "h-1", "c-1");
        let mut pod = data_types::Pod::arbitrary_for_testing("ns-1", "p-1", &["c-1"]);
        pod.phase = PodPhase::Running;
        cache.upsert_pod(pod);
        // A pending pod on the same claim must not appear.
        cache.upsert_pod(data_types::Pod::arbitrary_for_testing("ns-1", "p-2", &["c-1"]));

        engine.sweep().await;
        engine.sweep().await;

        let record = manager.record(&VolumeHandle::from("h-1")).unwrap();
        let pods: Vec<_> = record
            .entity_metadata
            .iter()
            .filter(|e| e.kind == EntityKind::Pod)
            .collect();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "p-1");
    }

    #[tokio::test]
    async fn failed_creates_stay_in_the_ledger() {
        let (engine, manager, cache, _ledger) = engine_fixture();
        seed_bound_pair(&cache, "pv-1", "h-1", "c-1");

        engine.sweep().await;
        manager.inject_error(Error::Transient {
            descr: "service restarting".into(),
        });
        engine.sweep().await;
        assert!(manager.record(&VolumeHandle::from("h-1")).is_none());

        // The handle stayed confirmed, so the third sweep retries.
        engine.sweep().await;
        assert!(manager.record(&VolumeHandle::from("h-1")).is_some());
    }

    #[tokio::test]
    async fn aborted_sweeps_leave_the_confirmation_window_intact() {
        let (engine, manager, cache, ledger) = engine_fixture();
        seed_bound_pair(&cache, "pv-1", "h-1", "c-1");

        engine.sweep().await;
        assert!(!ledger.lock().await.is_empty());

        // The snapshot query fails; the sweep skips without touching the
        // ledger.
        manager.inject_query_error(Error::Transient {
            descr: "paging failed".into(),
        });
        engine.sweep().await;
        assert!(manager.mutations().is_empty());
        assert!(!ledger.lock().await.is_empty());

        // The next healthy sweep still sees the handle as confirmed.
        engine.sweep().await;
        assert!(manager.record(&VolumeHandle::from("h-1")).is_some());
    }

    #[tokio::test]
    async fn unstable_and_foreign_volumes_are_not_snapshotted() {
        let (engine, manager, cache, _ledger) = engine_fixture();

        // Unstable phases of this driver.
        let mut pending = bound_volume("pv-p", "h-p", "c-p");
        pending.phase = VolumePhase::Pending;
        cache.upsert_volume(pending);
        let mut failed = bound_volume("pv-x", "h-x", "c-x");
        failed.phase = VolumePhase::Failed;
        cache.upsert_volume(failed);
        // Already being deleted.
        let mut going = bound_volume("pv-g", "h-g", "c-g");
        going.deletion_timestamp = Some(chrono::Utc::now());
        cache.upsert_volume(going);
        // Bound volume of a different driver.
        let mut foreign = bound_volume("pv-f", "h-f", "c-f");
        foreign.source.as_mut().unwrap().driver = "other.example.com".into();
        cache.upsert_volume(foreign);

        engine.sweep().await;
        engine.sweep().await;

        assert!(manager.mutations().is_empty());
    }

    #[tokio::test]
    async fn adopted_available_volumes_keep_their_record() {
        let (engine, manager, cache, _ledger) = engine_fixture();

        // A statically provisioned volume that was adopted but never bound.
        let mut volume = bound_volume("pv-s", "h-s", "c-s");
        volume.phase = VolumePhase::Available;
        volume.claim_ref = None;
        volume.storage_class = None;
        cache.upsert_volume(volume);
        manager.insert_record(record_for("pv-s", "h-s"));

        engine.sweep().await;
        engine.sweep().await;

        assert!(!manager
            .mutations()
            .iter()
            .any(|op| matches!(op, Operation::DeleteVolume { .. })));
        assert!(manager.record(&VolumeHandle::from("h-s")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_waits_a_full_interval_between_sweeps() {
        let (engine, manager, _cache, _ledger) = engine_fixture();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(perform(
            engine,
            Duration::from_secs(30 * 60),
            shutdown.clone(),
        ));

        // Give the spawned loop a chance to run between clock steps.
        async fn settle() {
            for _ in 0..16 {
                tokio::task::yield_now().await;
            }
        }

        // The loop starts and swallows the immediate first tick.
        settle().await;
        assert!(manager.operations().is_empty());

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        settle().await;
        assert!(manager.operations().is_empty());

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        settle().await;
        // The sweep ran: its catalog snapshot query is on record.
        assert_eq!(manager.operations().len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
