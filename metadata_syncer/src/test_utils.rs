//! Helpers shared by the unit tests.

use crate::config::SyncerConfig;
use crate::event::EventReconciler;
use crate::watcher::MemObjectCache;
use clap::Parser;
use data_types::{
    Claim, ClaimPhase, ClaimRef, ReclaimPolicy, Volume, VolumeHandle, VolumePhase, VolumeRecord,
    VolumeType,
};
use sms_client::{MemVolumeManager, VolumeManager};
use std::sync::Arc;

pub(crate) const TEST_DRIVER: &str = "csi.example.com";
pub(crate) const TEST_CLUSTER: &str = "cluster-a";

/// Config the fixtures run under: vanilla flavor, default interval.
pub(crate) fn test_config() -> SyncerConfig {
    SyncerConfig::parse_from([
        "dummy-program-name",
        "--driver-name",
        TEST_DRIVER,
        "--cluster-id",
        TEST_CLUSTER,
        "--cluster-user",
        "admin@test",
    ])
}

/// A reconciler over fresh in-memory collaborators.
pub(crate) fn reconciler_fixture() -> (EventReconciler, Arc<MemVolumeManager>, Arc<MemObjectCache>)
{
    let manager = Arc::new(MemVolumeManager::new());
    let cache = Arc::new(MemObjectCache::new());
    let reconciler = EventReconciler::new(
        test_config(),
        Arc::clone(&manager) as Arc<dyn VolumeManager>,
        Arc::clone(&cache) as _,
        Arc::default(),
    );
    (reconciler, manager, cache)
}

/// A reconciler over a caller-provided volume manager.
pub(crate) fn reconciler_with_manager(
    manager: Arc<dyn VolumeManager>,
) -> (EventReconciler, Arc<dyn VolumeManager>, Arc<MemObjectCache>) {
    let cache = Arc::new(MemObjectCache::new());
    let reconciler = EventReconciler::new(
        test_config(),
        Arc::clone(&manager),
        Arc::clone(&cache) as _,
        Arc::default(),
    );
    (reconciler, manager, cache)
}

/// A bound claim in `namespace` pointing at `volume_name`.
pub(crate) fn bound_claim(namespace: &str, name: &str, volume_name: &str) -> Claim {
    let mut claim = Claim::arbitrary_for_testing(namespace, name);
    claim.phase = ClaimPhase::Bound;
    claim.volume_name = Some(volume_name.to_owned());
    claim
}

/// A bound, dynamically provisioned block volume of the test driver, with a
/// claim reference into `ns-1`.
pub(crate) fn bound_volume(name: &str, handle: &str, claim_name: &str) -> Volume {
    let mut volume = Volume::arbitrary_for_testing(TEST_DRIVER, name, handle);
    volume.phase = VolumePhase::Bound;
    volume.storage_class = Some("fast".to_owned());
    volume.claim_ref = Some(ClaimRef {
        name: claim_name.to_owned(),
        namespace: "ns-1".to_owned(),
    });
    volume
}

/// A bare catalog record for `name`/`handle` owned by the test cluster.
pub(crate) fn record_for(name: &str, handle: &str) -> VolumeRecord {
    VolumeRecord {
        handle: VolumeHandle::from(handle),
        name: name.to_owned(),
        volume_type: VolumeType::Block,
        cluster_id: TEST_CLUSTER.to_owned(),
        container_cluster_array: Vec::new(),
        entity_metadata: Vec::new(),
        reclaim_policy: ReclaimPolicy::Retain,
    }
}
