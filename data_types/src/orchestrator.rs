//! Orchestrator-side objects: claims, volumes, pods and their lifecycle
//! phases, as cached by the watcher.

use crate::VolumeHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Label maps compare order-insensitively, which is exactly what a sorted map
/// gives us for free.
pub type Labels = BTreeMap<String, String>;

/// Filesystem kinds the storage service treats as file shares rather than
/// block disks.
pub const NFS_FS_TYPE: &str = "nfs";
/// NFSv4 variant of [`NFS_FS_TYPE`].
pub const NFS_V4_FS_TYPE: &str = "nfs4";

/// Bind phase of a [`Claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    /// Created but not yet bound to a volume.
    Pending,
    /// Bound to a volume.
    Bound,
    /// The bound volume disappeared out from under the claim.
    Lost,
}

/// Lifecycle phase of a [`Volume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumePhase {
    /// Not yet ready for binding.
    Pending,
    /// Ready and unbound.
    Available,
    /// Bound to a claim.
    Bound,
    /// The bound claim was deleted; awaiting reclaim.
    Released,
    /// Reclaim failed.
    Failed,
}

/// Lifecycle phase of a [`Pod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted but containers not all running.
    Pending,
    /// All containers running.
    Running,
    /// Terminal success.
    Succeeded,
    /// Terminal failure.
    Failed,
}

/// What happens to the backing storage once a volume's claim is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    /// Destroy the backing storage.
    Delete,
    /// Keep the backing storage for manual cleanup.
    Retain,
}

/// A namespaced request for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Object name, unique within `namespace`.
    pub name: String,
    /// Owning namespace.
    pub namespace: String,
    /// User labels; projected into the volume record while the claim is
    /// bound.
    pub labels: Labels,
    /// Bind phase.
    pub phase: ClaimPhase,
    /// Name of the bound [`Volume`], set once `phase` is
    /// [`ClaimPhase::Bound`].
    pub volume_name: Option<String>,
    /// UID of the claim object itself.
    pub owner_uid: Uuid,
}

impl Claim {
    /// Claim with the given coordinates in phase Pending; tests fill in the
    /// rest.
    pub fn arbitrary_for_testing(namespace: &str, name: &str) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: Labels::new(),
            phase: ClaimPhase::Pending,
            volume_name: None,
            owner_uid: Uuid::new_v4(),
        }
    }
}

/// Reference from a [`Volume`] back to the claim bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRef {
    /// Claim name.
    pub name: String,
    /// Claim namespace.
    pub namespace: String,
}

/// The driver-specific portion of a volume: which CSI driver provisioned it
/// and how the storage service addresses it. Volumes provisioned by other
/// means carry no source and are invisible to the syncer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiSource {
    /// Driver identifier; compared against the syncer's own driver name.
    pub driver: String,
    /// Opaque storage-service identifier, the primary key linking the two
    /// sides.
    pub handle: VolumeHandle,
    /// Filesystem kind, e.g. `ext4` or `nfs`.
    pub fs_type: String,
}

/// A cluster-scoped storage object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Object name, cluster-unique.
    pub name: String,
    /// User labels; projected into the volume record.
    pub labels: Labels,
    /// CSI source, if this volume was provisioned through a CSI driver.
    pub source: Option<CsiSource>,
    /// Reclaim behavior once the claim is gone.
    pub reclaim_policy: ReclaimPolicy,
    /// Lifecycle phase.
    pub phase: VolumePhase,
    /// Back-reference to the bound claim, if any.
    pub claim_ref: Option<ClaimRef>,
    /// Storage class used to provision this volume; `None` for statically
    /// pre-provisioned volumes.
    pub storage_class: Option<String>,
    /// Set once the orchestrator has begun deleting the object.
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl Volume {
    /// Whether this volume belongs to the driver named `driver`.
    pub fn is_driver_volume(&self, driver: &str) -> bool {
        self.source.as_ref().is_some_and(|s| s.driver == driver)
    }

    /// The CSI source, present iff this is a CSI-provisioned volume.
    pub fn csi(&self) -> Option<&CsiSource> {
        self.source.as_ref()
    }

    /// Whether the filesystem kind maps to a file share on the storage
    /// service (NFS family) rather than a block disk.
    pub fn is_file_volume(&self) -> bool {
        self.source
            .as_ref()
            .is_some_and(|s| s.fs_type == NFS_FS_TYPE || s.fs_type == NFS_V4_FS_TYPE)
    }

    /// Block volume owned by `driver` with the given name and handle, in
    /// phase Pending; tests adjust the rest.
    pub fn arbitrary_for_testing(driver: &str, name: &str, handle: &str) -> Self {
        Self {
            name: name.into(),
            labels: Labels::new(),
            source: Some(CsiSource {
                driver: driver.into(),
                handle: VolumeHandle::from(handle),
                fs_type: "ext4".into(),
            }),
            reclaim_policy: ReclaimPolicy::Delete,
            phase: VolumePhase::Pending,
            claim_ref: None,
            storage_class: None,
            deletion_timestamp: None,
        }
    }
}

/// One volume slot in a pod spec. Only slots backed by a claim matter to the
/// syncer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodVolume {
    /// Slot name within the pod.
    pub name: String,
    /// Name of the referenced claim in the pod's namespace, if the slot is
    /// claim-backed.
    pub claim_name: Option<String>,
}

/// A workload referencing zero or more claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    /// Object name, unique within `namespace`.
    pub name: String,
    /// Owning namespace.
    pub namespace: String,
    /// Lifecycle phase.
    pub phase: PodPhase,
    /// Volume slots declared by the pod.
    pub volumes: Vec<PodVolume>,
}

impl Pod {
    /// Pod in phase Pending referencing the given claims.
    pub fn arbitrary_for_testing(namespace: &str, name: &str, claim_names: &[&str]) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            phase: PodPhase::Pending,
            volumes: claim_names
                .iter()
                .enumerate()
                .map(|(i, claim)| PodVolume {
                    name: format!("vol-{i}"),
                    claim_name: Some((*claim).into()),
                })
                .collect(),
        }
    }
}
