//! Storage-management-service wire model: the catalog's projection of a
//! volume and the payloads of the four RPCs the syncer issues against it.

use crate::{Labels, ReclaimPolicy};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Opaque identifier issued by the storage system; the primary key linking
/// orchestrator objects to catalog records.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VolumeHandle(String);

impl VolumeHandle {
    /// Wrap a raw handle string.
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The raw handle string.
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for VolumeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VolumeHandle {
    fn from(handle: &str) -> Self {
        Self(handle.to_owned())
    }
}

impl From<String> for VolumeHandle {
    fn from(handle: String) -> Self {
        Self(handle)
    }
}

/// Which kind of orchestrator object an [`EntityMetadata`] entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A persistent volume claim.
    Claim,
    /// A persistent volume.
    Volume,
    /// A pod.
    Pod,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claim => write!(f, "CLAIM"),
            Self::Volume => write!(f, "VOLUME"),
            Self::Pod => write!(f, "POD"),
        }
    }
}

/// Reference from one metadata entry to another participating entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReference {
    /// Kind of the referenced entity.
    pub kind: EntityKind,
    /// Name of the referenced entity.
    pub name: String,
    /// Namespace of the referenced entity; empty for cluster-scoped kinds.
    pub namespace: String,
}

/// Catalog records key metadata entries by this triple.
pub type EntityKey = (EntityKind, String, String);

/// One entity's participation in a volume, as stored on the catalog record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity name.
    pub name: String,
    /// Entity namespace; empty for cluster-scoped kinds.
    pub namespace: String,
    /// Labels carried by the entity. Empty in the delete direction and for
    /// pods.
    pub labels: Labels,
    /// When set, this entry removes the entity's participation rather than
    /// recording it.
    pub delete: bool,
    /// Cluster this entity lives in.
    pub cluster_id: String,
    /// References to other participating entities. Empty in the delete
    /// direction.
    pub references: Vec<EntityReference>,
}

impl EntityMetadata {
    /// The key the catalog replaces entries under.
    pub fn key(&self) -> EntityKey {
        (self.kind, self.name.clone(), self.namespace.clone())
    }
}

/// Which cluster variant the syncer runs in. The guest flavor swaps in a
/// different `VolumeManager` backend; the syncer logic is flavor-independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterFlavor {
    /// A standalone cluster talking directly to the storage service.
    Vanilla,
    /// A supervisor cluster.
    Supervisor,
    /// A guest cluster, proxied through its supervisor.
    Guest,
}

impl Display for ClusterFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vanilla => write!(f, "vanilla"),
            Self::Supervisor => write!(f, "supervisor"),
            Self::Guest => write!(f, "guest"),
        }
    }
}

impl FromStr for ClusterFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vanilla" => Ok(Self::Vanilla),
            "supervisor" => Ok(Self::Supervisor),
            "guest" => Ok(Self::Guest),
            other => Err(format!("unknown cluster flavor: {other}")),
        }
    }
}

/// Identity of the cluster issuing a mutation, carried in every create and
/// update payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCluster {
    /// Cluster identifier.
    pub cluster_id: String,
    /// Service user the driver authenticates as.
    pub user: String,
    /// Cluster flavor.
    pub flavor: ClusterFlavor,
}

/// Whether the catalog tracks a volume as a block disk or a file share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeType {
    /// Block-backed.
    Block,
    /// File-share-backed (NFS family).
    File,
}

impl Display for VolumeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => write!(f, "BLOCK"),
            Self::File => write!(f, "FILE"),
        }
    }
}

/// Backing-object identity for a create, keyed by volume type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingObjectDetails {
    /// Block volumes register the existing disk.
    BlockDisk {
        /// Disk identifier; the volume handle for adopted volumes.
        backing_disk_id: VolumeHandle,
    },
    /// File volumes register the existing share.
    FileShare {
        /// File share identifier; the volume handle for adopted volumes.
        backing_file_id: VolumeHandle,
    },
}

impl BackingObjectDetails {
    /// The backing identifier regardless of volume type.
    pub fn backing_id(&self) -> &VolumeHandle {
        match self {
            Self::BlockDisk { backing_disk_id } => backing_disk_id,
            Self::FileShare { backing_file_id } => backing_file_id,
        }
    }
}

/// Metadata block shared by create and update payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMetadata {
    /// The issuing cluster.
    pub container_cluster: ContainerCluster,
    /// All clusters known to participate in this volume.
    pub container_cluster_array: Vec<ContainerCluster>,
    /// Entity entries carried by this payload.
    pub entity_metadata: Vec<EntityMetadata>,
}

/// Payload of `UpdateMetadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSpec {
    /// Volume to update.
    pub volume_id: VolumeHandle,
    /// Entries to merge into the record, keyed per entity.
    pub metadata: VolumeMetadata,
}

/// Payload of `CreateVolume`; only issued for static-provisioning adoption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSpec {
    /// Volume object name on the orchestrator side.
    pub name: String,
    /// Block or file.
    pub volume_type: VolumeType,
    /// Initial metadata, including the issuing cluster.
    pub metadata: VolumeMetadata,
    /// Identity of the pre-existing backing object being adopted.
    pub backing: BackingObjectDetails,
    /// Reclaim policy of the orchestrator volume, kept on the record so a
    /// later delete can decide whether the disk goes too.
    pub reclaim_policy: ReclaimPolicy,
}

/// The catalog's projection of one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Primary key.
    pub handle: VolumeHandle,
    /// Volume object name at creation time.
    pub name: String,
    /// Block or file.
    pub volume_type: VolumeType,
    /// Cluster that owns the record.
    pub cluster_id: String,
    /// All clusters participating in the volume.
    pub container_cluster_array: Vec<ContainerCluster>,
    /// Per-entity participation entries.
    pub entity_metadata: Vec<EntityMetadata>,
    /// Reclaim policy captured at create time; Retain when the record was
    /// created out-of-band.
    pub reclaim_policy: ReclaimPolicy,
}

/// Filter for `Query`. Conditions compose conjunctively; an empty filter
/// matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Restrict to these handles. Unknown handles simply produce no records.
    pub handles: Vec<VolumeHandle>,
    /// Restrict to records owned by this cluster.
    pub cluster_id: Option<String>,
    /// Resume token from a previous page.
    pub cursor: Option<u64>,
}

impl QueryFilter {
    /// Filter matching exactly one handle.
    pub fn by_handle(handle: &VolumeHandle) -> Self {
        Self {
            handles: vec![handle.clone()],
            ..Default::default()
        }
    }

    /// Filter matching every record owned by `cluster_id`.
    pub fn by_cluster(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: Some(cluster_id.into()),
            ..Default::default()
        }
    }
}

/// One page of `Query` results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Matching records in this page.
    pub records: Vec<VolumeRecord>,
    /// Cursor to pass back for the next page; `None` when exhausted.
    pub cursor: Option<u64>,
}
