//! Pure constructors for the payloads sent to the storage service.
//!
//! Nothing here touches the network or the cache; handlers assemble the
//! inputs and these functions shape them. The delete direction always strips
//! labels and references so the service drops the entry instead of storing
//! stale attributes.

use data_types::{
    BackingObjectDetails, Claim, ContainerCluster, CreateSpec, CsiSource, EntityKind,
    EntityMetadata, EntityReference, Labels, Pod, UpdateSpec, Volume, VolumeHandle, VolumeMetadata,
    VolumeType,
};

/// Metadata entry for a claim, with a back-reference to its bound volume.
/// Labels ride along only in the non-delete direction.
pub fn build_claim_metadata(
    claim: &Claim,
    delete: bool,
    cluster_id: &str,
    volume_name: &str,
) -> EntityMetadata {
    let references = if delete {
        Vec::new()
    } else {
        // The volume is cluster-scoped, so the reference namespace is empty.
        vec![EntityReference {
            kind: EntityKind::Volume,
            name: volume_name.to_owned(),
            namespace: String::new(),
        }]
    };
    EntityMetadata {
        kind: EntityKind::Claim,
        name: claim.name.clone(),
        namespace: claim.namespace.clone(),
        labels: if delete {
            Labels::new()
        } else {
            claim.labels.clone()
        },
        delete,
        cluster_id: cluster_id.to_owned(),
        references,
    }
}

/// Metadata entry for a volume itself. Cluster-scoped, so the namespace is
/// empty; volumes reference nothing.
pub fn build_volume_metadata(volume: &Volume, delete: bool, cluster_id: &str) -> EntityMetadata {
    EntityMetadata {
        kind: EntityKind::Volume,
        name: volume.name.clone(),
        namespace: String::new(),
        labels: if delete {
            Labels::new()
        } else {
            volume.labels.clone()
        },
        delete,
        cluster_id: cluster_id.to_owned(),
        references: Vec::new(),
    }
}

/// Metadata entry for a pod, with a back-reference to the claim it mounts.
/// Pods never carry labels into the record, and the reference is omitted in
/// the delete direction.
pub fn build_pod_metadata(
    pod: &Pod,
    delete: bool,
    cluster_id: &str,
    claim: Option<&Claim>,
) -> EntityMetadata {
    let references = match (delete, claim) {
        (false, Some(claim)) => vec![EntityReference {
            kind: EntityKind::Claim,
            name: claim.name.clone(),
            namespace: claim.namespace.clone(),
        }],
        _ => Vec::new(),
    };
    EntityMetadata {
        kind: EntityKind::Pod,
        name: pod.name.clone(),
        namespace: pod.namespace.clone(),
        labels: Labels::new(),
        delete,
        cluster_id: cluster_id.to_owned(),
        references,
    }
}

/// Assemble an `UpdateMetadata` payload for `handle`.
pub fn build_update_spec(
    handle: &VolumeHandle,
    container_cluster: &ContainerCluster,
    entity_metadata: Vec<EntityMetadata>,
) -> UpdateSpec {
    UpdateSpec {
        volume_id: handle.clone(),
        metadata: VolumeMetadata {
            container_cluster: container_cluster.clone(),
            container_cluster_array: vec![container_cluster.clone()],
            entity_metadata,
        },
    }
}

/// Assemble a `CreateVolume` payload adopting the pre-existing backing
/// object behind `source`. The handle doubles as the backing identifier,
/// disk or file share depending on the volume type.
pub fn build_create_spec(
    volume: &Volume,
    source: &CsiSource,
    volume_type: VolumeType,
    container_cluster: &ContainerCluster,
    entity_metadata: Vec<EntityMetadata>,
) -> CreateSpec {
    let backing = match volume_type {
        VolumeType::Block => BackingObjectDetails::BlockDisk {
            backing_disk_id: source.handle.clone(),
        },
        VolumeType::File => BackingObjectDetails::FileShare {
            backing_file_id: source.handle.clone(),
        },
    };
    CreateSpec {
        name: volume.name.clone(),
        volume_type,
        metadata: VolumeMetadata {
            container_cluster: container_cluster.clone(),
            container_cluster_array: vec![container_cluster.clone()],
            entity_metadata,
        },
        backing,
        reclaim_policy: volume.reclaim_policy,
    }
}

/// File iff the filesystem kind is NFS-family, block otherwise.
pub fn volume_type_of(volume: &Volume) -> VolumeType {
    if volume.is_file_volume() {
        VolumeType::File
    } else {
        VolumeType::Block
    }
}
