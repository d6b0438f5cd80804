//! In-memory implementation of the volume manager interface. Used for
//! testing and for embedders that run without a live storage service.

use crate::interface::{Error, Result, VolumeManager};
use async_trait::async_trait;
use data_types::{
    CreateSpec, QueryFilter, QueryResult, UpdateSpec, VolumeHandle, VolumeMetadata, VolumeRecord,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Formatter;

/// One call issued against a [`MemVolumeManager`], recorded in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// A `query` call.
    Query(QueryFilter),
    /// A `create_volume` call.
    CreateVolume(CreateSpec),
    /// An `update_metadata` call.
    UpdateMetadata(UpdateSpec),
    /// A `delete_volume` call.
    DeleteVolume {
        /// Addressed record.
        handle: VolumeHandle,
        /// Whether the backing disk was destroyed too.
        delete_disk: bool,
    },
}

impl Operation {
    /// Whether this operation mutates the catalog.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Query(_))
    }
}

#[derive(Debug, Default)]
struct MemState {
    records: BTreeMap<VolumeHandle, VolumeRecord>,
    operations: Vec<Operation>,
    // Errors handed out to upcoming mutating calls, oldest first.
    injected_errors: Vec<Error>,
    // Errors handed out to upcoming queries, oldest first.
    injected_query_errors: Vec<Error>,
}

/// In-memory volume catalog that implements [`VolumeManager`], recording
/// every operation for test assertions.
#[derive(Default)]
pub struct MemVolumeManager {
    state: Mutex<MemState>,
}

impl MemVolumeManager {
    /// Return a new, empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, for testing purposes only; no consistency
    /// checks, and the call is not recorded as an operation.
    pub fn insert_record(&self, record: VolumeRecord) {
        let mut state = self.state.lock();
        state.records.insert(record.handle.clone(), record);
    }

    /// Drop a record directly, for testing purposes only.
    pub fn remove_record(&self, handle: &VolumeHandle) {
        self.state.lock().records.remove(handle);
    }

    /// Snapshot of the current records.
    pub fn records(&self) -> Vec<VolumeRecord> {
        self.state.lock().records.values().cloned().collect()
    }

    /// The record for `handle`, if any.
    pub fn record(&self, handle: &VolumeHandle) -> Option<VolumeRecord> {
        self.state.lock().records.get(handle).cloned()
    }

    /// Everything issued against this catalog so far, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().operations.clone()
    }

    /// Drain the recorded operations, returning them in order.
    pub fn take_operations(&self) -> Vec<Operation> {
        std::mem::take(&mut self.state.lock().operations)
    }

    /// Only the mutating operations issued so far.
    pub fn mutations(&self) -> Vec<Operation> {
        self.operations()
            .into_iter()
            .filter(Operation::is_mutation)
            .collect()
    }

    /// Queue `error` to be returned by the next mutating call (FIFO when
    /// several are queued). Queries are never failed this way; use
    /// [`Self::inject_query_error`] for those.
    pub fn inject_error(&self, error: Error) {
        self.state.lock().injected_errors.push(error);
    }

    /// Queue `error` to be returned by the next `query` call.
    pub fn inject_query_error(&self, error: Error) {
        self.state.lock().injected_query_errors.push(error);
    }

    fn take_injected_error(state: &mut MemState) -> Option<Error> {
        if state.injected_errors.is_empty() {
            None
        } else {
            Some(state.injected_errors.remove(0))
        }
    }

    fn apply_metadata(record: &mut VolumeRecord, metadata: &VolumeMetadata) {
        for entry in &metadata.entity_metadata {
            let key = entry.key();
            record.entity_metadata.retain(|e| e.key() != key);
            if !entry.delete {
                record.entity_metadata.push(entry.clone());
            }
        }
        // Remember every cluster that has touched the record.
        let issuing = &metadata.container_cluster;
        if !record
            .container_cluster_array
            .iter()
            .any(|c| c.cluster_id == issuing.cluster_id)
        {
            record.container_cluster_array.push(issuing.clone());
        }
    }
}

impl std::fmt::Debug for MemVolumeManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemVolumeManager").finish_non_exhaustive()
    }
}

#[async_trait]
impl VolumeManager for MemVolumeManager {
    async fn query(&self, filter: QueryFilter) -> Result<QueryResult> {
        let mut state = self.state.lock();
        state.operations.push(Operation::Query(filter.clone()));
        if !state.injected_query_errors.is_empty() {
            return Err(state.injected_query_errors.remove(0));
        }

        let records = state
            .records
            .values()
            .filter(|r| filter.handles.is_empty() || filter.handles.contains(&r.handle))
            .filter(|r| {
                filter
                    .cluster_id
                    .as_ref()
                    .is_none_or(|cluster| &r.cluster_id == cluster)
            })
            .cloned()
            .collect();

        // Everything fits in one page here; real backends chain cursors.
        Ok(QueryResult {
            records,
            cursor: None,
        })
    }

    async fn create_volume(&self, spec: CreateSpec) -> Result<VolumeHandle> {
        let mut state = self.state.lock();
        state.operations.push(Operation::CreateVolume(spec.clone()));
        if let Some(error) = Self::take_injected_error(&mut state) {
            return Err(error);
        }

        let handle = spec.backing.backing_id().clone();
        if let Some(existing) = state.records.get(&handle) {
            if existing.name == spec.name {
                return Ok(handle);
            }
            return Err(Error::Malformed {
                descr: format!(
                    "backing object {handle} is already registered as {}",
                    existing.name
                ),
            });
        }

        let mut record = VolumeRecord {
            handle: handle.clone(),
            name: spec.name,
            volume_type: spec.volume_type,
            cluster_id: spec.metadata.container_cluster.cluster_id.clone(),
            container_cluster_array: Vec::new(),
            entity_metadata: Vec::new(),
            reclaim_policy: spec.reclaim_policy,
        };
        Self::apply_metadata(&mut record, &spec.metadata);
        state.records.insert(handle.clone(), record);
        Ok(handle)
    }

    async fn update_metadata(&self, spec: UpdateSpec) -> Result<()> {
        let mut state = self.state.lock();
        state
            .operations
            .push(Operation::UpdateMetadata(spec.clone()));
        if let Some(error) = Self::take_injected_error(&mut state) {
            return Err(error);
        }

        let record = state
            .records
            .get_mut(&spec.volume_id)
            .ok_or_else(|| Error::NotFound {
                handle: spec.volume_id.clone(),
            })?;
        Self::apply_metadata(record, &spec.metadata);
        Ok(())
    }

    async fn delete_volume(&self, handle: &VolumeHandle, delete_disk: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.operations.push(Operation::DeleteVolume {
            handle: handle.clone(),
            delete_disk,
        });
        if let Some(error) = Self::take_injected_error(&mut state) {
            return Err(error);
        }

        state
            .records
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                handle: handle.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{
        BackingObjectDetails, ClusterFlavor, ContainerCluster, EntityKind, EntityMetadata, Labels,
        ReclaimPolicy, VolumeType,
    };

    fn cluster(id: &str) -> ContainerCluster {
        ContainerCluster {
            cluster_id: id.into(),
            user: "admin@test".into(),
            flavor: ClusterFlavor::Vanilla,
        }
    }

    fn entity(kind: EntityKind, name: &str, namespace: &str, delete: bool) -> EntityMetadata {
        EntityMetadata {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            labels: Labels::new(),
            delete,
            cluster_id: "cluster-a".into(),
            references: Vec::new(),
        }
    }

    fn create_spec(name: &str, handle: &str) -> CreateSpec {
        CreateSpec {
            name: name.into(),
            volume_type: VolumeType::Block,
            metadata: VolumeMetadata {
                container_cluster: cluster("cluster-a"),
                container_cluster_array: vec![cluster("cluster-a")],
                entity_metadata: vec![entity(EntityKind::Volume, name, "", false)],
            },
            backing: BackingObjectDetails::BlockDisk {
                backing_disk_id: VolumeHandle::from(handle),
            },
            reclaim_policy: ReclaimPolicy::Retain,
        }
    }

    fn update_spec(handle: &str, entries: Vec<EntityMetadata>) -> UpdateSpec {
        UpdateSpec {
            volume_id: VolumeHandle::from(handle),
            metadata: VolumeMetadata {
                container_cluster: cluster("cluster-a"),
                container_cluster_array: vec![cluster("cluster-a")],
                entity_metadata: entries,
            },
        }
    }

    #[tokio::test]
    async fn query_for_unknown_handles_is_empty_not_an_error() {
        let manager = MemVolumeManager::new();
        let result = manager
            .query(QueryFilter::by_handle(&VolumeHandle::from("h-none")))
            .await
            .unwrap();
        assert!(result.records.is_empty());
        assert!(result.cursor.is_none());
    }

    #[tokio::test]
    async fn query_filters_compose() {
        let manager = MemVolumeManager::new();
        manager
            .create_volume(create_spec("pv-1", "h-1"))
            .await
            .unwrap();

        let mut filter = QueryFilter::by_handle(&VolumeHandle::from("h-1"));
        filter.cluster_id = Some("cluster-b".into());
        let result = manager.query(filter).await.unwrap();
        assert!(result.records.is_empty());

        let result = manager
            .query(QueryFilter::by_cluster("cluster-a"))
            .await
            .unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].handle, VolumeHandle::from("h-1"));
    }

    #[tokio::test]
    async fn create_is_idempotent_on_name_and_backing() {
        let manager = MemVolumeManager::new();
        let first = manager
            .create_volume(create_spec("pv-1", "h-1"))
            .await
            .unwrap();
        let second = manager
            .create_volume(create_spec("pv-1", "h-1"))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.records().len(), 1);

        // Same backing object under a different name is refused.
        let err = manager
            .create_volume(create_spec("pv-other", "h-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[tokio::test]
    async fn update_replaces_entries_per_entity_key() {
        let manager = MemVolumeManager::new();
        manager
            .create_volume(create_spec("pv-1", "h-1"))
            .await
            .unwrap();

        let mut labeled = entity(EntityKind::Claim, "c-1", "ns-1", false);
        labeled.labels.insert("app".into(), "x".into());
        manager
            .update_metadata(update_spec("h-1", vec![labeled]))
            .await
            .unwrap();

        let mut relabeled = entity(EntityKind::Claim, "c-1", "ns-1", false);
        relabeled.labels.insert("app".into(), "y".into());
        manager
            .update_metadata(update_spec("h-1", vec![relabeled.clone()]))
            .await
            .unwrap();

        let record = manager.record(&VolumeHandle::from("h-1")).unwrap();
        let claims: Vec<_> = record
            .entity_metadata
            .iter()
            .filter(|e| e.kind == EntityKind::Claim)
            .collect();
        assert_eq!(claims, vec![&relabeled]);
        // The volume entry from creation is untouched.
        assert!(record
            .entity_metadata
            .iter()
            .any(|e| e.kind == EntityKind::Volume));
    }

    #[tokio::test]
    async fn delete_direction_entry_removes_the_key() {
        let manager = MemVolumeManager::new();
        manager
            .create_volume(create_spec("pv-1", "h-1"))
            .await
            .unwrap();
        manager
            .update_metadata(update_spec(
                "h-1",
                vec![entity(EntityKind::Claim, "c-1", "ns-1", false)],
            ))
            .await
            .unwrap();

        manager
            .update_metadata(update_spec(
                "h-1",
                vec![entity(EntityKind::Claim, "c-1", "ns-1", true)],
            ))
            .await
            .unwrap();

        let record = manager.record(&VolumeHandle::from("h-1")).unwrap();
        assert!(!record
            .entity_metadata
            .iter()
            .any(|e| e.kind == EntityKind::Claim));
    }

    #[tokio::test]
    async fn update_and_delete_of_unknown_volume_are_not_found() {
        let manager = MemVolumeManager::new();
        let err = manager
            .update_metadata(update_spec("h-ghost", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let err = manager
            .delete_volume(&VolumeHandle::from("h-ghost"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn injected_errors_fail_mutations_in_fifo_order() {
        let manager = MemVolumeManager::new();
        manager.inject_error(Error::Transient {
            descr: "service restarting".into(),
        });

        let err = manager
            .create_volume(create_spec("pv-1", "h-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient { .. }));
        // The failure consumed the injection; the retry lands.
        manager
            .create_volume(create_spec("pv-1", "h-1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn operations_are_recorded_in_order() {
        let manager = MemVolumeManager::new();
        manager
            .create_volume(create_spec("pv-1", "h-1"))
            .await
            .unwrap();
        manager.query(QueryFilter::default()).await.unwrap();
        manager
            .delete_volume(&VolumeHandle::from("h-1"), true)
            .await
            .unwrap();

        let ops = manager.operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], Operation::CreateVolume(_)));
        assert!(matches!(ops[1], Operation::Query(_)));
        assert!(matches!(
            ops[2],
            Operation::DeleteVolume {
                delete_disk: true,
                ..
            }
        ));
        assert_eq!(manager.mutations().len(), 2);
    }
}
