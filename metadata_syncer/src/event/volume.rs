//! Volume update and delete handling, including static-provisioning
//! adoption.

use super::EventReconciler;
use crate::metadata::{
    build_create_spec, build_update_spec, build_volume_metadata, volume_type_of,
};
use data_types::{QueryFilter, ReclaimPolicy, Volume, VolumePhase};
use tracing::{debug, error, info, warn};

impl EventReconciler {
    /// Volume changed. Suppresses transitions the reclaim controller owns
    /// and unstable phases; adopts statically provisioned volumes into the
    /// catalog on their Pending→Available transition.
    pub async fn volume_updated(&self, old: &Volume, new: &Volume) {
        let (Some(old_source), Some(new_source)) = (old.csi(), new.csi()) else {
            debug!(volume = %new.name, "volume updated: not a volume of this driver");
            return;
        };
        if new_source.driver != self.driver_name() {
            debug!(volume = %new.name, "volume updated: not a volume of this driver");
            return;
        }
        if matches!(new.phase, VolumePhase::Pending | VolumePhase::Failed) {
            debug!(volume = %new.name, phase = ?new.phase, "volume updated: phase not stable");
            return;
        }
        if old.phase == VolumePhase::Available && old.labels == new.labels {
            debug!(volume = %new.name, "volume updated: labels unchanged");
            return;
        }
        if old.phase == VolumePhase::Bound
            && new.phase == VolumePhase::Released
            && old.reclaim_policy == ReclaimPolicy::Delete
        {
            debug!(volume = %new.name, "volume updated: volume will be deleted by controller");
            return;
        }
        if new.deletion_timestamp.is_some() {
            debug!(volume = %new.name, "volume updated: volume already being deleted");
            return;
        }

        let cluster = self.config.container_cluster();
        let metadata = build_volume_metadata(new, false, self.cluster_id());

        if old.phase == VolumePhase::Pending
            && new.phase == VolumePhase::Available
            && new.storage_class.is_none()
        {
            // Static provisioning observed: an externally created volume
            // just gained a binding. Register it with the catalog unless it
            // is already there.
            let volume_type = volume_type_of(old);
            info!(
                volume = %new.name,
                handle = %old_source.handle,
                volume_type = %volume_type,
                "volume updated: observed static volume provisioning"
            );

            let _operations = self.volume_operations.lock().await;
            let result = self
                .volume_manager
                .query(QueryFilter::by_handle(&old_source.handle))
                .await;
            let records = match result {
                Ok(result) => result.records,
                Err(e) => {
                    error!(handle = %old_source.handle, "volume updated: query failed: {e}");
                    return;
                }
            };
            match records.first() {
                None => {
                    let spec =
                        build_create_spec(old, old_source, volume_type, &cluster, vec![metadata]);
                    match self.volume_manager.create_volume(spec).await {
                        Ok(handle) => {
                            info!(volume = %new.name, %handle, "volume updated: adopted static volume");
                        }
                        Err(e) => {
                            error!(volume = %new.name, "volume updated: adoption create failed: {e}");
                        }
                    }
                    return;
                }
                Some(record) if record.handle == old_source.handle => {
                    // Already catalogued; fall through to the standard
                    // update while still holding the lock.
                    debug!(handle = %record.handle, "volume updated: volume already in catalog");
                    let spec = build_update_spec(&new_source.handle, &cluster, vec![metadata]);
                    if let Err(e) = self.volume_manager.update_metadata(spec).await {
                        error!(volume = %new.name, "volume updated: metadata update failed: {e}");
                    }
                    return;
                }
                Some(record) => {
                    // The catalog answered with some other volume; its state
                    // is inconsistent and not ours to fix here.
                    warn!(
                        requested = %old_source.handle,
                        returned = %record.handle,
                        "volume updated: catalog returned a different volume, not mutating"
                    );
                    return;
                }
            }
        }

        let spec = build_update_spec(&new_source.handle, &cluster, vec![metadata]);
        if let Err(e) = self.locked_update(spec).await {
            error!(volume = %new.name, "volume updated: metadata update failed: {e}");
        }
    }

    /// Volume removed. File volumes drop their metadata entry; block
    /// volumes leave the catalog, taking the disk along only where the
    /// reclaim contract says so.
    pub async fn volume_deleted(&self, volume: &Volume) {
        let Some(source) = volume
            .csi()
            .filter(|s| s.driver == self.driver_name())
        else {
            debug!(volume = %volume.name, "volume deleted: not a volume of this driver");
            return;
        };
        if volume.claim_ref.is_some()
            && matches!(volume.phase, VolumePhase::Available | VolumePhase::Released)
            && volume.reclaim_policy == ReclaimPolicy::Delete
        {
            debug!(volume = %volume.name, "volume deleted: deletion will be handled by controller");
            return;
        }

        let _operations = self.volume_operations.lock().await;

        if volume.is_file_volume() {
            // File shares may be referenced from other clusters; drop this
            // cluster's volume entry instead of the record.
            let metadata = build_volume_metadata(volume, true, self.cluster_id());
            let spec = build_update_spec(
                &source.handle,
                &self.config.container_cluster(),
                vec![metadata],
            );
            if let Err(e) = self.volume_manager.update_metadata(spec).await {
                error!(volume = %volume.name, "volume deleted: metadata update failed: {e}");
            }
        } else {
            // Orphan cleanup (no claim, or retained) keeps the disk; the
            // failed-after-claim-delete case is the one where the disk goes.
            let delete_disk =
                volume.claim_ref.is_some() && volume.reclaim_policy == ReclaimPolicy::Delete;
            debug!(volume = %volume.name, delete_disk, "volume deleted: removing catalog record");
            if let Err(e) = self
                .volume_manager
                .delete_volume(&source.handle, delete_disk)
                .await
            {
                error!(
                    volume = %volume.name,
                    handle = %source.handle,
                    "volume deleted: delete failed: {e}"
                );
            }
        }
    }
}
