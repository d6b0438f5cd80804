//! Claim update and delete handling.

use super::EventReconciler;
use crate::metadata::{build_claim_metadata, build_update_spec};
use data_types::{Claim, ClaimPhase, ReclaimPolicy, Volume};
use tracing::{debug, error};

impl EventReconciler {
    /// Resolve the bound volume for `claim` and check it belongs to this
    /// driver. `None` means the event is not ours to handle (logged).
    fn bound_driver_volume(&self, claim: &Claim, context: &str) -> Option<Volume> {
        let Some(volume_name) = claim.volume_name.as_deref() else {
            error!(
                claim = %claim.name,
                namespace = %claim.namespace,
                "{context}: bound claim has no volume name"
            );
            return None;
        };
        let Some(volume) = self.cache.get_volume(volume_name) else {
            error!(
                claim = %claim.name,
                namespace = %claim.namespace,
                volume = %volume_name,
                "{context}: bound volume not in cache"
            );
            return None;
        };
        if !volume.is_driver_volume(self.driver_name()) {
            debug!(volume = %volume.name, "{context}: not a volume of this driver");
            return None;
        }
        Some(volume)
    }

    /// Claim changed. Acts only once the claim is Bound, and only when it
    /// just became Bound or its labels changed.
    pub async fn claim_updated(&self, old: &Claim, new: &Claim) {
        if new.phase != ClaimPhase::Bound {
            debug!(claim = %new.name, namespace = %new.namespace, "claim not in bound phase");
            return;
        }
        let Some(volume) = self.bound_driver_volume(new, "claim updated") else {
            return;
        };
        if old.phase == ClaimPhase::Bound && old.labels == new.labels {
            debug!(claim = %new.name, namespace = %new.namespace, "claim labels unchanged");
            return;
        }

        let Some(source) = volume.csi() else {
            return;
        };
        let metadata = build_claim_metadata(new, false, self.cluster_id(), &volume.name);
        let spec = build_update_spec(&source.handle, &self.config.container_cluster(), vec![metadata]);
        if let Err(e) = self.locked_update(spec).await {
            error!(
                claim = %new.name,
                namespace = %new.namespace,
                volume = %source.handle,
                "claim updated: metadata update failed: {e}"
            );
        }
    }

    /// Claim removed. Unlinks the claim entry from the volume record unless
    /// the reclaim controller is about to delete the volume anyway.
    pub async fn claim_deleted(&self, claim: &Claim) {
        if claim.phase != ClaimPhase::Bound {
            return;
        }
        let Some(volume) = self.bound_driver_volume(claim, "claim deleted") else {
            return;
        };
        if volume.reclaim_policy == ReclaimPolicy::Delete {
            // Cleanup rides on the volume-delete path.
            debug!(volume = %volume.name, "claim deleted: reclaim policy is delete");
            return;
        }

        let Some(source) = volume.csi() else {
            return;
        };
        let metadata = build_claim_metadata(claim, true, self.cluster_id(), &volume.name);
        let spec = build_update_spec(&source.handle, &self.config.container_cluster(), vec![metadata]);
        if let Err(e) = self.locked_update(spec).await {
            error!(
                claim = %claim.name,
                namespace = %claim.namespace,
                volume = %source.handle,
                "claim deleted: metadata update failed: {e}"
            );
        }
    }
}
