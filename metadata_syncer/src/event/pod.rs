//! Pod update and delete handling.
//!
//! Pods fan out over their claim references; one claim's failure must not
//! keep the others from being recorded, so errors accumulate per claim and
//! are logged in one batch by the caller.

use super::EventReconciler;
use crate::metadata::{build_pod_metadata, build_update_spec};
use data_types::{Pod, PodPhase};
use snafu::{ResultExt, Snafu};
use tracing::{debug, error};

/// Per-claim failures collected while updating a pod's volumes.
#[derive(Debug, Snafu)]
pub enum PodMetadataError {
    /// The referenced claim is not in the cache.
    #[snafu(display("error getting claim {claim} for volume {volume}: not found"))]
    ClaimNotFound {
        /// Pod volume slot.
        volume: String,
        /// Referenced claim name.
        claim: String,
    },

    /// The claim's bound volume is not in the cache (or the claim is not
    /// bound at all).
    #[snafu(display("error getting volume for claim {claim} in volume {volume}: not found"))]
    VolumeNotFound {
        /// Pod volume slot.
        volume: String,
        /// Referenced claim name.
        claim: String,
    },

    /// The metadata update itself failed.
    #[snafu(display("metadata update failed for volume {volume}: {source}"))]
    MetadataUpdate {
        /// Pod volume slot.
        volume: String,
        /// Underlying service error.
        source: sms_client::Error,
    },
}

impl EventReconciler {
    /// Pod changed. Only the Pending→Running transition records the pod on
    /// its volumes.
    pub async fn pod_updated(&self, old: &Pod, new: &Pod) {
        if !(old.phase == PodPhase::Pending && new.phase == PodPhase::Running) {
            return;
        }
        debug!(pod = %new.name, namespace = %new.namespace, "pod running, updating pod metadata");
        let errors = self.update_pod_metadata(new, false).await;
        if !errors.is_empty() {
            error!(pod = %new.name, namespace = %new.namespace, "pod updated: pod metadata update failed:");
            for e in errors {
                error!(pod = %new.name, "pod updated: {e}");
            }
        }
    }

    /// Pod removed. A pod that never left Pending never attached, so there
    /// is nothing to unlink.
    pub async fn pod_deleted(&self, pod: &Pod) {
        if pod.phase == PodPhase::Pending {
            return;
        }
        debug!(pod = %pod.name, namespace = %pod.namespace, "pod deleted, removing pod metadata");
        let errors = self.update_pod_metadata(pod, true).await;
        if !errors.is_empty() {
            error!(pod = %pod.name, namespace = %pod.namespace, "pod deleted: pod metadata update failed:");
            for e in errors {
                error!(pod = %pod.name, "pod deleted: {e}");
            }
        }
    }

    /// Record (or unlink) this pod on every claim-backed volume it
    /// references. Failures accumulate; each claim is attempted.
    async fn update_pod_metadata(&self, pod: &Pod, delete: bool) -> Vec<PodMetadataError> {
        let mut errors = Vec::new();
        for pod_volume in &pod.volumes {
            let Some(claim_name) = pod_volume.claim_name.as_deref() else {
                continue;
            };
            let Some(claim) = self.cache.get_claim(&pod.namespace, claim_name) else {
                errors.push(PodMetadataError::ClaimNotFound {
                    volume: pod_volume.name.clone(),
                    claim: claim_name.to_owned(),
                });
                continue;
            };
            let volume = claim
                .volume_name
                .as_deref()
                .and_then(|name| self.cache.get_volume(name));
            let Some(volume) = volume else {
                errors.push(PodMetadataError::VolumeNotFound {
                    volume: pod_volume.name.clone(),
                    claim: claim_name.to_owned(),
                });
                continue;
            };
            let Some(source) = volume.csi().filter(|s| s.driver == self.driver_name()) else {
                debug!(volume = %volume.name, "pod metadata: not a volume of this driver");
                continue;
            };

            let claim_ref = (!delete).then_some(&claim);
            let metadata = build_pod_metadata(pod, delete, self.cluster_id(), claim_ref);
            let spec = build_update_spec(
                &source.handle,
                &self.config.container_cluster(),
                vec![metadata],
            );
            if let Err(e) = self.locked_update(spec).await.context(MetadataUpdateSnafu {
                volume: pod_volume.name.clone(),
            }) {
                errors.push(e);
            }
        }
        errors
    }
}
