//! The cross-sweep ledger of unconfirmed one-sided volumes.
//!
//! A handle seen on only one side of the mapping is not acted on until it
//! has been seen that way by two consecutive sweeps; the ledger is the
//! memory between them. It is guarded by the volume-operations mutex: the
//! task holding the ledger guard is the task allowed to mutate the storage
//! service, so the ledger can never be observed mid-sweep.

use data_types::VolumeHandle;
use std::collections::HashSet;

/// The two pending sets carried from one sweep to the next.
#[derive(Debug, Default)]
pub struct FullSyncLedger {
    pending_create: HashSet<VolumeHandle>,
    pending_delete: HashSet<VolumeHandle>,
}

impl FullSyncLedger {
    /// Remember `handle` as present only on the orchestrator side.
    /// Idempotent.
    pub fn mark_pending_create(&mut self, handle: VolumeHandle) {
        self.pending_create.insert(handle);
    }

    /// Remember `handle` as present only on the service side. Idempotent.
    pub fn mark_pending_delete(&mut self, handle: VolumeHandle) {
        self.pending_delete.insert(handle);
    }

    /// The current contents as owned sets.
    pub fn take_snapshot(&self) -> (HashSet<VolumeHandle>, HashSet<VolumeHandle>) {
        (self.pending_create.clone(), self.pending_delete.clone())
    }

    /// Wipe both sets.
    pub fn clear(&mut self) {
        self.pending_create.clear();
        self.pending_delete.clear();
    }

    /// True when nothing is pending in either direction.
    pub fn is_empty(&self) -> bool {
        self.pending_create.is_empty() && self.pending_delete.is_empty()
    }
}
