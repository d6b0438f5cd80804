//! The watcher boundary: the typed events an informer delivers and the
//! cached listers it exposes.
//!
//! The informer machinery itself is external; embedders register one typed
//! callback per resource kind and forward into the syncer's event channel.

use data_types::{Claim, Pod, Volume};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// One callback delivered by the watcher. Add events carry no metadata the
/// syncer acts on and are dropped by the dispatcher.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A claim appeared in the cache.
    ClaimAdded(Claim),
    /// A claim changed.
    ClaimUpdated {
        /// State before the change.
        old: Claim,
        /// State after the change.
        new: Claim,
    },
    /// A claim was removed.
    ClaimDeleted(Claim),
    /// A volume appeared in the cache.
    VolumeAdded(Volume),
    /// A volume changed.
    VolumeUpdated {
        /// State before the change.
        old: Volume,
        /// State after the change.
        new: Volume,
    },
    /// A volume was removed.
    VolumeDeleted(Volume),
    /// A pod appeared in the cache.
    PodAdded(Pod),
    /// A pod changed.
    PodUpdated {
        /// State before the change.
        old: Pod,
        /// State after the change.
        new: Pod,
    },
    /// A pod was removed.
    PodDeleted(Pod),
}

/// Read access to the watcher's object cache. Lookups are in-memory and safe
/// for concurrent use; returned objects are owned clones of the cached
/// state.
pub trait ObjectCache: Send + Sync + Debug {
    /// The volume named `name`, or `None` if the cache has no such object.
    fn get_volume(&self, name: &str) -> Option<Volume>;

    /// The claim at (`namespace`, `name`), or `None`.
    fn get_claim(&self, namespace: &str, name: &str) -> Option<Claim>;

    /// Snapshot of every cached volume.
    fn volumes(&self) -> Vec<Volume>;

    /// Snapshot of every cached claim.
    fn claims(&self) -> Vec<Claim>;

    /// Snapshot of every cached pod.
    fn pods(&self) -> Vec<Pod>;
}

#[derive(Debug, Default)]
struct CacheState {
    volumes: BTreeMap<String, Volume>,
    claims: BTreeMap<(String, String), Claim>,
    pods: BTreeMap<(String, String), Pod>,
}

/// In-memory [`ObjectCache`]. Tests drive it directly; embedders mirror
/// their informer store into it.
#[derive(Debug, Default)]
pub struct MemObjectCache {
    state: RwLock<CacheState>,
}

impl MemObjectCache {
    /// Return a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a volume.
    pub fn upsert_volume(&self, volume: Volume) {
        self.state.write().volumes.insert(volume.name.clone(), volume);
    }

    /// Remove a volume by name.
    pub fn remove_volume(&self, name: &str) {
        self.state.write().volumes.remove(name);
    }

    /// Insert or replace a claim.
    pub fn upsert_claim(&self, claim: Claim) {
        self.state
            .write()
            .claims
            .insert((claim.namespace.clone(), claim.name.clone()), claim);
    }

    /// Remove a claim.
    pub fn remove_claim(&self, namespace: &str, name: &str) {
        self.state
            .write()
            .claims
            .remove(&(namespace.to_owned(), name.to_owned()));
    }

    /// Insert or replace a pod.
    pub fn upsert_pod(&self, pod: Pod) {
        self.state
            .write()
            .pods
            .insert((pod.namespace.clone(), pod.name.clone()), pod);
    }

    /// Remove a pod.
    pub fn remove_pod(&self, namespace: &str, name: &str) {
        self.state
            .write()
            .pods
            .remove(&(namespace.to_owned(), name.to_owned()));
    }
}

impl ObjectCache for MemObjectCache {
    fn get_volume(&self, name: &str) -> Option<Volume> {
        self.state.read().volumes.get(name).cloned()
    }

    fn get_claim(&self, namespace: &str, name: &str) -> Option<Claim> {
        self.state
            .read()
            .claims
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    fn volumes(&self) -> Vec<Volume> {
        self.state.read().volumes.values().cloned().collect()
    }

    fn claims(&self) -> Vec<Claim> {
        self.state.read().claims.values().cloned().collect()
    }

    fn pods(&self) -> Vec<Pod> {
        self.state.read().pods.values().cloned().collect()
    }
}
