//! Keeps the storage management service's view of each volume — labels,
//! claim binding, in-use-by-pod relationships — consistent with the
//! authoritative orchestrator state.
//!
//! Two workers run side by side: an event reconciler consuming watcher
//! callbacks, and a periodic full synchronizer that re-derives the whole
//! mapping from snapshots of both sides. They share one mutex serialising
//! every service mutation; the full-sync confirmation ledger lives under it.

#![warn(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

/// Syncer configuration.
pub mod config;
/// Event-driven reconciliation of watcher callbacks.
pub mod event;
/// Periodic full synchronization and its cross-sweep ledger.
pub mod fullsync;
/// Payload constructors.
pub mod metadata;
/// The watcher boundary: typed events and cached listers.
pub mod watcher;

// Helpers for unit tests
#[cfg(test)]
mod test_utils;

pub use config::SyncerConfig;
pub use event::EventReconciler;
pub use fullsync::{FullSyncEngine, FullSyncLedger};
pub use watcher::{MemObjectCache, ObjectCache, WatchEvent};

use humantime::format_duration;
use sms_client::VolumeManager;
use snafu::{ResultExt, Snafu};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The running pair of syncer tasks.
pub struct MetadataSyncer {
    shutdown: CancellationToken,
    event_loop: tokio::task::JoinHandle<()>,
    full_sync: tokio::task::JoinHandle<()>,
}

impl Debug for MetadataSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataSyncer").finish_non_exhaustive()
    }
}

impl MetadataSyncer {
    /// Start the event reconciler and the full synchronizer over the given
    /// collaborators. `events` is fed by the embedder's informer callbacks.
    pub fn start(
        config: SyncerConfig,
        volume_manager: Arc<dyn VolumeManager>,
        cache: Arc<dyn ObjectCache>,
        events: mpsc::Receiver<WatchEvent>,
    ) -> Self {
        let sync_interval = config.full_sync_interval();
        info!(
            driver = %config.driver_name,
            cluster = %config.cluster_id,
            flavor = %config.cluster_flavor,
            full_sync_interval = %format_duration(sync_interval),
            "metadata syncer starting"
        );

        let shutdown = CancellationToken::new();
        let volume_operations = Arc::new(Mutex::new(FullSyncLedger::default()));

        let reconciler = EventReconciler::new(
            config.clone(),
            Arc::clone(&volume_manager),
            Arc::clone(&cache),
            Arc::clone(&volume_operations),
        );
        let event_loop = tokio::spawn(event::perform(reconciler, events, shutdown.clone()));

        let engine = FullSyncEngine::new(config, volume_manager, cache, volume_operations);
        let full_sync = tokio::spawn(fullsync::perform(engine, sync_interval, shutdown.clone()));

        Self {
            shutdown,
            event_loop,
            full_sync,
        }
    }

    /// A handle to gracefully shut the syncer down when invoked. In-flight
    /// service calls complete; nothing is force-cancelled.
    pub fn shutdown_handle(&self) -> impl Fn() {
        let shutdown = self.shutdown.clone();
        move || {
            shutdown.cancel();
        }
    }

    /// Wait for both workers to finish.
    pub async fn join(self) -> Result<()> {
        let Self {
            shutdown: _,
            event_loop,
            full_sync,
        } = self;

        let (event_loop, full_sync) = futures::join!(event_loop, full_sync);

        event_loop.context(EventLoopPanicSnafu)?;
        full_sync.context(FullSyncPanicSnafu)?;

        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("The event reconciliation task panicked"))]
    EventLoopPanic { source: tokio::task::JoinError },

    #[snafu(display("The full sync task panicked"))]
    FullSyncPanic { source: tokio::task::JoinError },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;
