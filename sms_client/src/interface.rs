//! The trait and error types every volume manager backend implements.

use async_trait::async_trait;
use data_types::{CreateSpec, QueryFilter, QueryResult, UpdateSpec, VolumeHandle};
use snafu::Snafu;
use std::fmt::Debug;

/// Errors returned by a volume manager backend. Handlers treat every variant
/// as log-and-return; convergence comes from the next event or sweep.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The service could not be reached or answered with a retryable fault.
    #[snafu(display("transient service error: {descr}"))]
    Transient {
        /// What the backend observed.
        descr: String,
    },

    /// The addressed record does not exist.
    #[snafu(display("volume not found: {handle}"))]
    NotFound {
        /// The handle that was addressed.
        handle: VolumeHandle,
    },

    /// The request payload is not acceptable to the service.
    #[snafu(display("malformed request: {descr}"))]
    Malformed {
        /// What was wrong with it.
        descr: String,
    },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Issues volume-catalog RPCs against the storage management service.
///
/// Implementations are expected to enforce their own request timeouts; the
/// syncer holds its operations lock across these calls and never cancels
/// them.
#[async_trait]
pub trait VolumeManager: Send + Sync + Debug {
    /// Return the records matching `filter`, one page at a time. Handles
    /// with no record are simply absent from the result, never an error.
    async fn query(&self, filter: QueryFilter) -> Result<QueryResult>;

    /// Register a pre-existing backing object as a catalog volume and
    /// return its handle. Idempotent on (name, backing id).
    async fn create_volume(&self, spec: CreateSpec) -> Result<VolumeHandle>;

    /// Merge per-entity metadata entries into a record. Entries replace by
    /// (kind, name, namespace); a delete-direction entry removes its key.
    async fn update_metadata(&self, spec: UpdateSpec) -> Result<()>;

    /// Remove a record. With `delete_disk` the backing storage is destroyed
    /// as well; without it only the catalog entry goes.
    async fn delete_volume(&self, handle: &VolumeHandle, delete_disk: bool) -> Result<()>;
}
