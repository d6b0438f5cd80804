//! Shared data types for the CSI metadata synchronizer.
//!
//! Two halves: the container-orchestrator object model the syncer watches
//! ([`Claim`], [`Volume`], [`Pod`]) and the storage-management-service wire
//! model it reconciles them against ([`VolumeRecord`], [`EntityMetadata`],
//! the create/update/query specs).

#![warn(missing_docs)]

/// Types for the orchestrator-side objects delivered by the watcher.
mod orchestrator;
/// Types for the storage-management-service catalog and its RPC payloads.
mod sms;

pub use orchestrator::*;
pub use sms::*;
