//! Client interface to the storage management service's volume catalog.
//!
//! The syncer consumes the [`VolumeManager`] trait; production deployments
//! implement it over the service's RPC surface (per cluster flavor), while
//! [`MemVolumeManager`] provides the same semantics in memory for tests and
//! for embedders without a live service.

#![warn(missing_docs)]

mod interface;
mod mem;

pub use interface::{Error, Result, VolumeManager};
pub use mem::{MemVolumeManager, Operation};
