//! Metadata syncer configuration.

use clap::Parser;
use data_types::{ClusterFlavor, ContainerCluster};
use std::time::Duration;
use tracing::warn;

/// Interval between full-sync sweeps when none is configured. Doubles as the
/// validated upper bound; anything longer lets the two sides drift for too
/// long.
pub const DEFAULT_FULL_SYNC_INTERVAL_MINUTES: i64 = 30;

/// Configuration specific to the metadata syncer.
#[derive(Debug, Clone, Parser)]
pub struct SyncerConfig {
    /// Number of minutes between full synchronization sweeps. Values that
    /// are zero, negative, or larger than the default fall back to the
    /// default rather than failing startup.
    #[clap(
        long,
        default_value_t = DEFAULT_FULL_SYNC_INTERVAL_MINUTES,
        env = "CSI_FULL_SYNC_INTERVAL_MINUTES"
    )]
    pub full_sync_interval_minutes: i64,

    /// Driver identifier; volumes provisioned by any other driver are
    /// invisible to the syncer.
    #[clap(long, env = "CSI_DRIVER_NAME")]
    pub driver_name: String,

    /// Identifier of this cluster, carried in every payload sent to the
    /// storage service.
    #[clap(long, env = "CSI_CLUSTER_ID")]
    pub cluster_id: String,

    /// Service user the driver authenticates as.
    #[clap(long, env = "CSI_CLUSTER_USER")]
    pub cluster_user: String,

    /// Cluster flavor: vanilla, supervisor, or guest.
    #[clap(long, default_value = "vanilla", env = "CSI_CLUSTER_FLAVOR")]
    pub cluster_flavor: ClusterFlavor,
}

impl SyncerConfig {
    /// The effective full-sync interval. Out-of-range configuration warns
    /// and uses the default.
    pub fn full_sync_interval(&self) -> Duration {
        let minutes = self.full_sync_interval_minutes;
        let minutes = if minutes <= 0 {
            warn!(
                configured = minutes,
                "full sync interval is zero or negative, using the default"
            );
            DEFAULT_FULL_SYNC_INTERVAL_MINUTES
        } else if minutes > DEFAULT_FULL_SYNC_INTERVAL_MINUTES {
            warn!(
                configured = minutes,
                "full sync interval is larger than the maximum, using the default"
            );
            DEFAULT_FULL_SYNC_INTERVAL_MINUTES
        } else {
            minutes
        };
        Duration::from_secs(60 * minutes as u64)
    }

    /// The cluster identity carried in every create and update payload.
    pub fn container_cluster(&self) -> ContainerCluster {
        ContainerCluster {
            cluster_id: self.cluster_id.clone(),
            user: self.cluster_user.clone(),
            flavor: self.cluster_flavor,
        }
    }
}
