mod client;
mod monitor;

#[cfg(test)]
mod tests;

pub use client::{
    ClusterHealth, ClusterHealthClient, ClusterStatus, RestClusterClient, ALLOCATION_EXCLUDE_SETTING,
};
pub use monitor::{HealthMonitor, HealthSample, HealthTarget};
