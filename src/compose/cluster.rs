use super::{BuildParams, ConfigFile, Contribution, Contributor, Stage};
use crate::config::SupervisorConfig;
use crate::error::ConfigurationError;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const UNICAST_HOSTS_FILE: &str = "unicast_hosts.txt";

/// Lookup of the transport addresses of the other active nodes
pub trait NodeRegistry: Send + Sync {
    fn cluster_addresses(&self) -> Vec<String>;
}

/// Registry with a fixed peer list
#[derive(Debug, Clone, Default)]
pub struct StaticNodeRegistry {
    addresses: Vec<String>,
}

impl StaticNodeRegistry {
    pub fn new(addresses: Vec<String>) -> Self {
        Self { addresses }
    }
}

impl NodeRegistry for StaticNodeRegistry {
    fn cluster_addresses(&self) -> Vec<String> {
        self.addresses.clone()
    }
}

/// Cluster formation: discovery mode, initial managers and the seed hosts file
pub struct ClusterContributor {
    own_address: String,
    single_node: bool,
    initial_cluster_managers: Vec<String>,
    static_seed_hosts: Vec<String>,
    registry: Arc<dyn NodeRegistry>,
}

impl ClusterContributor {
    pub fn new(config: &SupervisorConfig, registry: Arc<dyn NodeRegistry>) -> Self {
        Self {
            own_address: config.cluster_address(),
            single_node: config.node.single_node,
            initial_cluster_managers: config.node.initial_cluster_manager_nodes.clone(),
            static_seed_hosts: config.node.seed_hosts.clone(),
            registry,
        }
    }

    fn seed_hosts(&self) -> BTreeSet<String> {
        let registered: BTreeSet<String> = self
            .registry
            .cluster_addresses()
            .into_iter()
            .filter(|a| !a.trim().is_empty() && *a != self.own_address)
            .collect();

        if registered.is_empty() {
            debug!("Node registry knows no peers, using static seed hosts");
            self.static_seed_hosts.iter().cloned().collect()
        } else {
            registered
        }
    }
}

impl Contributor for ClusterContributor {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn stage(&self) -> Stage {
        Stage::Cluster
    }

    fn contribute(&self, _params: &BuildParams) -> Result<Contribution, ConfigurationError> {
        if self.single_node {
            info!("Single-node mode, cluster discovery disabled");
            return Ok(Contribution::new().property("discovery.type", "single-node"));
        }

        let mut contribution = Contribution::new().property("discovery.seed_providers", "file");

        if !self.initial_cluster_managers.is_empty() {
            contribution = contribution.property(
                "cluster.initial_cluster_manager_nodes",
                self.initial_cluster_managers.join(","),
            );
        }

        let hosts = self.seed_hosts();
        info!("Discovery seed hosts: {:?}", hosts);

        let mut content = hosts.into_iter().collect::<Vec<_>>().join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        contribution
            .config_files
            .push(ConfigFile::inline(UNICAST_HOSTS_FILE, content));

        Ok(contribution)
    }
}
