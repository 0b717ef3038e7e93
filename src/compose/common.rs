use super::{BuildParams, Contribution, Contributor, Stage};
use crate::config::SupervisorConfig;
use crate::error::ConfigurationError;

/// Role owned by the search-role contributor
pub(super) const SEARCH_ROLE: &str = "search";

/// Paths, ports, heap and the platform quirks every node needs
pub struct CommonSettingsContributor {
    config: SupervisorConfig,
}

impl CommonSettingsContributor {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl Contributor for CommonSettingsContributor {
    fn name(&self) -> &'static str {
        "common"
    }

    fn stage(&self) -> Stage {
        Stage::Common
    }

    fn contribute(&self, _params: &BuildParams) -> Result<Contribution, ConfigurationError> {
        let node = &self.config.node;

        if node.heap.trim().is_empty() {
            return Err(ConfigurationError::contributor(self.name(), "heap size is empty"));
        }

        let mut contribution = Contribution::new()
            .property("cluster.name", &node.cluster_name)
            .property("node.name", &node.name)
            .property("path.data", self.config.node_data_dir().display())
            .property("path.logs", self.config.node_logs_dir().display())
            .property("network.bind_host", &node.bind_host)
            .property("http.port", node.http_port)
            .property("transport.port", node.transport_port)
            .property(
                "indices.query.bool.max_clause_count",
                node.bool_max_clause_count,
            )
            .property("action.auto_create_index", "false")
            .java_opt(format!("-Xms{}", node.heap))
            .java_opt(format!("-Xmx{}", node.heap));

        if let Some(host) = &node.network_host {
            contribution = contribution.property("network.host", host);
        }

        if cfg!(target_os = "macos") {
            contribution = contribution.property("bootstrap.system_call_filter", "false");
        }

        contribution.node_roles = node
            .roles
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty() && r != SEARCH_ROLE)
            .collect();

        Ok(contribution)
    }
}
