use super::common::SEARCH_ROLE;
use super::{validate_cache_size, BuildParams, Contribution, Contributor, DiskSpaceProbe, Stage};
use crate::config::SupervisorConfig;
use crate::error::ConfigurationError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Snapshot repositories and the searchable-snapshot cache
pub struct SearchRoleContributor {
    repo_paths: Vec<String>,
    object_storage: bool,
    search_role_requested: bool,
    cache_size: String,
    data_dir: PathBuf,
    disk: Arc<dyn DiskSpaceProbe>,
}

impl SearchRoleContributor {
    pub fn new(config: &SupervisorConfig, disk: Arc<dyn DiskSpaceProbe>) -> Self {
        Self {
            repo_paths: config.paths.repo.clone(),
            object_storage: config.search.object_storage,
            search_role_requested: config.node.roles.iter().any(|r| r.trim() == SEARCH_ROLE),
            cache_size: config.search.cache_size.clone(),
            data_dir: config.node_data_dir(),
            disk,
        }
    }

    fn snapshots_configured(&self) -> bool {
        !self.repo_paths.is_empty() || self.object_storage
    }
}

impl Contributor for SearchRoleContributor {
    fn name(&self) -> &'static str {
        "search-role"
    }

    fn stage(&self) -> Stage {
        Stage::SearchRole
    }

    fn contribute(&self, _params: &BuildParams) -> Result<Contribution, ConfigurationError> {
        if !self.snapshots_configured() {
            if self.search_role_requested {
                info!("No snapshot repository configured, search role disabled");
            }
            return Ok(Contribution::new());
        }

        let mut contribution = Contribution::new();
        if !self.repo_paths.is_empty() {
            contribution = contribution.property("path.repo", self.repo_paths.join(","));
        }

        if !self.search_role_requested {
            return Ok(contribution);
        }

        let usable = self
            .disk
            .usable_bytes(&self.data_dir)
            .map_err(|e| ConfigurationError::io(&self.data_dir, e))?;

        if let Some(warning) = validate_cache_size(&self.cache_size, usable, &self.data_dir)? {
            warn!("{}", warning);
            contribution = contribution.warning(warning);
        }

        contribution = contribution.property("node.search.cache.size", &self.cache_size);
        contribution.node_roles.insert(SEARCH_ROLE.to_string());
        Ok(contribution)
    }
}
