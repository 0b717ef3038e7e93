mod cluster;
mod common;
mod defaults;
mod disk;
mod launch;
mod passthrough;
mod search;
mod security;
mod size;

#[cfg(test)]
mod tests;

pub use cluster::{ClusterContributor, NodeRegistry, StaticNodeRegistry, UNICAST_HOSTS_FILE};
pub use common::CommonSettingsContributor;
pub use defaults::DefaultFilesContributor;
pub use disk::{DiskSpaceProbe, FixedDiskSpace, StatvfsProbe};
pub use launch::{LaunchConfiguration, PROPERTIES_FILE};
pub use passthrough::{EnvironmentContributor, OverridesFileContributor, PassthroughFilter};
pub use search::SearchRoleContributor;
pub use security::SecurityContributor;
pub use size::{parse_size, validate_cache_size};

use crate::config::SupervisorConfig;
use crate::error::ConfigurationError;
use crate::secrets::{KeystoreMaterial, SecretsProvisioner, TrustedCertificate};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pipeline position of a contributor; declared in application order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    DefaultFiles,
    Cluster,
    Common,
    SearchRole,
    Security,
    Environment,
    OverridesFile,
}

/// Where the bytes of a generated config file come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// Copy an existing file
    Copy(PathBuf),
    Inline(Vec<u8>),
}

/// A file placed under the node's writable config directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub relative_path: PathBuf,
    pub source: ContentSource,
    /// Restrict permissions to the owner
    pub private: bool,
}

impl ConfigFile {
    pub fn copy(relative_path: impl Into<PathBuf>, from: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            source: ContentSource::Copy(from.into()),
            private: false,
        }
    }

    pub fn inline(relative_path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            relative_path: relative_path.into(),
            source: ContentSource::Inline(content.into()),
            private: false,
        }
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }
}

/// Partial configuration produced by one contributor
#[derive(Debug, Clone, Default)]
pub struct Contribution {
    pub properties: BTreeMap<String, String>,
    pub java_opts: Vec<String>,
    pub node_roles: BTreeSet<String>,
    pub config_files: Vec<ConfigFile>,
    /// Secure settings, never written to the properties file
    pub keystore_entries: BTreeMap<String, String>,
    pub keystores: Vec<KeystoreMaterial>,
    pub security_configured: bool,
    pub warnings: Vec<String>,
}

impl Contribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.properties.insert(key.into(), value.to_string());
        self
    }

    pub fn java_opt(mut self, opt: impl Into<String>) -> Self {
        self.java_opts.push(opt.into());
        self
    }

    pub fn warning(mut self, message: impl Into<String>) -> Self {
        self.warnings.push(message.into());
        self
    }
}

/// Inputs handed to every contributor for one build
#[derive(Debug, Clone, Default)]
pub struct BuildParams {
    /// Certificates the platform asks the node to trust
    pub trusted_certificates: Vec<TrustedCertificate>,
}

/// One independent source of configuration
pub trait Contributor: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    fn contribute(&self, params: &BuildParams) -> Result<Contribution, ConfigurationError>;
}

/// Runs the contributor pipeline and folds the results
pub struct ConfigurationComposer {
    node_name: String,
    config_dir: PathBuf,
    distribution: PathBuf,
    rest_host: String,
    http_port: u16,
    rest_credentials: Option<(String, String)>,
    contributors: Vec<Box<dyn Contributor>>,
}

impl ConfigurationComposer {
    /// Composer over an explicit contributor list, sorted into pipeline order
    pub fn new(config: &SupervisorConfig, mut contributors: Vec<Box<dyn Contributor>>) -> Self {
        contributors.sort_by_key(|c| c.stage());

        let rest_credentials = match (&config.security.rest_username, &config.security.rest_password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };

        Self {
            node_name: config.node.name.clone(),
            config_dir: config.config_dir(),
            distribution: config.distribution_dir(),
            rest_host: config.node.hostname.clone(),
            http_port: config.node.http_port,
            rest_credentials,
            contributors,
        }
    }

    /// The full pipeline for a locally supervised node
    pub fn with_default_pipeline(
        config: &SupervisorConfig,
        registry: Arc<dyn NodeRegistry>,
        provisioner: SecretsProvisioner,
        disk: Arc<dyn DiskSpaceProbe>,
    ) -> Result<Self, ConfigurationError> {
        let prefix = &config.process.passthrough_prefix;
        let mut contributors: Vec<Box<dyn Contributor>> = vec![
            Box::new(DefaultFilesContributor::new(
                config.distribution_dir().join("config"),
            )),
            Box::new(ClusterContributor::new(config, registry)),
            Box::new(CommonSettingsContributor::new(config)),
            Box::new(SearchRoleContributor::new(config, disk)),
            Box::new(SecurityContributor::new(config, provisioner)),
            Box::new(EnvironmentContributor::from_process_env(prefix)?),
        ];

        if let Some(path) = &config.paths.overrides_file {
            contributors.push(Box::new(OverridesFileContributor::new(path, prefix)?));
        }

        Ok(Self::new(config, contributors))
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.contributors.iter().map(|c| c.stage()).collect()
    }

    /// Build one launch configuration; any contributor error aborts the build
    pub fn compose(&self, params: &BuildParams) -> Result<LaunchConfiguration, ConfigurationError> {
        let mut merged = Contribution::default();

        for contributor in &self.contributors {
            debug!("Running configuration contributor {}", contributor.name());
            let part = contributor.contribute(params).map_err(|e| {
                warn!("Contributor {} failed: {}", contributor.name(), e);
                e
            })?;

            for (key, value) in part.properties {
                if let Some(previous) = merged.properties.insert(key.clone(), value) {
                    debug!("{} overrides {} (was {})", contributor.name(), key, previous);
                }
            }
            merged.java_opts.extend(part.java_opts);
            merged.node_roles.extend(part.node_roles);
            merged.config_files.extend(part.config_files);
            merged.keystore_entries.extend(part.keystore_entries);
            merged.keystores.extend(part.keystores);
            merged.security_configured |= part.security_configured;
            merged.warnings.extend(part.warnings);
        }

        if !merged.node_roles.is_empty() {
            let roles = merged
                .node_roles
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(",");
            merged.properties.entry("node.roles".to_string()).or_insert(roles);
        }

        info!(
            "Composed launch configuration for {}: {} properties, {} files, {} warnings",
            self.node_name,
            merged.properties.len(),
            merged.config_files.len(),
            merged.warnings.len()
        );

        Ok(LaunchConfiguration {
            node_name: self.node_name.clone(),
            distribution: self.distribution.clone(),
            config_dir: self.config_dir.clone(),
            rest_host: self.rest_host.clone(),
            http_port: self.http_port,
            rest_credentials: self.rest_credentials.clone(),
            properties: merged.properties,
            java_opts: merged.java_opts,
            node_roles: merged.node_roles,
            config_files: merged.config_files,
            keystore_entries: merged.keystore_entries,
            keystores: merged.keystores,
            security_configured: merged.security_configured,
            warnings: merged.warnings,
        })
    }
}
