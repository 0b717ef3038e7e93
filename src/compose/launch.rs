use super::{ConfigFile, ContentSource};
use crate::error::ConfigurationError;
use crate::secrets::{KeystoreKind, KeystoreMaterial};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the generated engine settings file
pub const PROPERTIES_FILE: &str = "opensearch.yml";

/// The merged result of all contributors; immutable once built
#[derive(Debug, Clone)]
pub struct LaunchConfiguration {
    pub node_name: String,
    pub distribution: PathBuf,
    pub config_dir: PathBuf,
    pub rest_host: String,
    pub http_port: u16,
    pub rest_credentials: Option<(String, String)>,
    pub properties: BTreeMap<String, String>,
    pub java_opts: Vec<String>,
    pub node_roles: BTreeSet<String>,
    pub config_files: Vec<ConfigFile>,
    pub keystore_entries: BTreeMap<String, String>,
    pub keystores: Vec<KeystoreMaterial>,
    pub security_configured: bool,
    pub warnings: Vec<String>,
}

impl LaunchConfiguration {
    pub fn executable(&self) -> PathBuf {
        self.distribution.join("bin").join("opensearch")
    }

    pub fn keystore_tool(&self) -> PathBuf {
        self.distribution.join("bin").join("opensearch-keystore")
    }

    /// Runtime bundled with the distribution
    pub fn java_home(&self) -> PathBuf {
        self.distribution.join("jdk")
    }

    /// Environment handed to the engine process
    pub fn environment(&self) -> BTreeMap<String, String> {
        let java_home = self.java_home().to_string_lossy().to_string();
        let mut env = BTreeMap::new();
        env.insert("OPENSEARCH_JAVA_HOME".to_string(), java_home.clone());
        env.insert("JAVA_HOME".to_string(), java_home);
        env.insert(
            "OPENSEARCH_PATH_CONF".to_string(),
            self.config_dir.to_string_lossy().to_string(),
        );
        env.insert("OPENSEARCH_JAVA_OPTS".to_string(), self.java_opts.join(" "));
        env
    }

    pub fn rest_base_url(&self) -> String {
        let scheme = if self.security_configured { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.rest_host, self.http_port)
    }

    pub fn keystore(&self, kind: KeystoreKind) -> Option<&KeystoreMaterial> {
        self.keystores.iter().find(|k| k.kind() == kind)
    }

    /// DER certificates the REST client should trust
    pub fn trust_anchors(&self) -> Vec<Vec<u8>> {
        self.keystore(KeystoreKind::Truststore)
            .map(|t| t.chain().to_vec())
            .unwrap_or_default()
    }

    /// Render the properties as a flat YAML mapping
    pub fn render_properties(&self) -> Result<String, ConfigurationError> {
        serde_yaml::to_string(&self.properties)
            .map_err(|e| ConfigurationError::contributor("properties", e.to_string()))
    }

    /// Write every file into the config directory, properties file last
    pub fn materialize(&self) -> Result<(), ConfigurationError> {
        fs::create_dir_all(&self.config_dir)
            .map_err(|e| ConfigurationError::io(&self.config_dir, e))?;

        for file in &self.config_files {
            let target = self.config_dir.join(&file.relative_path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| ConfigurationError::io(parent, e))?;
            }
            match &file.source {
                ContentSource::Copy(from) => {
                    fs::copy(from, &target).map_err(|e| ConfigurationError::io(from, e))?;
                }
                ContentSource::Inline(content) => {
                    fs::write(&target, content).map_err(|e| ConfigurationError::io(&target, e))?;
                }
            }
            if file.private {
                restrict_permissions(&target)?;
            }
            debug!("Materialized {}", target.display());
        }

        let properties_path = self.config_dir.join(PROPERTIES_FILE);
        fs::write(&properties_path, self.render_properties()?)
            .map_err(|e| ConfigurationError::io(&properties_path, e))?;

        info!(
            "Wrote {} files and {} to {}",
            self.config_files.len(),
            PROPERTIES_FILE,
            self.config_dir.display()
        );
        Ok(())
    }

    /// Human-readable summary for dry runs
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "node: {}", self.node_name);
        let _ = writeln!(out, "config dir: {}", self.config_dir.display());
        let _ = writeln!(out, "rest endpoint: {}", self.rest_base_url());
        let _ = writeln!(out, "security: {}", if self.security_configured { "enabled" } else { "disabled" });
        let _ = writeln!(out, "roles: {}", self.node_roles.iter().cloned().collect::<Vec<_>>().join(","));
        let _ = writeln!(out, "properties:");
        for (key, value) in &self.properties {
            let _ = writeln!(out, "  {} = {}", key, value);
        }
        let _ = writeln!(out, "files:");
        for file in &self.config_files {
            let _ = writeln!(out, "  {}", file.relative_path.display());
        }
        let _ = writeln!(out, "secure settings:");
        for key in self.keystore_entries.keys() {
            let _ = writeln!(out, "  {} = <redacted>", key);
        }
        let _ = writeln!(out, "warnings: {}", self.warnings.len());
        for warning in &self.warnings {
            let _ = writeln!(out, "  - {}", warning);
        }
        out
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), ConfigurationError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| ConfigurationError::io(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), ConfigurationError> {
    Ok(())
}
