use crate::compose::LaunchConfiguration;
use crate::error::ProcessError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

pub const SECURE_SETTINGS_FILE: &str = "opensearch.keystore";

/// Stores secure settings where the engine reads them at startup
#[async_trait]
pub trait SecureSettingsWriter: Send + Sync {
    async fn write(&self, launch: &LaunchConfiguration) -> Result<(), ProcessError>;
}

/// Writes secure settings through the distribution's `opensearch-keystore` tool
#[derive(Debug, Default, Clone, Copy)]
pub struct KeystoreCli;

impl KeystoreCli {
    async fn run(
        launch: &LaunchConfiguration,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<(), ProcessError> {
        let tool = launch.keystore_tool();
        let mut child = Command::new(&tool)
            .args(args)
            .envs(launch.environment())
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: tool.clone(),
                source,
            })?;

        if let (Some(value), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(value.as_bytes())
                .await
                .map_err(|e| secure_settings_error(args, e))?;
            // closing stdin ends the value
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| secure_settings_error(args, e))?;

        if !output.status.success() {
            return Err(ProcessError::SecureSettings {
                details: format!(
                    "{} {} exited with {}: {}",
                    tool.display(),
                    args.first().copied().unwrap_or_default(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

fn secure_settings_error(args: &[&str], e: std::io::Error) -> ProcessError {
    ProcessError::SecureSettings {
        details: format!("{}: {}", args.join(" "), e),
    }
}

#[async_trait]
impl SecureSettingsWriter for KeystoreCli {
    async fn write(&self, launch: &LaunchConfiguration) -> Result<(), ProcessError> {
        remove_stale_keystore(&launch.config_dir.join(SECURE_SETTINGS_FILE))?;
        Self::run(launch, &["create"], None).await?;

        for (key, value) in &launch.keystore_entries {
            debug!("Adding secure setting {}", key);
            Self::run(launch, &["add", "--stdin", "--force", key.as_str()], Some(value.as_str())).await?;
        }

        info!(
            "Wrote {} secure settings for {}",
            launch.keystore_entries.len(),
            launch.node_name
        );
        Ok(())
    }
}

/// The keystore is regenerated with every launch
fn remove_stale_keystore(path: &Path) -> Result<(), ProcessError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProcessError::SecureSettings {
            details: format!("removing {}: {}", path.display(), e),
        }),
    }
}

/// Keeps secure settings in memory; for dry runs and tests
#[derive(Debug, Default)]
pub struct InMemorySecureSettings {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemorySecureSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> BTreeMap<String, String> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl SecureSettingsWriter for InMemorySecureSettings {
    async fn write(&self, launch: &LaunchConfiguration) -> Result<(), ProcessError> {
        *self.entries.lock() = launch.keystore_entries.clone();
        Ok(())
    }
}
