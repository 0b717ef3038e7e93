use super::{ConfigFile, Contribution, Contributor, BuildParams, Stage, PROPERTIES_FILE};
use crate::error::ConfigurationError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copies the distribution's bundled config files (jvm.options, log4j2, security defaults)
pub struct DefaultFilesContributor {
    source_dir: PathBuf,
}

impl DefaultFilesContributor {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }
}

impl Contributor for DefaultFilesContributor {
    fn name(&self) -> &'static str {
        "default-files"
    }

    fn stage(&self) -> Stage {
        Stage::DefaultFiles
    }

    fn contribute(&self, _params: &BuildParams) -> Result<Contribution, ConfigurationError> {
        let mut files = Vec::new();
        collect_files(&self.source_dir, Path::new(""), &mut files)?;
        files.sort();

        debug!(
            "Found {} bundled config files in {}",
            files.len(),
            self.source_dir.display()
        );

        let mut contribution = Contribution::new();
        contribution.config_files = files
            .into_iter()
            .filter(|relative| relative.as_path() != Path::new(PROPERTIES_FILE))
            .map(|relative| {
                let from = self.source_dir.join(&relative);
                ConfigFile::copy(relative, from)
            })
            .collect();
        Ok(contribution)
    }
}

fn collect_files(
    root: &Path,
    relative: &Path,
    out: &mut Vec<PathBuf>,
) -> Result<(), ConfigurationError> {
    let dir = root.join(relative);
    let entries = fs::read_dir(&dir).map_err(|e| ConfigurationError::io(&dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigurationError::io(&dir, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| ConfigurationError::io(entry.path(), e))?;
        let child = relative.join(entry.file_name());
        if file_type.is_dir() {
            collect_files(root, &child, out)?;
        } else if file_type.is_file() {
            out.push(child);
        }
    }
    Ok(())
}
