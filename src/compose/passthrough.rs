use super::{BuildParams, Contribution, Contributor, Stage};
use crate::error::ConfigurationError;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Settings known to be safe to override; matched against the key without its prefix
const ALLOWED_PATTERNS: &[&str] = &[
    r"^cluster\.routing\.allocation\.[a-z0-9_.]+$",
    r"^indices\.[a-z0-9_.]+$",
    r"^thread_pool\.[a-z0-9_.]+$",
    r"^logger\.[a-z0-9_.]+$",
    r"^search\.max_buckets$",
    r"^http\.max_content_length$",
    r"^node\.attr\.[a-z0-9_.]+$",
];

/// Recognises pass-through keys and decides which of them deserve a warning
#[derive(Debug, Clone)]
pub struct PassthroughFilter {
    prefix: String,
    pattern: Regex,
    allowed: Vec<Regex>,
}

impl PassthroughFilter {
    pub fn new(prefix: &str) -> Result<Self, ConfigurationError> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| ConfigurationError::contributor("pass-through", e.to_string()))
        };

        let pattern = compile(&format!(
            r"^{}\.[a-z0-9_]+(\.[a-z0-9_]+)+$",
            regex::escape(prefix)
        ))?;
        let allowed = ALLOWED_PATTERNS
            .iter()
            .map(|p| compile(*p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
            allowed,
        })
    }

    /// The configuration key for a pass-through name, prefix stripped
    pub fn extract(&self, name: &str) -> Option<String> {
        if !self.pattern.is_match(name) {
            return None;
        }
        name.strip_prefix(&self.prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .map(str::to_string)
    }

    pub fn is_allowed(&self, key: &str) -> bool {
        self.allowed.iter().any(|p| p.is_match(key))
    }

    /// Apply matching entries; every key outside the allow-list yields one warning
    pub fn apply<I>(&self, origin: &str, entries: I) -> (Contribution, Vec<String>)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut properties = BTreeMap::new();
        let mut skipped = Vec::new();

        for (name, value) in entries {
            match self.extract(&name) {
                Some(key) => {
                    properties.insert(key, value);
                }
                None => skipped.push(name),
            }
        }

        let mut contribution = Contribution::new();
        for (key, value) in properties {
            if self.is_allowed(&key) {
                debug!("Applying {} setting {}", origin, key);
            } else {
                contribution = contribution.warning(format!(
                    "{} overrides {} which is not on the list of supported settings",
                    origin, key
                ));
            }
            contribution.properties.insert(key, value);
        }

        (contribution, skipped)
    }
}

/// Pass-through settings from environment variables such as `opensearch.indices.x=y`
pub struct EnvironmentContributor {
    filter: PassthroughFilter,
    variables: BTreeMap<String, String>,
}

impl EnvironmentContributor {
    pub fn new<I>(prefix: &str, variables: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(Self {
            filter: PassthroughFilter::new(prefix)?,
            variables: variables.into_iter().collect(),
        })
    }

    /// Snapshot the process environment; non-UTF-8 entries are skipped
    pub fn from_process_env(prefix: &str) -> Result<Self, ConfigurationError> {
        let variables = std::env::vars_os().filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        });
        Self::new(prefix, variables)
    }
}

impl Contributor for EnvironmentContributor {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn stage(&self) -> Stage {
        Stage::Environment
    }

    fn contribute(&self, _params: &BuildParams) -> Result<Contribution, ConfigurationError> {
        let (contribution, _) = self.filter.apply("Environment", self.variables.clone());
        if !contribution.properties.is_empty() {
            info!(
                "Applied {} settings from the environment",
                contribution.properties.len()
            );
        }
        for warning in &contribution.warnings {
            warn!("{}", warning);
        }
        Ok(contribution)
    }
}

/// Pass-through settings from a `key=value` overrides file
pub struct OverridesFileContributor {
    filter: PassthroughFilter,
    path: PathBuf,
}

impl OverridesFileContributor {
    pub fn new(path: impl Into<PathBuf>, prefix: &str) -> Result<Self, ConfigurationError> {
        Ok(Self {
            filter: PassthroughFilter::new(prefix)?,
            path: path.into(),
        })
    }

    fn read_entries(&self) -> Result<Vec<(String, String)>, ConfigurationError> {
        let content =
            fs::read_to_string(&self.path).map_err(|e| ConfigurationError::io(&self.path, e))?;

        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .or_else(|| line.split_once(':'))
                .ok_or_else(|| {
                    ConfigurationError::contributor(
                        "overrides-file",
                        format!("{}:{}: expected key=value", self.path.display(), number + 1),
                    )
                })?;
            entries.push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(entries)
    }
}

impl Contributor for OverridesFileContributor {
    fn name(&self) -> &'static str {
        "overrides-file"
    }

    fn stage(&self) -> Stage {
        Stage::OverridesFile
    }

    fn contribute(&self, _params: &BuildParams) -> Result<Contribution, ConfigurationError> {
        let entries = self.read_entries()?;
        let origin = format!("Overrides file {}", self.path.display());
        let (mut contribution, skipped) = self.filter.apply(&origin, entries);

        for name in skipped {
            contribution = contribution.warning(format!(
                "{} contains {} which is not a pass-through setting and was ignored",
                origin, name
            ));
        }
        for warning in &contribution.warnings {
            warn!("{}", warning);
        }
        Ok(contribution)
    }
}
