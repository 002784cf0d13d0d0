use crate::rule::{Rule, RuleError};
use crate::version::{Version, VersionError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to open config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config as JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid rule #{index}: {source}")]
    InvalidRule { index: usize, source: RuleError },
    #[error("invalid version {name:?}: {source}")]
    InvalidVersion { name: String, source: VersionError },
    #[error("duplicate version name {0:?}")]
    DuplicateVersion(String),
    #[error("no latest label specified")]
    NoLatestVersion,
}

/// The eligibility policy: rules in evaluation order and the versions they
/// apply to.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResponseConfig {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub versions: Vec<Version>,
}

impl ResponseConfig {
    /// Reads, defaults and validates the configuration at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Every version comes back with `supported` set; this is the list served
    /// when no rule decides otherwise.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let mut config: ResponseConfig = serde_json::from_reader(reader)?;

        for version in &mut config.versions {
            version.supported = true;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, rule) in self.rules.iter().enumerate() {
            rule.validate()
                .map_err(|source| ConfigError::InvalidRule { index, source })?;
        }

        let mut names = HashSet::new();
        for version in &self.versions {
            version
                .validate()
                .map_err(|source| ConfigError::InvalidVersion {
                    name: version.name.clone(),
                    source,
                })?;

            if !names.insert(version.name.as_str()) {
                return Err(ConfigError::DuplicateVersion(version.name.clone()));
            }
        }

        if !self.versions.iter().any(Version::is_latest) {
            return Err(ConfigError::NoLatestVersion);
        }

        Ok(())
    }
}
