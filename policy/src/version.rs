use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Tag marking the version advertised to clients as the current release.
pub const VERSION_TAG_LATEST: &str = "latest";

#[derive(thiserror::Error, Debug)]
pub enum VersionError {
    #[error("invalid empty label for version {0:?}")]
    EmptyTags(String),
    #[error("failed to parse name {name:?}: {source}")]
    InvalidName {
        name: String,
        source: semver::Error,
    },
    #[error("failed to parse minUpgradableVersion {value:?}: {source}")]
    InvalidMinUpgradableVersion {
        value: String,
        source: semver::Error,
    },
    #[error("failed to parse releaseDate {value:?}: {source}")]
    InvalidReleaseDate {
        value: String,
        source: chrono::ParseError,
    },
}

/// A release of the application, as configured and as returned to clients.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    /// Strict semantic version, without a `v` prefix.
    pub name: String,
    /// RFC 3339 timestamp.
    pub release_date: String,
    /// Empty or a strict semantic version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_upgradable_version: String,
    /// Only meaningful together with the rule that produced it. Any value in
    /// the configuration file is replaced on load.
    #[serde(default)]
    pub supported: bool,
    pub tags: Vec<String>,
    #[serde(default)]
    pub extra_info: IndexMap<String, String>,
}

impl Version {
    pub fn validate(&self) -> Result<(), VersionError> {
        if self.tags.is_empty() {
            return Err(VersionError::EmptyTags(self.name.clone()));
        }

        self.parsed_name()?;

        if !self.min_upgradable_version.is_empty() {
            semver::Version::parse(&self.min_upgradable_version).map_err(|source| {
                VersionError::InvalidMinUpgradableVersion {
                    value: self.min_upgradable_version.clone(),
                    source,
                }
            })?;
        }

        chrono::DateTime::parse_from_rfc3339(&self.release_date).map_err(|source| {
            VersionError::InvalidReleaseDate {
                value: self.release_date.clone(),
                source,
            }
        })?;

        Ok(())
    }

    /// Parses `name` as a semantic version.
    pub fn parsed_name(&self) -> Result<semver::Version, VersionError> {
        semver::Version::parse(&self.name).map_err(|source| VersionError::InvalidName {
            name: self.name.clone(),
            source,
        })
    }

    pub fn is_latest(&self) -> bool {
        self.tags.iter().any(|tag| tag == VERSION_TAG_LATEST)
    }
}

/// Parses a version reported by a client.
///
/// Clients are less disciplined than the configuration: a leading `v` is
/// accepted and missing minor/patch segments are padded with zeros, so
/// `v12.1` parses as `12.1.0`.
pub fn parse_client_version(input: &str) -> Result<semver::Version, semver::Error> {
    let input = input.trim();
    let input = input.strip_prefix(['v', 'V']).unwrap_or(input);

    match semver::Version::parse(input) {
        Ok(version) => Ok(version),
        Err(original_err) => {
            let (core, suffix) = match input.find(['-', '+']) {
                Some(idx) => input.split_at(idx),
                None => (input, ""),
            };
            let mut segments: Vec<&str> = core.split('.').collect();
            if segments.is_empty() || segments.len() > 3 || segments.iter().any(|s| s.is_empty())
            {
                return Err(original_err);
            }
            while segments.len() < 3 {
                segments.push("0");
            }
            let normalized = format!("{}{}", segments.join("."), suffix);
            semver::Version::parse(&normalized).map_err(|_| original_err)
        }
    }
}
