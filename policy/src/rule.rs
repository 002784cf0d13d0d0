use crate::constraint::VersionConstraint;
use crate::instance::{Arch, InstanceInfo, Platform};
use crate::version::{Version, VersionError};
use serde::{Deserialize, Serialize};

/// Matches any platform or architecture.
pub const WILDCARD: &str = "*";

#[derive(thiserror::Error, Debug)]
pub enum RuleError {
    #[error("invalid Criteria.AppVersion: not set")]
    MissingAppVersion,
    #[error("invalid Criteria.Platform {0:?}")]
    InvalidPlatform(String),
    #[error("invalid Criteria.Arch {0:?}")]
    InvalidArch(String),
    #[error("invalid Criteria.PlatformVersion: not set")]
    MissingPlatformVersion,
    #[error("Criteria.Platform must be specified if Criteria.PlatformVersion is specified")]
    PlatformVersionWithoutPlatform,
    #[error("invalid Constraints.Version: not set")]
    MissingConstraintsVersion,
    #[error("failed to parse version: {0}")]
    InvalidVersion(#[from] VersionError),
}

/// A constraint on which versions are supported, applying to the clients
/// that satisfy its criteria.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Rule {
    pub criteria: Criteria,
    pub constraints: Constraints,
}

/// Conditions a client must satisfy, all of them, for a rule to apply.
///
/// The range fields are optional only so that an absent field is caught by
/// validation instead of by deserialization; `*` is how "any" is spelled.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Criteria {
    #[serde(default)]
    pub app_version: Option<VersionConstraint>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub platform_version: Option<VersionConstraint>,
}

/// Applied to each configured version to compute its `supported` flag.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Constraints {
    #[serde(default)]
    pub version: Option<VersionConstraint>,
}

impl Rule {
    pub fn validate(&self) -> Result<(), RuleError> {
        let criteria = &self.criteria;

        if criteria.app_version.is_none() {
            return Err(RuleError::MissingAppVersion);
        }

        if criteria.platform != WILDCARD && criteria.platform.parse::<Platform>().is_err() {
            return Err(RuleError::InvalidPlatform(criteria.platform.clone()));
        }

        if criteria.arch != WILDCARD && criteria.arch.parse::<Arch>().is_err() {
            return Err(RuleError::InvalidArch(criteria.arch.clone()));
        }

        let platform_version = criteria
            .platform_version
            .as_ref()
            .ok_or(RuleError::MissingPlatformVersion)?;
        if criteria.platform == WILDCARD && !platform_version.is_wildcard() {
            return Err(RuleError::PlatformVersionWithoutPlatform);
        }

        if self.constraints.version.is_none() {
            return Err(RuleError::MissingConstraintsVersion);
        }

        Ok(())
    }

    /// Returns true if every criterion holds for the client. An unset range
    /// never matches.
    pub fn applies_to(&self, instance: &InstanceInfo) -> bool {
        let criteria = &self.criteria;

        if !criteria
            .app_version
            .as_ref()
            .is_some_and(|c| c.matches(&instance.app_version))
        {
            return false;
        }

        if criteria.platform != WILDCARD && criteria.platform != instance.platform.as_str() {
            return false;
        }

        if criteria.arch != WILDCARD && criteria.arch != instance.arch.as_str() {
            return false;
        }

        criteria
            .platform_version
            .as_ref()
            .is_some_and(|c| c.matches(&instance.platform_version))
    }

    /// Whether `version` satisfies this rule's version constraint.
    pub fn supported(&self, version: &Version) -> Result<bool, RuleError> {
        let parsed = version.parsed_name()?;
        let constraint = self
            .constraints
            .version
            .as_ref()
            .ok_or(RuleError::MissingConstraintsVersion)?;
        Ok(constraint.matches(&parsed))
    }
}
