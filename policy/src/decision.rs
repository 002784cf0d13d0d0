use crate::instance::{CheckUpgradeRequest, InstanceInfo};
use crate::period::request_interval_minutes;
use crate::response_config::ResponseConfig;
use crate::rule::{Rule, RuleError};
use crate::version::Version;
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
#[error("failed to compute supported for rule #{rule_index} and version {version:?}: {source}")]
pub struct PrecomputeError {
    rule_index: usize,
    version: String,
    source: RuleError,
}

/// A rule together with every configured version, flagged as supported or
/// not under that rule's constraint.
#[derive(Clone, Debug)]
pub struct PrecomputedVersions {
    pub rule: Rule,
    pub versions: Vec<Version>,
}

/// How the version list of a response was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The request did not identify the client; the default list was served.
    Unidentified,
    /// The client was identified but no rule applied.
    NoMatchingRule,
    /// The rule at this index (in configuration order) applied.
    Matched(usize),
}

impl DecisionOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Unidentified => "unidentified",
            DecisionOutcome::NoMatchingRule => "no_matching_rule",
            DecisionOutcome::Matched(_) => "matched",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckUpgradeResponse<'a> {
    pub versions: &'a [Version],
    pub request_interval_in_minutes: u64,
    #[serde(skip)]
    pub outcome: DecisionOutcome,
}

/// Answers version checks from state computed once, when the configuration
/// is loaded. Read-only afterwards.
#[derive(Debug)]
pub struct DecisionEngine {
    /// Every version with `supported` set, served when no rule decides.
    default_versions: Vec<Version>,
    /// In rule order; the first entry whose rule applies wins.
    precomputed: Vec<PrecomputedVersions>,
    request_interval_in_minutes: u64,
}

impl DecisionEngine {
    /// `query_period` is the telemetry aggregation period, also advertised to
    /// clients as their polling interval.
    pub fn new(config: ResponseConfig, query_period: &str) -> Result<Self, PrecomputeError> {
        let precomputed = precompute(&config)?;
        let default_versions = config
            .versions
            .into_iter()
            .map(|version| Version {
                supported: true,
                ..version
            })
            .collect();

        Ok(DecisionEngine {
            default_versions,
            precomputed,
            request_interval_in_minutes: request_interval_minutes(query_period),
        })
    }

    pub fn decide(&self, request: &CheckUpgradeRequest) -> CheckUpgradeResponse<'_> {
        let (versions, outcome) = match InstanceInfo::try_from(request) {
            Err(e) => {
                tracing::debug!(?request, error = %e, "Could not parse request as InstanceInfo");
                (self.default_versions.as_slice(), DecisionOutcome::Unidentified)
            }
            Ok(instance) => {
                tracing::debug!(?instance, "Parsed request into InstanceInfo");
                match self
                    .precomputed
                    .iter()
                    .position(|entry| entry.rule.applies_to(&instance))
                {
                    Some(index) => (
                        self.precomputed[index].versions.as_slice(),
                        DecisionOutcome::Matched(index),
                    ),
                    None => (
                        self.default_versions.as_slice(),
                        DecisionOutcome::NoMatchingRule,
                    ),
                }
            }
        };

        CheckUpgradeResponse {
            versions,
            request_interval_in_minutes: self.request_interval_in_minutes,
            outcome,
        }
    }

    pub fn default_versions(&self) -> &[Version] {
        &self.default_versions
    }

    pub fn precomputed(&self) -> &[PrecomputedVersions] {
        &self.precomputed
    }
}

fn precompute(config: &ResponseConfig) -> Result<Vec<PrecomputedVersions>, PrecomputeError> {
    let mut precomputed = Vec::with_capacity(config.rules.len());

    for (rule_index, rule) in config.rules.iter().enumerate() {
        let mut versions = Vec::with_capacity(config.versions.len());
        for version in &config.versions {
            let supported = rule
                .supported(version)
                .map_err(|source| PrecomputeError {
                    rule_index,
                    version: version.name.clone(),
                    source,
                })?;
            versions.push(Version {
                supported,
                ..version.clone()
            });
        }

        precomputed.push(PrecomputedVersions {
            rule: rule.clone(),
            versions,
        });
    }

    Ok(precomputed)
}
