//! Upgrade eligibility policy: the configured versions, the rules that decide
//! which of them a client is told are supported, and the per-request decision.

pub mod constraint;
pub mod decision;
pub mod instance;
pub mod period;
pub mod response_config;
pub mod rule;
pub mod version;

pub use constraint::VersionConstraint;
pub use decision::{CheckUpgradeResponse, DecisionEngine, DecisionOutcome, PrecomputeError};
pub use instance::{Arch, CheckUpgradeRequest, InstanceInfo, InstanceInfoError, Platform};
pub use response_config::{ConfigError, ResponseConfig};
pub use rule::{Constraints, Criteria, Rule, RuleError};
pub use version::{VERSION_TAG_LATEST, Version, VersionError};
