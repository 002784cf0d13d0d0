use crate::version::parse_client_version;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

const EXTRA_INFO_PLATFORM: &str = "platform";
const EXTRA_INFO_PLATFORM_VERSION: &str = "platformVersion";

/// Body of a version-check request.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckUpgradeRequest {
    #[serde(default)]
    pub app_version: String,
    /// Free-form client metadata. `platform` and `platformVersion` are the
    /// only keys the policy reads.
    #[serde(default)]
    pub extra_info: IndexMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Win32,
    Darwin,
    Linux,
}

impl Platform {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Platform::Win32 => "win32",
            Platform::Darwin => "darwin",
            Platform::Linux => "linux",
        }
    }
}

impl FromStr for Platform {
    type Err = InstanceInfoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win32" => Ok(Platform::Win32),
            "darwin" => Ok(Platform::Darwin),
            "linux" => Ok(Platform::Linux),
            _ => Err(InstanceInfoError::InvalidPlatform(s.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    X64,
    Arm64,
}

impl Arch {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
        }
    }
}

impl FromStr for Arch {
    type Err = InstanceInfoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x64" => Ok(Arch::X64),
            "arm64" => Ok(Arch::Arm64),
            _ => Err(InstanceInfoError::InvalidArch(s.to_string())),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum InstanceInfoError {
    #[error("failed to parse appVersion {0:?} as semver")]
    InvalidAppVersion(String),
    #[error("extraInfo.platform not present")]
    MissingPlatform,
    #[error("invalid extraInfo.platform {0:?}")]
    MalformedPlatform(String),
    #[error("invalid platform {0:?}")]
    InvalidPlatform(String),
    #[error("invalid arch {0:?}")]
    InvalidArch(String),
    #[error("extraInfo.platformVersion not present")]
    MissingPlatformVersion,
    #[error("failed to parse platformVersion {0:?} as semver")]
    InvalidPlatformVersion(String),
}

/// The identity of a requesting client.
///
/// Older clients do not send every field and cannot be represented; deriving
/// an `InstanceInfo` from their requests fails.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceInfo {
    pub app_version: semver::Version,
    pub platform: Platform,
    pub arch: Arch,
    pub platform_version: semver::Version,
}

impl TryFrom<&CheckUpgradeRequest> for InstanceInfo {
    type Error = InstanceInfoError;

    fn try_from(request: &CheckUpgradeRequest) -> Result<Self, Self::Error> {
        let app_version = parse_client_version(&request.app_version)
            .map_err(|_| InstanceInfoError::InvalidAppVersion(request.app_version.clone()))?;

        let platform_and_arch = request
            .extra_info
            .get(EXTRA_INFO_PLATFORM)
            .ok_or(InstanceInfoError::MissingPlatform)?;

        // Exactly one hyphen: "<platform>-<arch>"
        let (platform, arch) = platform_and_arch
            .split_once('-')
            .filter(|(_, arch)| !arch.contains('-'))
            .ok_or_else(|| InstanceInfoError::MalformedPlatform(platform_and_arch.clone()))?;

        let platform = platform.parse::<Platform>()?;
        let arch = arch.parse::<Arch>()?;

        let raw_platform_version = request
            .extra_info
            .get(EXTRA_INFO_PLATFORM_VERSION)
            .ok_or(InstanceInfoError::MissingPlatformVersion)?;
        let platform_version = parse_client_version(raw_platform_version).map_err(|_| {
            InstanceInfoError::InvalidPlatformVersion(raw_platform_version.clone())
        })?;

        Ok(InstanceInfo {
            app_version,
            platform,
            arch,
            platform_version,
        })
    }
}
