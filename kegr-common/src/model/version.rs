// kegr-common/src/model/version.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{KegrError, Result};

/// Wrapper around semver::Version for OS, toolchain and formula versions.
///
/// Accepts the loose forms found in the wild (`10.11`, `8`, `3.5.2_2`,
/// `10.13.6.1`) by padding or truncating to three numeric components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(semver::Version);

impl Version {
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        semver::Version::parse(trimmed).map(Version).or_else(|_| {
            // Homebrew pkg versions carry a `_<revision>` suffix
            let cleaned = trimmed.split('_').next().unwrap_or(trimmed);
            let parts: Vec<&str> = cleaned.split('.').collect();
            if parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
                return Err(KegrError::VersionError(format!(
                    "Failed to parse version '{s}': expected dotted numeric components"
                )));
            }
            let padded = match parts.len() {
                1 => format!("{}.0.0", parts[0]),
                2 => format!("{}.{}.0", parts[0], parts[1]),
                _ => parts[..3].join("."),
            };
            semver::Version::parse(&padded).map(Version).map_err(|e| {
                KegrError::VersionError(format!(
                    "Failed to parse version '{s}' (tried '{padded}'): {e}"
                ))
            })
        })
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    /// `major.minor`, the granularity macOS releases are compared at.
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.0.major, self.0.minor)
    }
}

impl FromStr for Version {
    type Err = KegrError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<Version> for semver::Version {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::from_str(&s).map_err(serde::de::Error::custom)
    }
}
