use crate::definition::ProfileError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Structured profile version number.
///
/// Backed by a semantic version. Short forms are accepted on parse and padded
/// with zeros, so `"1.2"` and `"1.2.0"` name the same version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(semver::Version);

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    pub fn parse(input: &str) -> Result<Self, ProfileError> {
        let trimmed = input.trim();
        let core_end = trimmed
            .find(|c: char| c == '-' || c == '+')
            .unwrap_or(trimmed.len());
        let (core, rest) = trimmed.split_at(core_end);
        let padded = match core.matches('.').count() {
            0 => format!("{core}.0.0{rest}"),
            1 => format!("{core}.0{rest}"),
            _ => trimmed.to_owned(),
        };
        semver::Version::parse(&padded)
            .map(Self)
            .map_err(|e| ProfileError::InvalidVersion {
                input: input.to_owned(),
                reason: e.to_string(),
            })
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Version {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = ProfileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}
