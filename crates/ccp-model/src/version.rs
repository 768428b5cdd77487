//! Package versions and NuGet-style version ranges
//!
//! Versions are semantic versions. Package feeds routinely publish
//! two-part versions (`1.0`), so parsing pads missing numeric parts.
//! Ranges use interval notation:
//! - `[1.0.0, )` - at least 1.0.0
//! - `(1.0.0, 2.0.0]` - above 1.0.0, up to and including 2.0.0
//! - `[1.0.0]` - exactly 1.0.0
//! - `1.0.0` - bare version, same as `[1.0.0, )`

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Not a valid version string
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// Not a valid version range
    #[error("invalid version range: {0}")]
    InvalidRange(String),
}

/// Parse a package version, normalizing short numeric forms
///
/// # Errors
/// Returns `VersionError::InvalidVersion` when the text is not a version.
pub fn parse_version(text: &str) -> Result<Version, VersionError> {
    let text = text.trim();
    let invalid = || VersionError::InvalidVersion(text.to_string());

    let split_at = text.find(['-', '+']).unwrap_or(text.len());
    let (core, suffix) = text.split_at(split_at);

    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.len() == 4 && parts[3].chars().all(|c| c == '0') {
        parts.truncate(3);
    }
    if parts.is_empty()
        || parts.len() > 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(invalid());
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    Version::parse(&format!("{}{}", parts.join("."), suffix)).map_err(|_| invalid())
}

/// Interval of acceptable versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    min: Option<Version>,
    include_min: bool,
    max: Option<Version>,
    include_max: bool,
}

impl VersionRange {
    /// Range satisfied by `version` and everything above it
    #[inline]
    #[must_use]
    pub fn at_least(version: Version) -> Self {
        Self {
            min: Some(version),
            include_min: true,
            max: None,
            include_max: false,
        }
    }

    /// Range satisfied only by `version`
    #[inline]
    #[must_use]
    pub fn exact(version: Version) -> Self {
        Self {
            min: Some(version.clone()),
            include_min: true,
            max: Some(version),
            include_max: true,
        }
    }

    /// Range accepting every version
    #[inline]
    #[must_use]
    pub fn any() -> Self {
        Self {
            min: None,
            include_min: false,
            max: None,
            include_max: false,
        }
    }

    /// Lower bound, if any
    #[inline]
    #[must_use]
    pub fn min(&self) -> Option<&Version> {
        self.min.as_ref()
    }

    /// Check whether `version` falls inside the range
    #[must_use]
    pub fn satisfies(&self, version: &Version) -> bool {
        let above_min = match &self.min {
            Some(min) if self.include_min => version >= min,
            Some(min) => version > min,
            None => true,
        };
        let below_max = match &self.max {
            Some(max) if self.include_max => version <= max,
            Some(max) => version < max,
            None => true,
        };
        above_min && below_max
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(min), Some(max)) = (&self.min, &self.max) {
            if min == max && self.include_min && self.include_max {
                return write!(f, "[{min}]");
            }
        }
        let open = if self.include_min { '[' } else { '(' };
        let close = if self.include_max { ']' } else { ')' };
        let min = self.min.as_ref().map(ToString::to_string).unwrap_or_default();
        let max = self.max.as_ref().map(ToString::to_string).unwrap_or_default();
        write!(f, "{open}{min}, {max}{close}")
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        let invalid = || VersionError::InvalidRange(text.to_string());

        if trimmed.is_empty() {
            return Ok(Self::any());
        }

        let Some(first) = trimmed.chars().next() else {
            return Err(invalid());
        };
        if first != '[' && first != '(' {
            return parse_version(trimmed).map(Self::at_least).map_err(|_| invalid());
        }

        let include_min = first == '[';
        let include_max = match trimmed.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(invalid()),
        };
        let inner = &trimmed[1..trimmed.len() - 1];

        let bound = |part: &str| -> Result<Option<Version>, VersionError> {
            let part = part.trim();
            if part.is_empty() {
                Ok(None)
            } else {
                parse_version(part).map(Some).map_err(|_| invalid())
            }
        };

        match inner.split_once(',') {
            Some((min, max)) => Ok(Self {
                min: bound(min)?,
                include_min,
                max: bound(max)?,
                include_max,
            }),
            None => {
                let version = bound(inner)?.ok_or_else(invalid)?;
                if !(include_min && include_max) {
                    return Err(invalid());
                }
                Ok(Self::exact(version))
            }
        }
    }
}

impl TryFrom<String> for VersionRange {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionRange> for String {
    fn from(value: VersionRange) -> Self {
        value.to_string()
    }
}
