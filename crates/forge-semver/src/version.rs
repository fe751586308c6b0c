//! Parsing of relaxed version strings.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("empty version string")]
    Empty,

    #[error("too many version components (expected at most 3)")]
    TooManyComponents,

    #[error("invalid numeric component: {0:?}")]
    InvalidComponent(String),

    #[error("invalid pre-release identifier: {0:?}")]
    InvalidPreRelease(String),
}

/// A pre-release identifier, compared numerically when purely numeric.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Identifier {
    Numeric(u64),
    Alpha(String),
}

impl Identifier {
    fn parse(s: &str) -> Result<Self, VersionParseError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(VersionParseError::InvalidPreRelease(s.to_string()));
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            // Leading zeros are tolerated here; the catalog is not strict semver.
            s.parse::<u64>()
                .map(Identifier::Numeric)
                .map_err(|_| VersionParseError::InvalidPreRelease(s.to_string()))
        } else {
            Ok(Identifier::Alpha(s.to_string()))
        }
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            // Numeric identifiers always have lower precedence than alphanumeric.
            (Identifier::Numeric(_), Identifier::Alpha(_)) => Ordering::Less,
            (Identifier::Alpha(_), Identifier::Numeric(_)) => Ordering::Greater,
            (Identifier::Alpha(a), Identifier::Alpha(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed version, tolerant of 1- and 2-component forms.
///
/// `"1"` parses as `1.0.0`, `"1.2"` as `1.2.0`. Pre-release and build
/// metadata are accepted on any form; build metadata is kept for display but
/// ignored by the ordering.
#[derive(Debug, Clone)]
pub struct RelaxedVersion {
    major: u64,
    minor: u64,
    patch: u64,
    pre: Vec<Identifier>,
    raw: String,
}

impl RelaxedVersion {
    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn is_pre_release(&self) -> bool {
        !self.pre.is_empty()
    }

    /// The string this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for RelaxedVersion {
    type Err = VersionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(VersionParseError::Empty);
        }

        // Build metadata does not participate in ordering; strip it first.
        let without_build = match raw.split_once('+') {
            Some((head, _build)) => head,
            None => raw,
        };

        let (core, pre_part) = match without_build.split_once('-') {
            Some((head, tail)) => (head, Some(tail)),
            None => (without_build, None),
        };

        let mut numbers = [0u64; 3];
        let mut count = 0;
        for part in core.split('.') {
            if count == 3 {
                return Err(VersionParseError::TooManyComponents);
            }
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionParseError::InvalidComponent(part.to_string()));
            }
            numbers[count] = part
                .parse()
                .map_err(|_| VersionParseError::InvalidComponent(part.to_string()))?;
            count += 1;
        }

        let pre = match pre_part {
            Some(p) => p
                .split('.')
                .map(Identifier::parse)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(RelaxedVersion {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre,
            raw: raw.to_string(),
        })
    }
}

impl fmt::Display for RelaxedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for RelaxedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RelaxedVersion {}

impl Ord for RelaxedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                // A pre-release sorts below its release.
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl PartialOrd for RelaxedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
