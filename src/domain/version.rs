//! Concepts and versions
//!
//! A [`Concept`] is the durable identity of a logical dataset. Each of its
//! [`Version`]s binds one `(major, minor)` number to exactly one materialized
//! dataset. Ordering is strictly numeric (major first, then minor); release
//! timestamps never take part in it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::dataset::DatasetId;
use super::id::{ConceptualId, IdError};

/// Row id of a concept
pub type ConceptKey = i64;

/// Row id of a version
pub type VersionKey = i64;

/// A `(major, minor)` version number
///
/// Field order matters: the derived `Ord` compares `major` first, then `minor`,
/// which is exactly tuple ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionNumber {
    pub major: u32,
    pub minor: u32,
}

impl VersionNumber {
    /// Number given to the first version of every concept
    pub const INITIAL: VersionNumber = VersionNumber { major: 1, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Returns the number that follows this one
    ///
    /// A major bump resets minor to 0; a minor bump keeps major.
    pub fn next(self, bump_major: bool) -> Self {
        if bump_major {
            Self::new(self.major + 1, 0)
        } else {
            Self::new(self.major, self.minor + 1)
        }
    }

    /// Label used in registry metadata (e.g. `"1.1"`)
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for VersionNumber {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| IdError::InvalidVersion(s.to_string()))?;

        let major = major
            .parse()
            .map_err(|_| IdError::InvalidVersion(s.to_string()))?;
        let minor = minor
            .parse()
            .map_err(|_| IdError::InvalidVersion(s.to_string()))?;

        Ok(Self { major, minor })
    }
}

/// An immutable binding of a concept to one materialized dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionKey,
    pub concept_id: ConceptKey,
    pub dataset_id: DatasetId,
    pub number: VersionNumber,
    pub release_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
}

impl Version {
    pub fn label(&self) -> String {
        self.number.label()
    }
}

/// The durable identity spanning every version of one logical dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptKey,
    pub conceptual_id: ConceptualId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Versions ordered by `(major, minor)` ascending
    pub versions: Vec<Version>,
}

impl Concept {
    /// Returns the version with the greatest `(major, minor)` pair
    ///
    /// `None` only while the concept is being constructed.
    pub fn latest_version(&self) -> Option<&Version> {
        self.versions.iter().max_by_key(|v| v.number)
    }

    /// Returns the number the next version should carry
    ///
    /// A concept with no versions yet starts at [`VersionNumber::INITIAL`].
    pub fn next_number(&self, bump_major: bool) -> VersionNumber {
        self.latest_version()
            .map(|latest| latest.number.next(bump_major))
            .unwrap_or(VersionNumber::INITIAL)
    }
}
