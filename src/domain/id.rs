//! Identifiers for concepts and registry records
//!
//! ID Format:
//! - Conceptual IDs: `c-{7-char-hash}` (e.g., `c-7f2b4c1`)
//! - DOIs: `{prefix}.{7 digits}` (e.g., `10.5281/fakenodo.4827193`)
//!
//! Concept hashes are derived from the concept name + creation timestamp, so two
//! concepts with the same name created at different instants never collide.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default DOI prefix used by the simulated registry
pub const DEFAULT_DOI_PREFIX: &str = "10.5281/fakenodo";

#[derive(Debug, Error, PartialEq)]
pub enum IdError {
    #[error("Invalid conceptual ID format: expected 'c-{{7-char-hash}}', got '{0}'")]
    InvalidConceptualId(String),

    #[error("Invalid DOI: expected '10.{{registrant}}/{{suffix}}', got '{0}'")]
    InvalidDoi(String),

    #[error("Invalid version number: expected '{{major}}.{{minor}}', got '{0}'")]
    InvalidVersion(String),
}

/// Generates a 7-character hash from a name and timestamp
fn generate_hash(name: &str, timestamp: DateTime<Utc>) -> String {
    let input = format!("{}{}", name, timestamp.timestamp_nanos_opt().unwrap_or(0));
    let hash = blake3::hash(input.as_bytes());
    let hex = hash.to_hex();
    hex[..7].to_string()
}

/// Durable identity of a logical dataset across all its versions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConceptualId {
    hash: String,
}

impl ConceptualId {
    /// Creates a new concept ID from the concept name and creation time
    pub fn new(name: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            hash: generate_hash(name, timestamp),
        }
    }
}

impl fmt::Display for ConceptualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c-{}", self.hash)
    }
}

impl FromStr for ConceptualId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let hash = s
            .strip_prefix("c-")
            .ok_or_else(|| IdError::InvalidConceptualId(s.to_string()))?;

        if hash.len() != 7 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdError::InvalidConceptualId(s.to_string()));
        }

        Ok(Self {
            hash: hash.to_string(),
        })
    }
}

impl TryFrom<String> for ConceptualId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConceptualId> for String {
    fn from(id: ConceptualId) -> Self {
        id.to_string()
    }
}

/// A persistent identifier assigned by the registry on publish
///
/// Parsing only checks the generic `10.x/y` shape so that DOIs minted by other
/// registries (or older schemes) stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Doi(String);

impl Doi {
    /// Mints a fresh DOI under `prefix` with a random 7-digit suffix
    pub fn mint(prefix: &str) -> Self {
        let suffix: u32 = rand::thread_rng().gen_range(1_000_000..=9_999_999);
        Self(format!("{}.{}", prefix.trim_end_matches('.'), suffix))
    }

    /// Returns true if this DOI follows the `{prefix}.{7 digits}` minting scheme
    pub fn matches_scheme(&self, prefix: &str) -> bool {
        let Some(rest) = self.0.strip_prefix(prefix.trim_end_matches('.')) else {
            return false;
        };
        let Some(digits) = rest.strip_prefix('.') else {
            return false;
        };
        digits.len() == 7 && digits.chars().all(|c| c.is_ascii_digit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Doi {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let valid = s
            .split_once('/')
            .is_some_and(|(registrant, suffix)| registrant.starts_with("10.") && !suffix.is_empty());

        if !valid {
            return Err(IdError::InvalidDoi(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Doi {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Doi> for String {
    fn from(doi: Doi) -> Self {
        doi.0
    }
}
