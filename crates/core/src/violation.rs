//! Consistency violations found by verification.
//!
//! A violation is not an error: it is a verification outcome that carries
//! enough context to drive a targeted repair.

use crate::avu::AccessControl;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single named inconsistency on one data object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// A valid replica has no checksum.
    ChecksumMissing { replica: u32 },
    /// A replica checksum differs from the warehouse checksum.
    ChecksumMismatch {
        replica: u32,
        expected: String,
        actual: String,
    },
    /// The number of valid replicas differs from the expected replication factor.
    ReplicaCountWrong { expected: usize, actual: usize },
    /// Valid replicas disagree on their checksum.
    ReplicaInconsistent { checksums: Vec<(u32, String)> },
    /// A required attribute is absent or empty.
    MetadataMissing { attribute: String },
    /// An attribute is present with the wrong value or more values than allowed.
    MetadataStale {
        attribute: String,
        expected: String,
        actual: Vec<String>,
    },
    /// Consent is withdrawn but the object is not restricted.
    ConsentNotWithdrawn {
        /// The restriction attribute is absent.
        missing_attribute: bool,
        /// Grants that must be revoked.
        unrestricted: Vec<AccessControl>,
    },
}

impl Violation {
    pub fn kind(&self) -> ViolationKind {
        match self {
            Violation::ChecksumMissing { .. } => ViolationKind::ChecksumMissing,
            Violation::ChecksumMismatch { .. } => ViolationKind::ChecksumMismatch,
            Violation::ReplicaCountWrong { .. } => ViolationKind::ReplicaCountWrong,
            Violation::ReplicaInconsistent { .. } => ViolationKind::ReplicaInconsistent,
            Violation::MetadataMissing { .. } => ViolationKind::MetadataMissing,
            Violation::MetadataStale { .. } => ViolationKind::MetadataStale,
            Violation::ConsentNotWithdrawn { .. } => ViolationKind::ConsentNotWithdrawn,
        }
    }

    /// The attribute named by a metadata violation.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Violation::MetadataMissing { attribute }
            | Violation::MetadataStale { attribute, .. } => Some(attribute),
            _ => None,
        }
    }

    pub fn metadata_missing(attribute: impl Into<String>) -> Self {
        Violation::MetadataMissing {
            attribute: attribute.into(),
        }
    }

    pub fn metadata_stale(
        attribute: impl Into<String>,
        expected: impl Into<String>,
        actual: Vec<String>,
    ) -> Self {
        Violation::MetadataStale {
            attribute: attribute.into(),
            expected: expected.into(),
            actual,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::ChecksumMissing { replica } => {
                write!(f, "replica {replica} has no checksum")
            }
            Violation::ChecksumMismatch {
                replica,
                expected,
                actual,
            } => write!(
                f,
                "replica {replica} checksum {actual} does not match expected {expected}"
            ),
            Violation::ReplicaCountWrong { expected, actual } => {
                write!(f, "expected {expected} valid replicas, found {actual}")
            }
            Violation::ReplicaInconsistent { checksums } => {
                let listed: Vec<String> = checksums
                    .iter()
                    .map(|(i, c)| format!("{i}:{c}"))
                    .collect();
                write!(f, "replica checksums disagree ({})", listed.join(", "))
            }
            Violation::MetadataMissing { attribute } => {
                write!(f, "missing metadata '{attribute}'")
            }
            Violation::MetadataStale {
                attribute,
                expected,
                actual,
            } => write!(
                f,
                "metadata '{attribute}' is [{}], expected '{expected}'",
                actual.join(", ")
            ),
            Violation::ConsentNotWithdrawn {
                missing_attribute,
                unrestricted,
            } => {
                let grants: Vec<String> = unrestricted.iter().map(|a| a.to_string()).collect();
                write!(
                    f,
                    "consent withdrawn but object is unrestricted (attribute missing: {missing_attribute}, grants: [{}])",
                    grants.join(", ")
                )
            }
        }
    }
}

/// The closed set of violation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ChecksumMissing,
    ChecksumMismatch,
    ReplicaCountWrong,
    ReplicaInconsistent,
    MetadataMissing,
    MetadataStale,
    ConsentNotWithdrawn,
}

impl ViolationKind {
    pub const ALL: [ViolationKind; 7] = [
        Self::ChecksumMissing,
        Self::ChecksumMismatch,
        Self::ReplicaCountWrong,
        Self::ReplicaInconsistent,
        Self::MetadataMissing,
        Self::MetadataStale,
        Self::ConsentNotWithdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChecksumMissing => "checksum_missing",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::ReplicaCountWrong => "replica_count_wrong",
            Self::ReplicaInconsistent => "replica_inconsistent",
            Self::MetadataMissing => "metadata_missing",
            Self::MetadataStale => "metadata_stale",
            Self::ConsentNotWithdrawn => "consent_not_withdrawn",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An independently selectable verification check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// Replica checksums against each other, the warehouse and the `md5` AVU.
    Checksum,
    /// Valid replica count.
    Replicas,
    /// Required common and platform metadata.
    Metadata,
    /// Consent withdrawal restrictions.
    Consent,
}

impl CheckKind {
    pub const ALL: [CheckKind; 4] = [
        Self::Checksum,
        Self::Replicas,
        Self::Metadata,
        Self::Consent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checksum => "checksum",
            Self::Replicas => "replicas",
            Self::Metadata => "metadata",
            Self::Consent => "consent",
        }
    }
}

impl FromStr for CheckKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "checksum" | "checksums" => Ok(Self::Checksum),
            "replicas" | "replica" => Ok(Self::Replicas),
            "metadata" => Ok(Self::Metadata),
            "consent" => Ok(Self::Consent),
            other => Err(crate::Error::UnknownCheck(other.to_string())),
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
