//! Core domain types and shared logic for rodwatch.
//!
//! This crate defines the data model used across all other crates:
//! - Stored objects, replicas, metadata attributes (AVUs) and access controls
//! - Object classes inferred from storage paths
//! - Metadata attribute constant tables
//! - Consistency violations and repair outcomes
//! - Warehouse reference records
//! - Configuration

pub mod attributes;
pub mod avu;
pub mod class;
pub mod config;
pub mod error;
pub mod object;
pub mod outcome;
pub mod path;
pub mod reference;
pub mod violation;

pub use avu::{AccessControl, AccessLevel, Avu};
pub use class::ObjectClass;
pub use error::{Error, Result};
pub use object::{Entry, EntryKind, Replica, StoredObject};
pub use outcome::{ReferenceStatus, RepairOutcome, SkipReason};
pub use reference::{WarehouseKey, WarehouseRecord};
pub use violation::{CheckKind, Violation, ViolationKind};

/// Number of valid replicas expected for a data object unless its class overrides it.
pub const DEFAULT_REPLICATION_FACTOR: usize = 2;

/// Compare two checksum strings as hex digests, ignoring case.
pub fn checksums_equal(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Normalize a hex checksum for grouping and storage.
pub fn normalize_checksum(checksum: &str) -> String {
    checksum.trim().to_ascii_lowercase()
}
