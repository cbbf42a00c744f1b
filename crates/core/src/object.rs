//! Stored data objects and their replicas.

use crate::avu::{AccessControl, Avu};
use crate::class::ObjectClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// One physical copy of a data object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    /// Replica number, unique within the object.
    pub index: u32,
    /// Resource holding this copy.
    pub location: String,
    /// Checksum of the replica's content, if one has been recorded.
    #[serde(default)]
    pub checksum: Option<String>,
    /// False when the replica is stale or has been invalidated.
    pub valid: bool,
}

impl Replica {
    pub fn new(index: u32, location: impl Into<String>) -> Self {
        Self {
            index,
            location: location.into(),
            checksum: None,
            valid: true,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    /// The recorded checksum, ignoring blank values.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// A snapshot of a data object fetched for one check-and-repair cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub path: String,
    pub replicas: Vec<Replica>,
    pub metadata: Vec<Avu>,
    pub permissions: Vec<AccessControl>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created: Option<OffsetDateTime>,
}

impl StoredObject {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            replicas: Vec::new(),
            metadata: Vec::new(),
            permissions: Vec::new(),
            created: None,
        }
    }

    pub fn class(&self) -> ObjectClass {
        ObjectClass::infer(&self.path)
    }

    pub fn valid_replicas(&self) -> impl Iterator<Item = &Replica> {
        self.replicas.iter().filter(|r| r.valid)
    }

    pub fn valid_replica_count(&self) -> usize {
        self.valid_replicas().count()
    }

    /// True if every valid replica has a checksum.
    pub fn has_complete_checksums(&self) -> bool {
        self.valid_replicas().all(|r| r.checksum().is_some())
    }

    /// Valid replica indices grouped by normalized checksum.
    pub fn checksum_groups(&self) -> BTreeMap<String, Vec<u32>> {
        let mut groups: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for replica in self.valid_replicas() {
            if let Some(checksum) = replica.checksum() {
                groups
                    .entry(crate::normalize_checksum(checksum))
                    .or_default()
                    .push(replica.index);
            }
        }
        groups
    }

    /// The checksum shared by every valid replica, if they all agree.
    pub fn consistent_checksum(&self) -> Option<String> {
        if !self.has_complete_checksums() {
            return None;
        }
        let groups = self.checksum_groups();
        if groups.len() == 1 {
            groups.into_keys().next()
        } else {
            None
        }
    }

    /// All AVUs with the given attribute name.
    pub fn avus<'a>(&'a self, attribute: &'a str) -> impl Iterator<Item = &'a Avu> + 'a {
        self.metadata.iter().filter(move |a| a.attribute == attribute)
    }

    /// True if at least one AVU with a non-empty value carries the attribute.
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.avus(attribute).any(Avu::has_value)
    }

    /// Non-empty values of an attribute, in metadata order.
    pub fn values(&self, attribute: &str) -> Vec<String> {
        self.avus(attribute)
            .filter(|a| a.has_value())
            .map(|a| a.value.clone())
            .collect()
    }

    /// The single value of an attribute, or `None` if absent or ambiguous.
    pub fn single_value(&self, attribute: &str) -> Option<String> {
        let values = self.values(attribute);
        match values.as_slice() {
            [value] => Some(value.clone()),
            _ => None,
        }
    }

    pub fn has_avu(&self, attribute: &str, value: &str) -> bool {
        self.avus(attribute).any(|a| a.value == value)
    }
}

/// Kind of item found in a collection listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Collection,
    DataObject,
}

/// An item found in a collection listing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Entry {
    Collection(String),
    DataObject(String),
}

impl Entry {
    pub fn path(&self) -> &str {
        match self {
            Entry::Collection(p) | Entry::DataObject(p) => p,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Collection(_) => EntryKind::Collection,
            Entry::DataObject(_) => EntryKind::DataObject,
        }
    }
}
