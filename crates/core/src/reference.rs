//! Warehouse reference records.

use crate::attributes;
use crate::object::StoredObject;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier used to look an object up in the warehouse.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum WarehouseKey {
    /// Sequencing product identifier (`id_product`).
    Product(String),
    /// Sample identifier (`sample_id`).
    Sample(String),
}

impl WarehouseKey {
    /// Derive the lookup key from an object's metadata.
    ///
    /// Uses the `id_product` AVU, falling back to `sample_id`. Ambiguous
    /// attributes (several distinct values) yield no key.
    pub fn for_object(object: &StoredObject) -> Option<Self> {
        if let Some(product) = object.single_value(attributes::ID_PRODUCT) {
            return Some(Self::Product(product.trim().to_string()));
        }
        object
            .single_value(attributes::SAMPLE_ID)
            .map(|s| Self::Sample(s.trim().to_string()))
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Product(id) | Self::Sample(id) => id,
        }
    }
}

impl fmt::Display for WarehouseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Product(id) => write!(f, "product:{id}"),
            Self::Sample(id) => write!(f, "sample:{id}"),
        }
    }
}

/// Expected reference state for an object, read from the warehouse.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRecord {
    pub key: WarehouseKey,
    #[serde(default)]
    pub expected_checksum: Option<String>,
    #[serde(default)]
    pub expected_location: Option<String>,
    #[serde(default)]
    pub sample_id: Option<String>,
    #[serde(default)]
    pub study_id: Option<String>,
    #[serde(default)]
    pub consent_withdrawn: bool,
}

impl WarehouseRecord {
    pub fn new(key: WarehouseKey) -> Self {
        Self {
            key,
            expected_checksum: None,
            expected_location: None,
            sample_id: None,
            study_id: None,
            consent_withdrawn: false,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.expected_checksum = Some(checksum.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.expected_location = Some(location.into());
        self
    }

    pub fn with_sample(mut self, sample_id: impl Into<String>) -> Self {
        self.sample_id = Some(sample_id.into());
        self
    }

    pub fn with_study(mut self, study_id: impl Into<String>) -> Self {
        self.study_id = Some(study_id.into());
        self
    }

    pub fn withdrawn(mut self) -> Self {
        self.consent_withdrawn = true;
        self
    }

    /// The expected checksum, ignoring blank values.
    pub fn checksum(&self) -> Option<&str> {
        self.expected_checksum
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}
