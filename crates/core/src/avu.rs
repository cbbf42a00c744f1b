//! Metadata attributes and access controls attached to stored items.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An attribute-value-unit triple.
///
/// Attribute names are not unique on an item: the storage system permits
/// several AVUs sharing one attribute.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Avu {
    pub attribute: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl Avu {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
            units: None,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// True if the value is non-empty after trimming whitespace.
    pub fn has_value(&self) -> bool {
        !self.value.trim().is_empty()
    }
}

impl fmt::Display for Avu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.units {
            Some(units) => write!(f, "{}={} ({})", self.attribute, self.value, units),
            None => write!(f, "{}={}", self.attribute, self.value),
        }
    }
}

/// Permission level granted to a user or group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// No access. Setting this level removes a grant.
    Null,
    Read,
    Write,
    Own,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Read => "read",
            Self::Write => "write",
            Self::Own => "own",
        }
    }

    /// True for any level that allows reading the data.
    pub fn grants_read(&self) -> bool {
        !matches!(self, Self::Null)
    }
}

impl FromStr for AccessLevel {
    type Err = crate::Error;

    /// Parses both the short names and the newer storage server spellings
    /// (`read_object`, `modify_object`).
    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().replace(' ', "_").as_str() {
            "null" | "none" => Ok(Self::Null),
            "read" | "read_object" => Ok(Self::Read),
            "write" | "modify_object" => Ok(Self::Write),
            "own" => Ok(Self::Own),
            other => Err(crate::Error::InvalidAccessLevel(other.to_string())),
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An access control entry: an owner (user or group), optional zone and level.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessControl {
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub level: AccessLevel,
}

impl AccessControl {
    pub fn new(owner: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            owner: owner.into(),
            zone: None,
            level,
        }
    }

    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// A change that removes any grant held by the same owner.
    pub fn revoked(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            zone: self.zone.clone(),
            level: AccessLevel::Null,
        }
    }

    /// True if two entries refer to the same owner, treating a missing zone as a wildcard.
    pub fn same_owner(&self, other: &AccessControl) -> bool {
        self.owner == other.owner
            && match (&self.zone, &other.zone) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

impl fmt::Display for AccessControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.zone {
            Some(zone) => write!(f, "{}#{}:{}", self.owner, zone, self.level),
            None => write!(f, "{}:{}", self.owner, self.level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_level_parses_server_spellings() {
        assert_eq!("read object".parse::<AccessLevel>().unwrap(), AccessLevel::Read);
        assert_eq!("modify_object".parse::<AccessLevel>().unwrap(), AccessLevel::Write);
        assert_eq!("OWN".parse::<AccessLevel>().unwrap(), AccessLevel::Own);
        assert!("admin".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn test_same_owner_treats_missing_zone_as_wildcard() {
        let a = AccessControl::new("ss_1000", AccessLevel::Read).in_zone("seq");
        let b = AccessControl::new("ss_1000", AccessLevel::Null);
        let c = AccessControl::new("ss_1000", AccessLevel::Null).in_zone("other");
        assert!(a.same_owner(&b));
        assert!(!a.same_owner(&c));
    }

    #[test]
    fn test_avu_display() {
        assert_eq!(Avu::new("md5", "abc").to_string(), "md5=abc");
        assert_eq!(
            Avu::new("size", "10").with_units("bytes").to_string(),
            "size=10 (bytes)"
        );
    }
}
