//! Consistency checks for a single data object.
//!
//! Verification is pure: it reads a [`StoredObject`] snapshot and an optional
//! warehouse record and returns violations. Each check runs independently so
//! one check's findings never hide another's.

use rodwatch_core::config::EngineConfig;
use rodwatch_core::{
    AccessLevel, CheckKind, ObjectClass, StoredObject, Violation, WarehouseRecord, attributes,
    checksums_equal, normalize_checksum, path,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Verifier {
    checks: Vec<CheckKind>,
    expected_replicas: usize,
    replicas_by_class: BTreeMap<ObjectClass, usize>,
    extra_required: BTreeMap<ObjectClass, Vec<String>>,
}

impl Verifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            checks: config.enabled_checks(),
            expected_replicas: config.expected_replicas,
            replicas_by_class: config.replicas_by_class.clone(),
            extra_required: config.extra_required_metadata.clone(),
        }
    }

    /// Restrict verification to the given checks.
    pub fn with_checks(mut self, checks: &[CheckKind]) -> Self {
        let mut checks = checks.to_vec();
        checks.sort();
        checks.dedup();
        self.checks = if checks.is_empty() {
            CheckKind::ALL.to_vec()
        } else {
            checks
        };
        self
    }

    pub fn expected_replicas(&self, class: ObjectClass) -> usize {
        self.replicas_by_class
            .get(&class)
            .copied()
            .unwrap_or(self.expected_replicas)
    }

    /// Run every enabled check.
    pub fn verify(
        &self,
        object: &StoredObject,
        reference: Option<&WarehouseRecord>,
    ) -> Vec<Violation> {
        self.checks
            .iter()
            .flat_map(|check| self.check(*check, object, reference))
            .collect()
    }

    /// Run a single check.
    pub fn check(
        &self,
        kind: CheckKind,
        object: &StoredObject,
        reference: Option<&WarehouseRecord>,
    ) -> Vec<Violation> {
        match kind {
            CheckKind::Checksum => check_checksums(object, reference),
            CheckKind::Replicas => check_replicas(object, self.expected_replicas(object.class())),
            CheckKind::Metadata => self.check_metadata(object, reference),
            CheckKind::Consent => check_consent(object, reference),
        }
    }

    /// Attributes an object must carry, in reporting order.
    pub fn required_attributes(&self, object: &StoredObject) -> Vec<String> {
        let class = object.class();
        let mut required: Vec<String> = attributes::COMMON_REQUIRED
            .iter()
            .chain(attributes::class_required(class))
            .map(|a| a.to_string())
            .collect();
        if let Some(extra) = self.extra_required.get(&class) {
            required.extend(extra.iter().cloned());
        }
        let mut seen = std::collections::HashSet::new();
        required.retain(|a| seen.insert(a.clone()));
        required
    }

    fn check_metadata(
        &self,
        object: &StoredObject,
        reference: Option<&WarehouseRecord>,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();

        if attributes::requires_type_metadata(&object.path)
            && let Some(expected) = attributes::parse_object_type(&object.path)
        {
            let values = object.values(attributes::TYPE);
            match values.as_slice() {
                [] => violations.push(Violation::metadata_missing(attributes::TYPE)),
                [value] if value.eq_ignore_ascii_case(&expected) => {}
                _ => violations.push(Violation::metadata_stale(attributes::TYPE, expected, values)),
            }
        }

        for attribute in self.required_attributes(object) {
            if !object.has_attribute(&attribute) {
                violations.push(Violation::metadata_missing(attribute));
            }
        }

        if let Some(reference) = reference {
            for (attribute, expected) in [
                (attributes::SAMPLE_ID, reference.sample_id.as_deref()),
                (attributes::STUDY_ID, reference.study_id.as_deref()),
            ] {
                let Some(expected) = expected.map(str::trim).filter(|e| !e.is_empty()) else {
                    continue;
                };
                let values = object.values(attribute);
                if !values.is_empty() && values.iter().any(|v| v.trim() != expected) {
                    violations.push(Violation::metadata_stale(attribute, expected, values));
                }
            }

            if let Some(location) = reference.expected_location.as_deref()
                && path::normalize(location) != path::normalize(&object.path)
            {
                violations.push(Violation::metadata_stale(
                    attributes::LOCATION,
                    path::normalize(location),
                    vec![object.path.clone()],
                ));
            }
        }

        violations
    }
}

fn check_checksums(object: &StoredObject, reference: Option<&WarehouseRecord>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut replicas: Vec<_> = object.valid_replicas().collect();
    replicas.sort_by_key(|r| r.index);

    for replica in &replicas {
        if replica.checksum().is_none() {
            violations.push(Violation::ChecksumMissing {
                replica: replica.index,
            });
        }
    }

    if let Some(expected) = reference.and_then(WarehouseRecord::checksum) {
        for replica in &replicas {
            if let Some(actual) = replica.checksum()
                && !checksums_equal(actual, expected)
            {
                violations.push(Violation::ChecksumMismatch {
                    replica: replica.index,
                    expected: normalize_checksum(expected),
                    actual: normalize_checksum(actual),
                });
            }
        }
    }

    if let Some(checksum) = object.consistent_checksum() {
        let values = object.values(attributes::MD5);
        match values.as_slice() {
            [] => violations.push(Violation::metadata_missing(attributes::MD5)),
            [value] if checksums_equal(value, &checksum) => {}
            _ => violations.push(Violation::metadata_stale(attributes::MD5, checksum, values)),
        }
    }

    violations
}

fn check_replicas(object: &StoredObject, expected: usize) -> Vec<Violation> {
    let mut violations = Vec::new();
    let actual = object.valid_replica_count();
    if actual != expected || object.replicas.is_empty() {
        violations.push(Violation::ReplicaCountWrong { expected, actual });
    }

    if object.checksum_groups().len() > 1 {
        let mut checksums: Vec<(u32, String)> = object
            .valid_replicas()
            .filter_map(|r| r.checksum().map(|c| (r.index, normalize_checksum(c))))
            .collect();
        checksums.sort();
        violations.push(Violation::ReplicaInconsistent { checksums });
    }

    violations
}

/// True if the object's sample has withdrawn consent.
pub fn consent_withdrawn(object: &StoredObject, reference: Option<&WarehouseRecord>) -> bool {
    reference.is_some_and(|r| r.consent_withdrawn)
        || object.has_avu(
            attributes::SAMPLE_CONSENT_WITHDRAWN,
            attributes::CONSENT_WITHDRAWN_VALUE,
        )
        || object.has_avu(
            attributes::SAMPLE_CONSENT,
            attributes::LEGACY_CONSENT_ABSENT_VALUE,
        )
}

fn check_consent(object: &StoredObject, reference: Option<&WarehouseRecord>) -> Vec<Violation> {
    if !consent_withdrawn(object, reference) {
        return Vec::new();
    }

    let missing_attribute = !object.has_avu(
        attributes::SAMPLE_CONSENT_WITHDRAWN,
        attributes::CONSENT_WITHDRAWN_VALUE,
    );
    let mut unrestricted: Vec<_> = object
        .permissions
        .iter()
        .filter(|p| p.level != AccessLevel::Null && attributes::is_restricted_group(&p.owner))
        .cloned()
        .collect();
    unrestricted.sort();

    if missing_attribute || !unrestricted.is_empty() {
        vec![Violation::ConsentNotWithdrawn {
            missing_attribute,
            unrestricted,
        }]
    } else {
        Vec::new()
    }
}
