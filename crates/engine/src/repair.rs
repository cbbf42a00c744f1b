//! Corrective writes for violations.
//!
//! Every repair re-reads the object before writing. If the violation no
//! longer holds the repair is skipped as already correct, which makes
//! running repair twice a no-op on the second pass.

use crate::verify::Verifier;
use regex::Regex;
use rodwatch_core::config::EngineConfig;
use rodwatch_core::{
    Avu, RepairOutcome, SkipReason, StoredObject, Violation, ViolationKind, WarehouseRecord,
    attributes, checksums_equal, normalize_checksum, path,
};
use rodwatch_storage::{StorageClient, StorageResult};
use std::sync::LazyLock;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

static RUN_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)_").expect("run id pattern compiles"));

pub struct Repairer {
    verifier: Verifier,
    overwrite: bool,
    dry_run: bool,
    creator: String,
}

impl Repairer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            verifier: Verifier::new(config),
            overwrite: config.overwrite,
            dry_run: config.repair.dry_run,
            creator: config.creator.clone(),
        }
    }

    /// Repair one violation found on `object`.
    ///
    /// Storage errors are returned so the caller can decide whether to retry
    /// on a fresh client; refused repairs are reported as
    /// [`RepairOutcome::Failed`].
    pub async fn repair(
        &self,
        client: &dyn StorageClient,
        object: &StoredObject,
        reference: Option<&WarehouseRecord>,
        violation: &Violation,
    ) -> StorageResult<RepairOutcome> {
        let current = client.fetch_object(&object.path).await?;
        let still_present = self
            .verifier
            .verify(&current, reference)
            .into_iter()
            .find(|v| same_target(v, violation));

        let Some(violation) = still_present else {
            debug!(path = %object.path, kind = %violation.kind(), "Violation no longer present");
            return Ok(RepairOutcome::Skipped(SkipReason::AlreadyCorrect));
        };
        if self.dry_run {
            info!(
                path = %object.path,
                kind = %violation.kind(),
                violation = %violation,
                "Dry run, not repairing"
            );
            return Ok(RepairOutcome::Skipped(SkipReason::DryRun));
        }

        let outcome = match violation.kind() {
            ViolationKind::ChecksumMissing => {
                self.repair_missing_checksum(client, &current, &violation)
                    .await?
            }
            ViolationKind::ChecksumMismatch => {
                self.repair_checksum_mismatch(client, &current, &violation)
                    .await?
            }
            ViolationKind::ReplicaInconsistent => {
                self.repair_inconsistent(client, &current, reference)
                    .await?
            }
            ViolationKind::ReplicaCountWrong => {
                self.repair_replica_count(client, &current, reference, &violation)
                    .await?
            }
            ViolationKind::MetadataMissing => {
                self.repair_missing_metadata(client, &current, reference, &violation)
                    .await?
            }
            ViolationKind::MetadataStale => {
                self.repair_stale_metadata(client, &current, &violation)
                    .await?
            }
            ViolationKind::ConsentNotWithdrawn => {
                self.withdraw_access(client, &current, &violation).await?
            }
        };

        match &outcome {
            RepairOutcome::Failed(reason) => warn!(
                path = %object.path,
                kind = %violation.kind(),
                reason = %reason,
                "Repair refused"
            ),
            other => info!(
                path = %object.path,
                kind = %violation.kind(),
                outcome = %other,
                "Repaired"
            ),
        }
        Ok(outcome)
    }

    async fn repair_missing_checksum(
        &self,
        client: &dyn StorageClient,
        object: &StoredObject,
        violation: &Violation,
    ) -> StorageResult<RepairOutcome> {
        let Violation::ChecksumMissing { replica } = violation else {
            return Ok(mismatched_violation(violation));
        };
        let checksum = client.compute_checksum(&object.path, *replica).await?;
        client.set_checksum(&object.path, *replica, &checksum).await?;
        Ok(RepairOutcome::Succeeded)
    }

    async fn repair_checksum_mismatch(
        &self,
        client: &dyn StorageClient,
        object: &StoredObject,
        violation: &Violation,
    ) -> StorageResult<RepairOutcome> {
        let Violation::ChecksumMismatch {
            replica, expected, ..
        } = violation
        else {
            return Ok(mismatched_violation(violation));
        };
        if !self.overwrite {
            return Ok(RepairOutcome::Skipped(SkipReason::NeedsOverwrite));
        }

        let computed = client.compute_checksum(&object.path, *replica).await?;
        if checksums_equal(&computed, expected) {
            client.set_checksum(&object.path, *replica, expected).await?;
            return Ok(RepairOutcome::Succeeded);
        }

        let mut donors: Vec<u32> = object
            .valid_replicas()
            .map(|r| r.index)
            .filter(|i| i != replica)
            .collect();
        donors.sort();
        for donor in donors {
            let donor_checksum = client.compute_checksum(&object.path, donor).await?;
            if checksums_equal(&donor_checksum, expected) {
                client.replicate(&object.path, donor, Some(*replica)).await?;
                client.set_checksum(&object.path, *replica, expected).await?;
                return Ok(RepairOutcome::Succeeded);
            }
        }

        Ok(RepairOutcome::failed(format!(
            "no replica content matches the expected checksum {expected}"
        )))
    }

    async fn repair_inconsistent(
        &self,
        client: &dyn StorageClient,
        object: &StoredObject,
        reference: Option<&WarehouseRecord>,
    ) -> StorageResult<RepairOutcome> {
        let canonical = match canonical_checksum(object, reference) {
            Ok(canonical) => canonical,
            Err(reason) => return Ok(RepairOutcome::Failed(reason)),
        };
        let Some(source) = find_source(client, object, &canonical).await? else {
            return Ok(RepairOutcome::failed(format!(
                "no replica content matches the canonical checksum {canonical}"
            )));
        };

        let mut outliers: Vec<u32> = object
            .valid_replicas()
            .filter(|r| !r.checksum().is_some_and(|c| checksums_equal(c, &canonical)))
            .map(|r| r.index)
            .collect();
        outliers.sort();
        for target in outliers {
            debug!(path = %object.path, source, replica = target, "Replacing outlier replica");
            client.replicate(&object.path, source, Some(target)).await?;
            client.set_checksum(&object.path, target, &canonical).await?;
        }
        Ok(RepairOutcome::Succeeded)
    }

    async fn repair_replica_count(
        &self,
        client: &dyn StorageClient,
        object: &StoredObject,
        reference: Option<&WarehouseRecord>,
        violation: &Violation,
    ) -> StorageResult<RepairOutcome> {
        let Violation::ReplicaCountWrong { expected, actual } = violation else {
            return Ok(mismatched_violation(violation));
        };
        let (expected, actual) = (*expected, *actual);
        if actual == 0 {
            return Ok(RepairOutcome::failed("object has no valid replica to copy from"));
        }

        let canonical = match canonical_checksum(object, reference) {
            Ok(canonical) => canonical,
            Err(reason) => return Ok(RepairOutcome::Failed(reason)),
        };

        if actual < expected {
            let Some(source) = find_source(client, object, &canonical).await? else {
                return Ok(RepairOutcome::failed(format!(
                    "no replica content matches the canonical checksum {canonical}"
                )));
            };
            let mut reusable: Vec<u32> = object
                .replicas
                .iter()
                .filter(|r| !r.valid)
                .map(|r| r.index)
                .collect();
            reusable.sort();
            let mut reusable = reusable.into_iter();
            for _ in actual..expected {
                let target = reusable.next();
                client.replicate(&object.path, source, target).await?;
            }
            return Ok(RepairOutcome::Succeeded);
        }

        // Too many replicas: drop outliers first, then the highest indices.
        // At least one valid replica always remains.
        let surplus = actual - expected;
        if surplus >= actual {
            return Ok(RepairOutcome::failed(
                "refusing to invalidate the last valid replica",
            ));
        }
        let mut candidates: Vec<(bool, u32)> = object
            .valid_replicas()
            .map(|r| {
                let good = r.checksum().is_some_and(|c| checksums_equal(c, &canonical));
                (good, r.index)
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        for (_, index) in candidates.into_iter().take(surplus) {
            client.invalidate_replica(&object.path, index).await?;
        }
        Ok(RepairOutcome::Succeeded)
    }

    async fn repair_missing_metadata(
        &self,
        client: &dyn StorageClient,
        object: &StoredObject,
        reference: Option<&WarehouseRecord>,
        violation: &Violation,
    ) -> StorageResult<RepairOutcome> {
        let Some(attribute) = violation.attribute() else {
            return Ok(mismatched_violation(violation));
        };
        let value = match self.derive_value(object, reference, attribute) {
            Ok(value) => value,
            Err(reason) => return Ok(RepairOutcome::Failed(reason)),
        };
        client
            .add_metadata(&object.path, &[Avu::new(attribute, value)])
            .await?;
        Ok(RepairOutcome::Succeeded)
    }

    /// Work out the value for a missing attribute from storage state,
    /// configuration, the path or the warehouse record.
    fn derive_value(
        &self,
        object: &StoredObject,
        reference: Option<&WarehouseRecord>,
        attribute: &str,
    ) -> Result<String, String> {
        match attribute {
            attributes::MD5 => object
                .consistent_checksum()
                .ok_or_else(|| "replica checksums are missing or inconsistent".to_string()),
            attributes::DCTERMS_CREATED => {
                let created = object
                    .created
                    .ok_or_else(|| "object has no creation timestamp".to_string())?;
                created
                    .replace_nanosecond(0)
                    .map_err(|e| e.to_string())?
                    .format(&Rfc3339)
                    .map_err(|e| e.to_string())
            }
            attributes::DCTERMS_CREATOR => Ok(self.creator.clone()),
            attributes::TYPE => attributes::parse_object_type(&object.path)
                .ok_or_else(|| "object path has no type suffix".to_string()),
            attributes::SAMPLE_ID => reference
                .and_then(|r| r.sample_id.clone())
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| "no warehouse sample for this object".to_string()),
            attributes::STUDY_ID => reference
                .and_then(|r| r.study_id.clone())
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| "no warehouse study for this object".to_string()),
            attributes::ID_RUN => RUN_ID
                .captures(path::file_name(&object.path))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| "run id cannot be parsed from the file name".to_string()),
            other => Err(format!("no source for a value of '{other}'")),
        }
    }

    async fn repair_stale_metadata(
        &self,
        client: &dyn StorageClient,
        object: &StoredObject,
        violation: &Violation,
    ) -> StorageResult<RepairOutcome> {
        let Violation::MetadataStale {
            attribute, expected, ..
        } = violation
        else {
            return Ok(mismatched_violation(violation));
        };
        if attribute == attributes::LOCATION {
            return Ok(RepairOutcome::failed(format!(
                "object is not at its expected location {expected}; data is never moved"
            )));
        }
        if !self.overwrite {
            return Ok(RepairOutcome::Skipped(SkipReason::NeedsOverwrite));
        }

        let expected = if attribute == attributes::MD5 {
            normalize_checksum(expected)
        } else {
            expected.clone()
        };
        let stale: Vec<Avu> = object
            .avus(attribute)
            .filter(|a| a.value != expected)
            .cloned()
            .collect();
        if !stale.is_empty() {
            client.remove_metadata(&object.path, &stale).await?;
        }
        if !object.has_avu(attribute, &expected) {
            client
                .add_metadata(&object.path, &[Avu::new(attribute.as_str(), expected)])
                .await?;
        }
        Ok(RepairOutcome::Succeeded)
    }

    async fn withdraw_access(
        &self,
        client: &dyn StorageClient,
        object: &StoredObject,
        violation: &Violation,
    ) -> StorageResult<RepairOutcome> {
        let Violation::ConsentNotWithdrawn {
            missing_attribute,
            unrestricted,
        } = violation
        else {
            return Ok(mismatched_violation(violation));
        };

        if *missing_attribute {
            client
                .add_metadata(
                    &object.path,
                    &[Avu::new(
                        attributes::SAMPLE_CONSENT_WITHDRAWN,
                        attributes::CONSENT_WITHDRAWN_VALUE,
                    )],
                )
                .await?;
        }
        if !unrestricted.is_empty() {
            let changes: Vec<_> = unrestricted.iter().map(|p| p.revoked()).collect();
            client.set_permissions(&object.path, &changes).await?;
        }

        let revoked: Vec<String> = unrestricted.iter().map(|p| p.owner.clone()).collect();
        warn!(
            path = %object.path,
            action = "consent_withdrawn",
            revoked = ?revoked,
            "Withdrew access to data object"
        );
        Ok(RepairOutcome::Succeeded)
    }
}

/// True if two violations describe the same defect on the same target.
fn same_target(a: &Violation, b: &Violation) -> bool {
    match (a, b) {
        (Violation::ChecksumMissing { replica: x }, Violation::ChecksumMissing { replica: y })
        | (
            Violation::ChecksumMismatch { replica: x, .. },
            Violation::ChecksumMismatch { replica: y, .. },
        ) => x == y,
        (Violation::MetadataMissing { attribute: x }, Violation::MetadataMissing { attribute: y })
        | (
            Violation::MetadataStale { attribute: x, .. },
            Violation::MetadataStale { attribute: y, .. },
        ) => x == y,
        _ => a.kind() == b.kind(),
    }
}

fn mismatched_violation(violation: &Violation) -> RepairOutcome {
    RepairOutcome::failed(format!("unexpected violation shape: {violation}"))
}

/// Choose the checksum inconsistent replicas should converge on.
///
/// The majority value among valid replicas wins. A tie is broken by the
/// warehouse checksum, then by the object's `md5` attribute; an unbroken tie
/// is a conflict that needs manual intervention.
pub fn canonical_checksum(
    object: &StoredObject,
    reference: Option<&WarehouseRecord>,
) -> Result<String, String> {
    let groups = object.checksum_groups();
    let Some(top) = groups.values().map(Vec::len).max() else {
        return Err("no valid replica has a checksum".to_string());
    };
    let leaders: Vec<&String> = groups
        .iter()
        .filter(|(_, members)| members.len() == top)
        .map(|(checksum, _)| checksum)
        .collect();
    if let [only] = leaders.as_slice() {
        return Ok((*only).clone());
    }

    let tie_breakers = [
        reference.and_then(WarehouseRecord::checksum).map(normalize_checksum),
        object
            .single_value(attributes::MD5)
            .map(|v| normalize_checksum(&v)),
    ];
    for candidate in tie_breakers.into_iter().flatten() {
        if leaders.iter().any(|l| **l == candidate) {
            return Ok(candidate);
        }
    }

    let tied: Vec<&str> = leaders.iter().map(|l| l.as_str()).collect();
    Err(format!(
        "replica checksums tie between [{}]; manual intervention required",
        tied.join(", ")
    ))
}

/// Find a valid replica whose content hashes to `canonical`.
async fn find_source(
    client: &dyn StorageClient,
    object: &StoredObject,
    canonical: &str,
) -> StorageResult<Option<u32>> {
    let mut candidates: Vec<u32> = object
        .valid_replicas()
        .filter(|r| r.checksum().is_some_and(|c| checksums_equal(c, canonical)))
        .map(|r| r.index)
        .collect();
    candidates.sort();
    for index in candidates {
        let computed = client.compute_checksum(&object.path, index).await?;
        if checksums_equal(&computed, canonical) {
            return Ok(Some(index));
        }
        warn!(
            path = %object.path,
            replica = index,
            recorded = canonical,
            computed = %computed,
            "Replica content does not match its checksum"
        );
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rodwatch_core::{CheckKind, Replica, WarehouseKey};
    use rodwatch_storage::{MemoryZone, ObjectSpec};

    fn object(checksums: &[&str]) -> StoredObject {
        let mut obj = StoredObject::new("/tmp/x");
        for (i, c) in checksums.iter().enumerate() {
            obj.replicas
                .push(Replica::new(i as u32, "resc").with_checksum(*c));
        }
        obj
    }

    #[test]
    fn test_majority_wins() {
        assert_eq!(
            canonical_checksum(&object(&["abc", "xyz", "ABC"]), None),
            Ok("abc".to_string())
        );
    }

    #[test]
    fn test_tie_is_a_conflict_without_tie_breaker() {
        match canonical_checksum(&object(&["abc", "xyz"]), None) {
            Err(reason) => assert!(reason.contains("manual intervention")),
            Ok(c) => panic!("expected conflict, got {c}"),
        }
    }

    #[test]
    fn test_tie_broken_by_warehouse_then_md5() {
        let obj = object(&["abc", "xyz"]);
        let reference =
            WarehouseRecord::new(WarehouseKey::Sample("S1".into())).with_checksum("XYZ");
        assert_eq!(canonical_checksum(&obj, Some(&reference)), Ok("xyz".to_string()));

        let mut obj = obj;
        obj.metadata.push(Avu::new("md5", "abc"));
        assert_eq!(canonical_checksum(&obj, None), Ok("abc".to_string()));
    }

    #[tokio::test]
    async fn test_surplus_repair_never_invalidates_every_replica() {
        let zone = MemoryZone::new();
        zone.put_object(
            ObjectSpec::new("/z/two.txt")
                .with_content("two")
                .with_content("two"),
        );
        let client = zone.connect().unwrap();
        let object = client.fetch_object("/z/two.txt").await.unwrap();
        let config = EngineConfig {
            expected_replicas: 0,
            checks: vec![CheckKind::Replicas],
            ..EngineConfig::default()
        };
        let violation = Violation::ReplicaCountWrong {
            expected: 0,
            actual: 2,
        };

        let outcome = Repairer::new(&config)
            .repair(&client, &object, None, &violation)
            .await
            .unwrap();
        match outcome {
            RepairOutcome::Failed(reason) => assert!(reason.contains("last valid replica")),
            other => panic!("expected refusal, got {other:?}"),
        }
        assert_eq!(zone.write_count(), 0);
        assert!(zone.replicas("/z/two.txt").unwrap().iter().all(|r| r.valid));
    }

    #[test]
    fn test_same_target_matching() {
        assert!(same_target(
            &Violation::metadata_missing("md5"),
            &Violation::metadata_missing("md5")
        ));
        assert!(!same_target(
            &Violation::metadata_missing("md5"),
            &Violation::metadata_missing("type")
        ));
        assert!(same_target(
            &Violation::ReplicaCountWrong { expected: 2, actual: 1 },
            &Violation::ReplicaCountWrong { expected: 2, actual: 3 }
        ));
    }

    #[test]
    fn test_derive_run_id_and_created() {
        let repairer = Repairer::new(&EngineConfig::default());
        let mut obj = StoredObject::new("/seq/12345/12345_1#1.cram");
        obj.created = Some(time::macros::datetime!(2024-03-01 12:30:45.123 UTC));
        assert_eq!(repairer.derive_value(&obj, None, "id_run"), Ok("12345".to_string()));
        assert_eq!(
            repairer.derive_value(&obj, None, "dcterms:created"),
            Ok("2024-03-01T12:30:45Z".to_string())
        );
        assert_eq!(repairer.derive_value(&obj, None, "type"), Ok("cram".to_string()));
        assert!(repairer.derive_value(&obj, None, "sample_id").is_err());
    }
}
