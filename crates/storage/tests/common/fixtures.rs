use rodwatch_core::AccessLevel;
use rodwatch_storage::{MemoryZone, ObjectSpec, ReplicaSpec};
use time::macros::datetime;

/// An Illumina CRAM with two matching replicas and complete metadata.
#[allow(dead_code)]
pub fn illumina_object(run: u32, tag: u32) -> ObjectSpec {
    ObjectSpec::new(format!("/seq/{run}/{run}_1#{tag}.cram"))
        .with_replica(ReplicaSpec::new(0, "data").with_checksum("8d777f385d3dfec8815d20f7496026dc"))
        .with_replica(ReplicaSpec::new(1, "data").with_checksum("8d777f385d3dfec8815d20f7496026dc"))
        .with_avu("md5", "8d777f385d3dfec8815d20f7496026dc")
        .with_avu("id_run", &run.to_string())
        .with_avu("sample_id", "S1")
        .with_avu("study_id", "1000")
        .with_access("ss_1000", AccessLevel::Read)
        .created_at(datetime!(2024-03-01 12:00:00 UTC))
}

/// A zone with two runs of three objects each and one empty collection.
#[allow(dead_code)]
pub fn sample_zone() -> MemoryZone {
    let zone = MemoryZone::new();
    for run in [100, 200] {
        for tag in 1..=3 {
            zone.put_object(illumina_object(run, tag));
        }
    }
    zone.add_collection("/seq/300");
    zone
}
