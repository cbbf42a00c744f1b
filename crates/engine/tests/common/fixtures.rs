use rodwatch_core::config::EngineConfig;
use rodwatch_core::{AccessLevel, attributes};
use rodwatch_engine::Engine;
use rodwatch_storage::{MemoryFactory, MemoryZone, ObjectSpec, ReplicaSpec};
use rodwatch_warehouse::{FixedWarehouse, WarehouseStore};
use std::sync::Arc;
use time::macros::datetime;

pub const MD5_A: &str = "0cc175b9c0f1b6a831c399e269772661";
pub const MD5_B: &str = "92eb5ffee6ae2fec3ad71c777531578f";
pub const MD5_DATA: &str = "8d777f385d3dfec8815d20f7496026dc";

/// Small pool, short timeouts, all checks.
#[allow(dead_code)]
pub fn test_config() -> EngineConfig {
    EngineConfig {
        num_threads: 4,
        num_clients: 2,
        acquire_timeout_secs: 5,
        max_connect_attempts: 2,
        max_object_attempts: 3,
        ..EngineConfig::default()
    }
}

/// A data object with two matching replicas of `content` and every
/// attribute a generic object needs.
#[allow(dead_code)]
pub fn complete_object(path: &str, content: &str) -> ObjectSpec {
    let mut object = ObjectSpec::new(path)
        .with_content(content)
        .with_content(content)
        .created_at(datetime!(2024-03-01 12:00:00 UTC))
        .with_avu(attributes::DCTERMS_CREATED, "2024-03-01T12:00:00Z")
        .with_avu(attributes::DCTERMS_CREATOR, attributes::DEFAULT_CREATOR);
    if let Some(checksum) = object.replicas[0].checksum.clone() {
        object = object.with_avu(attributes::MD5, &checksum);
    }
    if attributes::requires_type_metadata(path)
        && let Some(file_type) = attributes::parse_object_type(path)
    {
        object = object.with_avu(attributes::TYPE, &file_type);
    }
    object
}

/// An Illumina CRAM keyed by `id_product`, with complete metadata and two
/// replicas holding "data".
#[allow(dead_code)]
pub fn illumina_product(run: u32, tag: u32, product: &str) -> ObjectSpec {
    ObjectSpec::new(format!("/seq/illumina/runs/{run}/{run}_1#{tag}.cram"))
        .with_replica(ReplicaSpec::new(0, "data").with_checksum(MD5_DATA))
        .with_replica(ReplicaSpec::new(1, "data").with_checksum(MD5_DATA))
        .created_at(datetime!(2024-03-01 12:00:00 UTC))
        .with_avu(attributes::MD5, MD5_DATA)
        .with_avu(attributes::TYPE, "cram")
        .with_avu(attributes::DCTERMS_CREATED, "2024-03-01T12:00:00Z")
        .with_avu(attributes::DCTERMS_CREATOR, attributes::DEFAULT_CREATOR)
        .with_avu(attributes::ID_RUN, &run.to_string())
        .with_avu(attributes::ID_PRODUCT, product)
        .with_avu(attributes::SAMPLE_ID, "S1")
        .with_avu(attributes::STUDY_ID, "1000")
        .with_access("ss_1000", AccessLevel::Read)
}

#[allow(dead_code)]
pub fn engine(
    zone: &MemoryZone,
    warehouse: Option<Arc<FixedWarehouse>>,
    config: EngineConfig,
) -> Engine {
    let warehouse = warehouse.map(|w| w as Arc<dyn WarehouseStore>);
    Engine::new(config, Arc::new(MemoryFactory::new(zone.clone())), warehouse)
        .expect("valid test configuration")
}
