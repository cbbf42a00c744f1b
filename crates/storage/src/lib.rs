//! Storage-protocol clients for rodwatch.
//!
//! This crate provides:
//! - The `StorageClient` trait consumed by the reconciliation engine
//! - The `ClientFactory` trait used by the client pool to open connections
//! - Backends: `baton-do` subprocesses and an in-memory zone

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::baton::{BatonClient, BatonFactory, BatonOptions};
pub use backends::memory::{
    MemoryClient, MemoryFactory, MemoryZone, ObjectSpec, ReplicaSpec, ZoneSnapshot,
};
pub use error::{StorageError, StorageResult};
pub use traits::{ClientFactory, StorageClient};

use rodwatch_core::config::StorageConfig;
use std::sync::Arc;
use std::time::Duration;

/// Create a client factory from configuration.
pub fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ClientFactory>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Baton {
            program,
            args,
            resource,
            timeout_secs,
        } => Ok(Arc::new(BatonFactory::new(BatonOptions {
            program: program.clone(),
            args: args.clone(),
            resource: resource.clone(),
            timeout: Duration::from_secs(*timeout_secs),
        }))),
        StorageConfig::Memory { snapshot } => {
            let zone = match snapshot {
                Some(file) => MemoryZone::from_snapshot_file(file)?,
                None => MemoryZone::new(),
            };
            Ok(Arc::new(MemoryFactory::new(zone)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn from_config_memory_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"objects": [{{"path": "/testZone/a.txt", "replicas": [{{"index": 0, "content": "a"}}]}}]}}"#
        )
        .unwrap();

        let config = StorageConfig::Memory {
            snapshot: Some(file.path().to_path_buf()),
        };
        let factory = from_config(&config).unwrap();
        assert_eq!(factory.backend_name(), "memory");
        let client = factory.connect().await.unwrap();
        let replicas = client.get_replicas("/testZone/a.txt").await.unwrap();
        assert_eq!(replicas.len(), 1);
    }

    #[test]
    fn from_config_rejects_empty_program() {
        let config = StorageConfig::Baton {
            program: " ".to_string(),
            args: Vec::new(),
            resource: None,
            timeout_secs: 10,
        };
        match from_config(&config) {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
