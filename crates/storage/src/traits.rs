//! Storage client trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use rodwatch_core::{AccessControl, Avu, Entry, EntryKind, Replica, StoredObject};
use time::OffsetDateTime;

/// A connection to the storage system.
///
/// Clients are expensive to create and are not shared between concurrent
/// tasks; the engine hands them out through a pool.
#[async_trait]
pub trait StorageClient: Send + Sync + 'static {
    /// List the direct children of a collection.
    async fn list_collection(&self, path: &str) -> StorageResult<Vec<Entry>>;

    /// Report whether a path is a collection, a data object, or absent.
    async fn exists(&self, path: &str) -> StorageResult<Option<EntryKind>>;

    async fn get_replicas(&self, path: &str) -> StorageResult<Vec<Replica>>;

    async fn get_metadata(&self, path: &str) -> StorageResult<Vec<Avu>>;

    /// Add AVUs. Adding an AVU that is already present is an error.
    async fn add_metadata(&self, path: &str, avus: &[Avu]) -> StorageResult<()>;

    async fn remove_metadata(&self, path: &str, avus: &[Avu]) -> StorageResult<()>;

    /// Calculate the checksum of a replica from its content.
    async fn compute_checksum(&self, path: &str, replica: u32) -> StorageResult<String>;

    /// Record a checksum on a replica.
    async fn set_checksum(&self, path: &str, replica: u32, checksum: &str) -> StorageResult<()>;

    /// Mark a replica as no longer valid.
    async fn invalidate_replica(&self, path: &str, replica: u32) -> StorageResult<()>;

    /// Copy `source` over replica `target`, or to a new replica when `target`
    /// is `None`.
    async fn replicate(&self, path: &str, source: u32, target: Option<u32>) -> StorageResult<()>;

    async fn get_permissions(&self, path: &str) -> StorageResult<Vec<AccessControl>>;

    /// Apply access changes. A change with level `null` removes the grant.
    async fn set_permissions(&self, path: &str, changes: &[AccessControl]) -> StorageResult<()>;

    /// Creation time of a data object.
    async fn timestamp(&self, path: &str) -> StorageResult<Option<OffsetDateTime>>;

    /// Static name of the backend for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify the connection is usable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Fetch a complete snapshot of a data object.
    async fn fetch_object(&self, path: &str) -> StorageResult<StoredObject> {
        match self.exists(path).await? {
            Some(EntryKind::DataObject) => {}
            Some(EntryKind::Collection) => {
                return Err(StorageError::NotFound(format!(
                    "{path} is a collection, not a data object"
                )));
            }
            None => return Err(StorageError::NotFound(path.to_string())),
        }

        Ok(StoredObject {
            path: path.to_string(),
            replicas: self.get_replicas(path).await?,
            metadata: self.get_metadata(path).await?,
            permissions: self.get_permissions(path).await?,
            created: self.timestamp(path).await?,
        })
    }
}

/// Creates new storage clients.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    async fn connect(&self) -> StorageResult<Box<dyn StorageClient>>;

    fn backend_name(&self) -> &'static str;
}
