//! In-process storage zone.
//!
//! `MemoryZone` holds collections and data objects in memory and hands out
//! `MemoryClient` connections to it. Checksums are MD5 hex digests of replica
//! content. The zone supports fault injection (failing listings, failing
//! connections, transient call failures, added latency) and records client
//! usage so tests can assert pool behaviour.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ClientFactory, StorageClient};
use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use rodwatch_core::{AccessControl, AccessLevel, Avu, Entry, EntryKind, Replica, path};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

/// Error code returned when adding an AVU that already exists.
pub const DUPLICATE_AVU_CODE: i64 = -809000;
/// Error code returned when refusing to invalidate the last valid replica.
pub const LAST_REPLICA_CODE: i64 = -1803000;

#[derive(Clone, Debug)]
struct MemoryReplica {
    index: u32,
    location: String,
    content: Bytes,
    checksum: Option<String>,
    valid: bool,
}

#[derive(Clone, Debug, Default)]
struct MemoryObject {
    replicas: Vec<MemoryReplica>,
    metadata: Vec<Avu>,
    permissions: Vec<AccessControl>,
    created: Option<OffsetDateTime>,
}

#[derive(Debug, Default)]
struct ZoneState {
    collections: BTreeSet<String>,
    objects: BTreeMap<String, MemoryObject>,
    failing_listings: HashSet<String>,
    failing_fetches: HashSet<String>,
    connect_failures: u64,
    transient_failures: u64,
}

impl ZoneState {
    fn add_collection(&mut self, collection: &str) {
        let mut current = path::normalize(collection);
        while current != "/" && !current.is_empty() {
            if !self.collections.insert(current.clone()) {
                break;
            }
            current = path::split(&current).0;
        }
    }

    fn object(&self, obj_path: &str) -> StorageResult<&MemoryObject> {
        self.objects
            .get(obj_path)
            .ok_or_else(|| StorageError::NotFound(obj_path.to_string()))
    }

    fn object_mut(&mut self, obj_path: &str) -> StorageResult<&mut MemoryObject> {
        self.objects
            .get_mut(obj_path)
            .ok_or_else(|| StorageError::NotFound(obj_path.to_string()))
    }
}

#[derive(Debug, Default)]
struct ZoneCounters {
    connects: AtomicU64,
    writes: AtomicU64,
    live_clients: AtomicUsize,
    peak_live_clients: AtomicUsize,
    shared_use: AtomicU64,
}

#[derive(Debug, Default)]
struct ZoneInner {
    state: Mutex<ZoneState>,
    counters: ZoneCounters,
    latency: Mutex<Option<Duration>>,
}

/// An in-memory storage zone shared by all of its clients.
#[derive(Clone, Debug, Default)]
pub struct MemoryZone {
    inner: Arc<ZoneInner>,
}

impl MemoryZone {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ZoneState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create a collection and its ancestors.
    pub fn add_collection(&self, collection: &str) -> &Self {
        self.state().add_collection(collection);
        self
    }

    /// Insert or replace a data object.
    pub fn put_object(&self, entry: ObjectSpec) -> &Self {
        let obj_path = path::normalize(&entry.path);
        let mut state = self.state();
        state.add_collection(&path::split(&obj_path).0);
        let object = MemoryObject {
            replicas: entry
                .replicas
                .into_iter()
                .map(|r| MemoryReplica {
                    index: r.index,
                    location: r.location,
                    content: Bytes::from(r.content.into_bytes()),
                    checksum: r.checksum,
                    valid: r.valid,
                })
                .collect(),
            metadata: entry.metadata,
            permissions: entry.permissions,
            created: entry.created,
        };
        state.objects.insert(obj_path, object);
        self
    }

    /// Make listings of a collection fail with a transport error.
    pub fn fail_listing(&self, collection: &str) -> &Self {
        self.state()
            .failing_listings
            .insert(path::normalize(collection));
        self
    }

    /// Make fetches of a data object's replicas fail with a transport error.
    pub fn fail_fetch(&self, obj_path: &str) -> &Self {
        self.state().failing_fetches.insert(path::normalize(obj_path));
        self
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_connections(&self, n: u64) -> &Self {
        self.state().connect_failures = n;
        self
    }

    /// Fail the next `n` client calls with a transport error.
    pub fn fail_next_calls(&self, n: u64) -> &Self {
        self.state().transient_failures = n;
        self
    }

    /// Delay every client call.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        if let Ok(mut guard) = self.inner.latency.lock() {
            *guard = Some(latency);
        }
        self
    }

    pub fn object_paths(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    pub fn metadata(&self, obj_path: &str) -> Option<Vec<Avu>> {
        self.state().objects.get(obj_path).map(|o| o.metadata.clone())
    }

    pub fn replicas(&self, obj_path: &str) -> Option<Vec<Replica>> {
        self.state()
            .objects
            .get(obj_path)
            .map(|o| o.replicas.iter().map(to_replica).collect())
    }

    pub fn permissions(&self, obj_path: &str) -> Option<Vec<AccessControl>> {
        self.state()
            .objects
            .get(obj_path)
            .map(|o| o.permissions.clone())
    }

    /// Number of successful connections made.
    pub fn connect_count(&self) -> u64 {
        self.inner.counters.connects.load(Ordering::SeqCst)
    }

    /// Number of mutating calls that changed state.
    pub fn write_count(&self) -> u64 {
        self.inner.counters.writes.load(Ordering::SeqCst)
    }

    /// Clients currently alive, idle or in use.
    pub fn live_clients(&self) -> usize {
        self.inner.counters.live_clients.load(Ordering::SeqCst)
    }

    /// Highest number of clients alive at once.
    pub fn peak_live_clients(&self) -> usize {
        self.inner.counters.peak_live_clients.load(Ordering::SeqCst)
    }

    /// Number of calls made on a client that was already serving another call.
    pub fn shared_use_count(&self) -> u64 {
        self.inner.counters.shared_use.load(Ordering::SeqCst)
    }

    /// Open a new client on this zone, honouring injected connection failures.
    pub fn connect(&self) -> StorageResult<MemoryClient> {
        {
            let mut state = self.state();
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(StorageError::Transport(
                    "connection refused (injected)".to_string(),
                ));
            }
        }
        let counters = &self.inner.counters;
        counters.connects.fetch_add(1, Ordering::SeqCst);
        let live = counters.live_clients.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_live_clients.fetch_max(live, Ordering::SeqCst);
        Ok(MemoryClient {
            zone: self.clone(),
            busy: AtomicBool::new(false),
        })
    }

    /// Load a zone from a JSON snapshot file.
    pub fn from_snapshot_file(file: &Path) -> StorageResult<Self> {
        let data = std::fs::read(file)?;
        let snapshot: ZoneSnapshot = serde_json::from_slice(&data).map_err(|e| {
            StorageError::Config(format!("invalid zone snapshot {}: {e}", file.display()))
        })?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn from_snapshot(snapshot: ZoneSnapshot) -> Self {
        let zone = Self::new();
        for collection in &snapshot.collections {
            zone.add_collection(collection);
        }
        for object in snapshot.objects {
            zone.put_object(object);
        }
        zone
    }
}

fn to_replica(r: &MemoryReplica) -> Replica {
    Replica {
        index: r.index,
        location: r.location.clone(),
        checksum: r.checksum.clone(),
        valid: r.valid,
    }
}

fn md5_hex(content: &[u8]) -> String {
    hex::encode(Md5::digest(content))
}

/// Serializable description of a zone.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
}

/// Description of a data object to place in a zone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub path: String,
    #[serde(default)]
    pub replicas: Vec<ReplicaSpec>,
    #[serde(default)]
    pub metadata: Vec<Avu>,
    #[serde(default)]
    pub permissions: Vec<AccessControl>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created: Option<OffsetDateTime>,
}

impl ObjectSpec {
    pub fn new(obj_path: impl Into<String>) -> Self {
        Self {
            path: obj_path.into(),
            replicas: Vec::new(),
            metadata: Vec::new(),
            permissions: Vec::new(),
            created: None,
        }
    }

    /// Add a valid replica whose recorded checksum is the MD5 of `content`.
    pub fn with_content(mut self, content: &str) -> Self {
        let index = self.replicas.len() as u32;
        let mut replica = ReplicaSpec::new(index, content);
        replica.checksum = Some(md5_hex(content.as_bytes()));
        self.replicas.push(replica);
        self
    }

    pub fn with_replica(mut self, replica: ReplicaSpec) -> Self {
        self.replicas.push(replica);
        self
    }

    pub fn with_avu(mut self, attribute: &str, value: &str) -> Self {
        self.metadata.push(Avu::new(attribute, value));
        self
    }

    pub fn with_access(mut self, owner: &str, level: AccessLevel) -> Self {
        self.permissions.push(AccessControl::new(owner, level));
        self
    }

    pub fn created_at(mut self, created: OffsetDateTime) -> Self {
        self.created = Some(created);
        self
    }
}

/// Description of one replica of an [`ObjectSpec`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaSpec {
    pub index: u32,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub content: String,
    /// Recorded checksum. May disagree with the content.
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_location() -> String {
    "memoryResc".to_string()
}

fn default_valid() -> bool {
    true
}

impl ReplicaSpec {
    pub fn new(index: u32, content: &str) -> Self {
        Self {
            index,
            location: format!("memoryResc{index}"),
            content: content.to_string(),
            checksum: None,
            valid: true,
        }
    }

    pub fn with_checksum(mut self, checksum: &str) -> Self {
        self.checksum = Some(checksum.to_string());
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }
}

/// A connection to a [`MemoryZone`].
pub struct MemoryClient {
    zone: MemoryZone,
    busy: AtomicBool,
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.zone
            .inner
            .counters
            .live_clients
            .fetch_sub(1, Ordering::SeqCst);
    }
}

/// Marks a client busy for the duration of one call.
struct CallGuard<'a>(&'a AtomicBool);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MemoryClient {
    async fn begin(&self) -> StorageResult<CallGuard<'_>> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.zone
                .inner
                .counters
                .shared_use
                .fetch_add(1, Ordering::SeqCst);
        }
        let guard = CallGuard(&self.busy);

        let latency = self.zone.inner.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.zone.state();
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(StorageError::Transport(
                "connection reset (injected)".to_string(),
            ));
        }
        Ok(guard)
    }

    fn wrote(&self) {
        self.zone.inner.counters.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageClient for MemoryClient {
    async fn list_collection(&self, collection: &str) -> StorageResult<Vec<Entry>> {
        let _call = self.begin().await?;
        let collection = path::normalize(collection);
        let state = self.zone.state();
        if state.failing_listings.contains(&collection) {
            return Err(StorageError::Transport(format!(
                "listing {collection} failed (injected)"
            )));
        }
        if !state.collections.contains(&collection) {
            return Err(StorageError::NotFound(collection));
        }

        let mut entries: Vec<Entry> = state
            .collections
            .iter()
            .filter(|c| *c != &collection && path::split(c).0 == collection)
            .map(|c| Entry::Collection(c.clone()))
            .collect();
        entries.extend(
            state
                .objects
                .keys()
                .filter(|o| path::split(o).0 == collection)
                .map(|o| Entry::DataObject(o.clone())),
        );
        Ok(entries)
    }

    async fn exists(&self, item: &str) -> StorageResult<Option<EntryKind>> {
        let _call = self.begin().await?;
        let item = path::normalize(item);
        let state = self.zone.state();
        if state.objects.contains_key(&item) {
            Ok(Some(EntryKind::DataObject))
        } else if state.collections.contains(&item) {
            Ok(Some(EntryKind::Collection))
        } else {
            Ok(None)
        }
    }

    async fn get_replicas(&self, obj_path: &str) -> StorageResult<Vec<Replica>> {
        let _call = self.begin().await?;
        let state = self.zone.state();
        if state.failing_fetches.contains(obj_path) {
            return Err(StorageError::Transport(format!(
                "fetching {obj_path} failed (injected)"
            )));
        }
        Ok(state.object(obj_path)?.replicas.iter().map(to_replica).collect())
    }

    async fn get_metadata(&self, obj_path: &str) -> StorageResult<Vec<Avu>> {
        let _call = self.begin().await?;
        Ok(self.zone.state().object(obj_path)?.metadata.clone())
    }

    async fn add_metadata(&self, obj_path: &str, avus: &[Avu]) -> StorageResult<()> {
        let _call = self.begin().await?;
        let mut state = self.zone.state();
        let object = state.object_mut(obj_path)?;
        if let Some(dup) = avus.iter().find(|a| object.metadata.contains(a)) {
            return Err(StorageError::protocol(
                DUPLICATE_AVU_CODE,
                format!("AVU {dup} already present on {obj_path}"),
            ));
        }
        object.metadata.extend(avus.iter().cloned());
        drop(state);
        self.wrote();
        Ok(())
    }

    async fn remove_metadata(&self, obj_path: &str, avus: &[Avu]) -> StorageResult<()> {
        let _call = self.begin().await?;
        let mut state = self.zone.state();
        let object = state.object_mut(obj_path)?;
        let before = object.metadata.len();
        object.metadata.retain(|a| !avus.contains(a));
        let changed = object.metadata.len() != before;
        drop(state);
        if changed {
            self.wrote();
        }
        Ok(())
    }

    async fn compute_checksum(&self, obj_path: &str, replica: u32) -> StorageResult<String> {
        let _call = self.begin().await?;
        let state = self.zone.state();
        let object = state.object(obj_path)?;
        let replica = object
            .replicas
            .iter()
            .find(|r| r.index == replica)
            .ok_or_else(|| StorageError::NotFound(format!("{obj_path} replica {replica}")))?;
        Ok(md5_hex(&replica.content))
    }

    async fn set_checksum(
        &self,
        obj_path: &str,
        replica: u32,
        checksum: &str,
    ) -> StorageResult<()> {
        let _call = self.begin().await?;
        let mut state = self.zone.state();
        let object = state.object_mut(obj_path)?;
        let target = object
            .replicas
            .iter_mut()
            .find(|r| r.index == replica)
            .ok_or_else(|| StorageError::NotFound(format!("{obj_path} replica {replica}")))?;
        target.checksum = Some(checksum.to_string());
        drop(state);
        self.wrote();
        Ok(())
    }

    async fn invalidate_replica(&self, obj_path: &str, replica: u32) -> StorageResult<()> {
        let _call = self.begin().await?;
        let mut state = self.zone.state();
        let object = state.object_mut(obj_path)?;
        let valid = object.replicas.iter().filter(|r| r.valid).count();
        let target = object
            .replicas
            .iter_mut()
            .find(|r| r.index == replica)
            .ok_or_else(|| StorageError::NotFound(format!("{obj_path} replica {replica}")))?;
        if !target.valid {
            return Ok(());
        }
        if valid <= 1 {
            return Err(StorageError::protocol(
                LAST_REPLICA_CODE,
                format!("refusing to invalidate the last valid replica of {obj_path}"),
            ));
        }
        target.valid = false;
        drop(state);
        self.wrote();
        Ok(())
    }

    async fn replicate(
        &self,
        obj_path: &str,
        source: u32,
        target: Option<u32>,
    ) -> StorageResult<()> {
        let _call = self.begin().await?;
        let mut state = self.zone.state();
        let object = state.object_mut(obj_path)?;
        let src = object
            .replicas
            .iter()
            .find(|r| r.index == source && r.valid)
            .cloned()
            .ok_or_else(|| {
                StorageError::protocol(
                    -1,
                    format!("{obj_path} has no valid replica {source} to copy from"),
                )
            })?;

        let index = target.unwrap_or_else(|| {
            object
                .replicas
                .iter()
                .map(|r| r.index + 1)
                .max()
                .unwrap_or(0)
        });
        match object.replicas.iter_mut().find(|r| r.index == index) {
            Some(existing) => {
                existing.content = src.content.clone();
                existing.checksum = src.checksum.clone();
                existing.valid = true;
            }
            None => object.replicas.push(MemoryReplica {
                index,
                location: format!("memoryResc{index}"),
                content: src.content.clone(),
                checksum: src.checksum.clone(),
                valid: true,
            }),
        }
        drop(state);
        debug!(path = %obj_path, source, replica = index, "Replicated");
        self.wrote();
        Ok(())
    }

    async fn get_permissions(&self, obj_path: &str) -> StorageResult<Vec<AccessControl>> {
        let _call = self.begin().await?;
        Ok(self.zone.state().object(obj_path)?.permissions.clone())
    }

    async fn set_permissions(
        &self,
        obj_path: &str,
        changes: &[AccessControl],
    ) -> StorageResult<()> {
        let _call = self.begin().await?;
        let mut state = self.zone.state();
        let object = state.object_mut(obj_path)?;
        for change in changes {
            object.permissions.retain(|p| !p.same_owner(change));
            if change.level != AccessLevel::Null {
                object.permissions.push(change.clone());
            }
        }
        drop(state);
        self.wrote();
        Ok(())
    }

    async fn timestamp(&self, obj_path: &str) -> StorageResult<Option<OffsetDateTime>> {
        let _call = self.begin().await?;
        Ok(self.zone.state().object(obj_path)?.created)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Client factory for a [`MemoryZone`].
#[derive(Clone, Debug)]
pub struct MemoryFactory {
    zone: MemoryZone,
}

impl MemoryFactory {
    pub fn new(zone: MemoryZone) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> &MemoryZone {
        &self.zone
    }
}

#[async_trait]
impl ClientFactory for MemoryFactory {
    async fn connect(&self) -> StorageResult<Box<dyn StorageClient>> {
        Ok(Box::new(self.zone.connect()?))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> MemoryZone {
        let zone = MemoryZone::new();
        zone.put_object(
            ObjectSpec::new("/testZone/home/a.txt")
                .with_content("hello")
                .with_content("hello")
                .with_avu("md5", "5d41402abc4b2a76b9719d911017c592"),
        );
        zone.add_collection("/testZone/home/empty");
        zone
    }

    #[tokio::test]
    async fn test_listing_returns_direct_children() {
        let zone = zone();
        let client = zone.connect().unwrap();
        let entries = client.list_collection("/testZone/home").await.unwrap();
        assert_eq!(
            entries,
            vec![
                Entry::Collection("/testZone/home/empty".into()),
                Entry::DataObject("/testZone/home/a.txt".into()),
            ]
        );
        assert_eq!(
            client.exists("/testZone").await.unwrap(),
            Some(EntryKind::Collection)
        );
        assert_eq!(client.exists("/nowhere").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_checksums_are_md5_of_content() {
        let zone = zone();
        let client = zone.connect().unwrap();
        let checksum = client
            .compute_checksum("/testZone/home/a.txt", 1)
            .await
            .unwrap();
        assert_eq!(checksum, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(zone.write_count(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_refuses_last_valid_replica() {
        let zone = zone();
        let client = zone.connect().unwrap();
        client
            .invalidate_replica("/testZone/home/a.txt", 0)
            .await
            .unwrap();
        match client.invalidate_replica("/testZone/home/a.txt", 1).await {
            Err(StorageError::Protocol { code, .. }) => assert_eq!(code, LAST_REPLICA_CODE),
            other => panic!("expected protocol error, got {other:?}"),
        }
        let replicas = zone.replicas("/testZone/home/a.txt").unwrap();
        assert_eq!(replicas.iter().filter(|r| r.valid).count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_avu_is_rejected() {
        let zone = zone();
        let client = zone.connect().unwrap();
        let avu = Avu::new("md5", "5d41402abc4b2a76b9719d911017c592");
        match client.add_metadata("/testZone/home/a.txt", &[avu]).await {
            Err(StorageError::Protocol { code, .. }) => assert_eq!(code, DUPLICATE_AVU_CODE),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let zone = zone();
        zone.fail_connections(1).fail_listing("/testZone/home/empty");
        assert!(zone.connect().is_err());
        let client = zone.connect().unwrap();
        let err = client
            .list_collection("/testZone/home/empty")
            .await
            .unwrap_err();
        assert!(err.is_transient());

        zone.fail_next_calls(1);
        assert!(client.get_metadata("/testZone/home/a.txt").await.is_err());
        assert!(client.get_metadata("/testZone/home/a.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_live_client_accounting() {
        let zone = zone();
        let a = zone.connect().unwrap();
        let b = zone.connect().unwrap();
        assert_eq!(zone.live_clients(), 2);
        drop(a);
        assert_eq!(zone.live_clients(), 1);
        drop(b);
        assert_eq!(zone.live_clients(), 0);
        assert_eq!(zone.peak_live_clients(), 2);
    }

    #[test]
    fn test_snapshot_deserializes() {
        let json = r#"{
            "collections": ["/testZone/empty"],
            "objects": [{
                "path": "/testZone/a.txt",
                "replicas": [{"index": 0, "content": "x", "checksum": "abc"}],
                "metadata": [{"attribute": "md5", "value": "abc"}],
                "created": "2024-01-02T03:04:05Z"
            }]
        }"#;
        let snapshot: ZoneSnapshot = serde_json::from_str(json).unwrap();
        let zone = MemoryZone::from_snapshot(snapshot);
        assert_eq!(zone.object_count(), 1);
        let replicas = zone.replicas("/testZone/a.txt").unwrap();
        assert!(replicas[0].valid);
        assert_eq!(replicas[0].checksum.as_deref(), Some("abc"));
    }
}
