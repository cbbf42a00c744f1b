//! Lazy enumeration of data object paths.
//!
//! The enumerator borrows a pooled client only for the duration of each
//! listing call. A collection that cannot be listed is reported and skipped;
//! its siblings are still visited.

use crate::error::PoolError;
use crate::pool::ClientPool;
use futures::Stream;
use rodwatch_core::{Entry, EntryKind, path};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Where a run takes its object paths from.
#[derive(Debug, Clone)]
pub enum PathSource {
    /// Walk root collections (or single data objects).
    Roots { roots: Vec<String>, recursive: bool },
    /// An explicit list of data object paths.
    Listed(Vec<String>),
}

/// One item produced by the enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enumerated {
    Object(String),
    ListingFailed { collection: String, error: String },
}

pub struct PathEnumerator {
    pool: ClientPool,
    source: PathSource,
    max_attempts: u32,
}

impl PathEnumerator {
    pub fn new(pool: ClientPool, source: PathSource) -> Self {
        Self {
            pool,
            source,
            max_attempts: 1,
        }
    }

    /// Retry transient listing errors on a fresh client up to `attempts` times.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Produce the paths as a stream. A fatal pool error ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Enumerated, PoolError>> + Send + 'static {
        let state = WalkState::new(self);
        futures::stream::unfold(state, |mut state| async move {
            state.next_item().await.map(|item| (item, state))
        })
    }
}

struct WalkState {
    pool: ClientPool,
    recursive: bool,
    max_attempts: u32,
    roots: VecDeque<String>,
    collections: VecDeque<String>,
    ready: VecDeque<Enumerated>,
    seen_objects: HashSet<String>,
    seen_collections: HashSet<String>,
    finished: bool,
}

impl WalkState {
    fn new(enumerator: PathEnumerator) -> Self {
        let mut state = Self {
            pool: enumerator.pool,
            recursive: false,
            max_attempts: enumerator.max_attempts,
            roots: VecDeque::new(),
            collections: VecDeque::new(),
            ready: VecDeque::new(),
            seen_objects: HashSet::new(),
            seen_collections: HashSet::new(),
            finished: false,
        };
        match enumerator.source {
            PathSource::Roots { roots, recursive } => {
                state.recursive = recursive;
                state.roots = roots.iter().map(|r| path::normalize(r)).collect();
            }
            PathSource::Listed(paths) => {
                for p in paths {
                    let p = p.trim();
                    if !p.is_empty() {
                        state.push_object(path::normalize(p));
                    }
                }
            }
        }
        state
    }

    fn push_object(&mut self, object: String) {
        if self.seen_objects.insert(object.clone()) {
            self.ready.push_back(Enumerated::Object(object));
        }
    }

    fn push_collection(&mut self, collection: String) {
        if self.seen_collections.insert(collection.clone()) {
            self.collections.push_back(collection);
        }
    }

    async fn next_item(&mut self) -> Option<Result<Enumerated, PoolError>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(Ok(item));
            }
            if self.finished {
                return None;
            }

            let step = if let Some(root) = self.roots.pop_front() {
                self.resolve_root(root).await
            } else if let Some(collection) = self.collections.pop_front() {
                self.list(collection).await
            } else {
                self.finished = true;
                Ok(())
            };

            if let Err(e) = step {
                self.finished = true;
                self.ready.clear();
                return Some(Err(e));
            }
        }
    }

    async fn resolve_root(&mut self, root: String) -> Result<(), PoolError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let client = match self.pool.acquire().await {
                Ok(client) => client,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.listing_failed(root, e.to_string());
                    return Ok(());
                }
            };
            let result = client.exists(&root).await;
            client.release_after(result.as_ref().err());

            match result {
                Ok(Some(EntryKind::DataObject)) => self.push_object(root),
                Ok(Some(EntryKind::Collection)) => self.push_collection(root),
                Ok(None) => {
                    self.listing_failed(root, "no such collection or data object".to_string())
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    debug!(path = %root, attempt, error = %e, "Retrying root lookup");
                    continue;
                }
                Err(e) => self.listing_failed(root, e.to_string()),
            }
            return Ok(());
        }
    }

    async fn list(&mut self, collection: String) -> Result<(), PoolError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let client = match self.pool.acquire().await {
                Ok(client) => client,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.listing_failed(collection, e.to_string());
                    return Ok(());
                }
            };
            let result = client.list_collection(&collection).await;
            client.release_after(result.as_ref().err());

            match result {
                Ok(mut entries) => {
                    entries.sort_by(|a, b| a.path().cmp(b.path()));
                    debug!(collection = %collection, entries = entries.len(), "Listed collection");
                    for entry in entries {
                        match entry {
                            Entry::DataObject(p) => self.push_object(p),
                            Entry::Collection(p) if self.recursive => self.push_collection(p),
                            Entry::Collection(_) => {}
                        }
                    }
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    debug!(collection = %collection, attempt, error = %e, "Retrying listing");
                    continue;
                }
                Err(e) => self.listing_failed(collection, e.to_string()),
            }
            return Ok(());
        }
    }

    fn listing_failed(&mut self, collection: String, error: String) {
        warn!(collection = %collection, error = %error, "Failed to list collection, skipping it");
        self.ready
            .push_back(Enumerated::ListingFailed { collection, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use futures::StreamExt;
    use rodwatch_storage::{MemoryFactory, MemoryZone, ObjectSpec};
    use std::sync::Arc;
    use std::time::Duration;

    fn pool(zone: &MemoryZone) -> ClientPool {
        ClientPool::new(
            Arc::new(MemoryFactory::new(zone.clone())),
            PoolConfig {
                size: 1,
                acquire_timeout: Duration::from_secs(1),
                max_connect_attempts: 1,
                connect_backoff: Duration::from_millis(1),
            },
        )
    }

    async fn collect(enumerator: PathEnumerator) -> Vec<Enumerated> {
        enumerator
            .into_stream()
            .map(|item| item.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_non_recursive_lists_direct_children_only() {
        let zone = MemoryZone::new();
        zone.put_object(ObjectSpec::new("/z/a/1.txt").with_content("1"));
        zone.put_object(ObjectSpec::new("/z/a/b/2.txt").with_content("2"));

        let items = collect(PathEnumerator::new(
            pool(&zone),
            PathSource::Roots {
                roots: vec!["/z/a".into()],
                recursive: false,
            },
        ))
        .await;
        assert_eq!(items, vec![Enumerated::Object("/z/a/1.txt".into())]);
    }

    #[tokio::test]
    async fn test_overlapping_roots_yield_each_object_once() {
        let zone = MemoryZone::new();
        zone.put_object(ObjectSpec::new("/z/a/1.txt").with_content("1"));
        zone.put_object(ObjectSpec::new("/z/a/b/2.txt").with_content("2"));

        let items = collect(PathEnumerator::new(
            pool(&zone),
            PathSource::Roots {
                roots: vec!["/z".into(), "/z/a/b".into(), "/z/a/1.txt".into()],
                recursive: true,
            },
        ))
        .await;
        let mut paths: Vec<_> = items
            .into_iter()
            .map(|i| match i {
                Enumerated::Object(p) => p,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["/z/a/1.txt".to_string(), "/z/a/b/2.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_root_is_reported() {
        let zone = MemoryZone::new();
        let items = collect(PathEnumerator::new(
            pool(&zone),
            PathSource::Roots {
                roots: vec!["/nowhere".into()],
                recursive: true,
            },
        ))
        .await;
        assert!(matches!(
            items.as_slice(),
            [Enumerated::ListingFailed { collection, .. }] if collection == "/nowhere"
        ));
    }

    #[tokio::test]
    async fn test_listed_paths_are_deduplicated_without_storage_calls() {
        let zone = MemoryZone::new();
        let items = collect(PathEnumerator::new(
            pool(&zone),
            PathSource::Listed(vec![
                "/z/a.txt".into(),
                "".into(),
                "/z/a.txt/".into(),
                "/z/b.txt".into(),
            ]),
        ))
        .await;
        assert_eq!(
            items,
            vec![
                Enumerated::Object("/z/a.txt".into()),
                Enumerated::Object("/z/b.txt".into()),
            ]
        );
        assert_eq!(zone.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_fatal_pool_error_ends_stream() {
        let zone = MemoryZone::new();
        zone.add_collection("/z");
        zone.fail_connections(10);

        let items: Vec<_> = PathEnumerator::new(
            pool(&zone),
            PathSource::Roots {
                roots: vec!["/z".into()],
                recursive: true,
            },
        )
        .into_stream()
        .collect()
        .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PoolError::Exhausted { .. })));
    }
}
