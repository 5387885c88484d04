//! Versioned desired/observed state storage.
//!
//! [`StateStore`] is the only interface controllers use to read and write
//! records. It is deliberately small (Get/List/Watch/Update with a version
//! check) so any versioned key-value store with subscribe semantics can back
//! it. [`MemoryStore`] is the in-process implementation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

const WATCH_CAPACITY: usize = 1024;
const CONFLICT_RETRIES: usize = 5;

/// A record together with the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub key: String,
    pub version: u64,
    pub value: T,
}

/// Change notification delivered to watchers.
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Put(Versioned<T>),
    Deleted(Versioned<T>),
}

impl<T> WatchEvent<T> {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put(r) | WatchEvent::Deleted(r) => &r.key,
        }
    }

    pub fn record(&self) -> &Versioned<T> {
        match self {
            WatchEvent::Put(r) | WatchEvent::Deleted(r) => r,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, WatchEvent::Deleted(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: String },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: String },

    #[error("{kind} '{key}' version conflict: expected {expected}, found {found}")]
    VersionConflict {
        kind: String,
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("{kind} store unavailable: {message}")]
    Unavailable { kind: String, message: String },
}

impl StoreError {
    pub fn not_found(kind: &str, key: &str) -> Self {
        StoreError::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyExists { .. } | StoreError::VersionConflict { .. }
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Get/List/Watch/Update-with-version-check over records of one kind.
#[async_trait]
pub trait StateStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Record kind served by this store (used in errors and constraints).
    fn kind(&self) -> &str;

    async fn get(&self, key: &str) -> StoreResult<Option<Versioned<T>>>;

    async fn list(&self) -> StoreResult<Vec<Versioned<T>>>;

    /// Creates a record. Fails with `AlreadyExists` if the key is taken.
    async fn create(&self, key: &str, value: T) -> StoreResult<Versioned<T>>;

    /// Replaces a record if it is still at `expected_version`.
    async fn update(&self, key: &str, value: T, expected_version: u64)
        -> StoreResult<Versioned<T>>;

    /// Removes a record, returning the last version if it existed.
    async fn delete(&self, key: &str) -> StoreResult<Option<Versioned<T>>>;

    /// Subscribes to changes made after this call.
    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>>;
}

/// Read-modify-write with optimistic concurrency.
///
/// `f` is re-applied to the newest version on a version conflict. When `f`
/// leaves the value unchanged no write is issued, so watchers are not woken
/// by no-op updates.
pub async fn mutate<T, S, F>(store: &S, key: &str, mut f: F) -> StoreResult<Versioned<T>>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    S: StateStore<T> + ?Sized,
    F: FnMut(&mut T) + Send,
{
    let mut last_err = None;
    for _ in 0..CONFLICT_RETRIES {
        let current = store
            .get(key)
            .await?
            .ok_or_else(|| StoreError::not_found(store.kind(), key))?;

        let mut next = current.value.clone();
        f(&mut next);
        if next == current.value {
            return Ok(current);
        }

        match store.update(key, next, current.version).await {
            Err(e @ StoreError::VersionConflict { .. }) => {
                log::debug!("{} '{}' changed underneath update, retrying", store.kind(), key);
                last_err = Some(e);
            }
            other => return other,
        }
    }
    Err(last_err.unwrap_or_else(|| StoreError::not_found(store.kind(), key)))
}

/// Creates a record unless one already exists.
///
/// Returns the stored record and whether this call created it. A duplicate
/// create is not an error.
pub async fn create_if_absent<T, S>(
    store: &S,
    key: &str,
    value: T,
) -> StoreResult<(Versioned<T>, bool)>
where
    T: Clone + Send + Sync + 'static,
    S: StateStore<T> + ?Sized,
{
    match store.create(key, value).await {
        Ok(created) => Ok((created, true)),
        Err(StoreError::AlreadyExists { .. }) => {
            let existing = store
                .get(key)
                .await?
                .ok_or_else(|| StoreError::not_found(store.kind(), key))?;
            Ok((existing, false))
        }
        Err(e) => Err(e),
    }
}

/// In-process [`StateStore`].
pub struct MemoryStore<T> {
    kind: String,
    records: RwLock<BTreeMap<String, Versioned<T>>>,
    revision: AtomicU64,
    events: broadcast::Sender<WatchEvent<T>>,
}

impl<T> MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(kind: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            kind: kind.into(),
            records: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            events,
        }
    }

    fn next_version(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish(&self, event: WatchEvent<T>) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(event);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl<T> StateStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Versioned<T>>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Versioned<T>>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn create(&self, key: &str, value: T) -> StoreResult<Versioned<T>> {
        let mut records = self.records.write().await;
        if records.contains_key(key) {
            return Err(StoreError::AlreadyExists {
                kind: self.kind.clone(),
                key: key.to_string(),
            });
        }
        let record = Versioned {
            key: key.to_string(),
            version: self.next_version(),
            value,
        };
        records.insert(key.to_string(), record.clone());
        drop(records);

        self.publish(WatchEvent::Put(record.clone()));
        Ok(record)
    }

    async fn update(
        &self,
        key: &str,
        value: T,
        expected_version: u64,
    ) -> StoreResult<Versioned<T>> {
        let mut records = self.records.write().await;
        let current = records
            .get(key)
            .ok_or_else(|| StoreError::not_found(&self.kind, key))?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                kind: self.kind.clone(),
                key: key.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }
        let record = Versioned {
            key: key.to_string(),
            version: self.next_version(),
            value,
        };
        records.insert(key.to_string(), record.clone());
        drop(records);

        self.publish(WatchEvent::Put(record.clone()));
        Ok(record)
    }

    async fn delete(&self, key: &str) -> StoreResult<Option<Versioned<T>>> {
        let removed = self.records.write().await.remove(key);
        if let Some(record) = &removed {
            self.publish(WatchEvent::Deleted(record.clone()));
        }
        Ok(removed)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }
}
