//! Metadata Cache Implementation
//!
//! Process-local cache for object metadata and `(parent, name) -> child`
//! lookups using Moka. Entries never expire by time: every mutation
//! invalidates what it touched before returning. Capacity bounds still
//! apply, and an evicted entry is simply a miss.
//!
//! Results of a remote read are written back only if no invalidation ran
//! while the read was in flight. Callers take a [`Generation`] before the
//! remote call and hand it to the `put*` methods, which drop the write when
//! the cache has moved on.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use moka::sync::Cache;
use tracing::{debug, trace, warn};

use crate::drive::{ObjectId, RemoteObject};

/// Default maximum number of cached objects
const DEFAULT_CAPACITY: u64 = 10_000;

type ChildKey = (ObjectId, String);

/// Invalidation epoch observed before a remote read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Generation(u64);

/// Metadata cache with explicit invalidation
///
/// Provides separate caches for:
/// - Object metadata by id
/// - Child ids by (parent id, name)
pub struct MetadataCache {
    objects: Cache<ObjectId, RemoteObject>,
    children: Cache<ChildKey, ObjectId>,
    /// Serializes multi-entry put/invalidate sequences
    mutation: Mutex<()>,
    /// Bumped by every invalidation, under `mutation`
    epoch: AtomicU64,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
    /// Writes dropped because an invalidation overtook the read
    stale_puts: AtomicU64,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a cache bounded to `capacity` entries per index
    pub fn with_capacity(capacity: u64) -> Self {
        let objects = Cache::builder()
            .max_capacity(capacity)
            .name("object_metadata_cache")
            .build();

        let children = Cache::builder()
            .max_capacity(capacity)
            .name("child_name_cache")
            .support_invalidation_closures()
            .build();

        Self {
            objects,
            children,
            mutation: Mutex::new(()),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_puts: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.mutation.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current invalidation epoch; take it before reading from the store
    pub fn generation(&self) -> Generation {
        Generation(self.epoch.load(Ordering::Acquire))
    }

    fn bump(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// True if nothing was invalidated since `since`. Call with the lock held.
    fn is_current(&self, since: Generation) -> bool {
        if self.epoch.load(Ordering::Acquire) == since.0 {
            return true;
        }
        self.stale_puts.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Get cached metadata for an object
    pub fn get(&self, id: &ObjectId) -> Option<RemoteObject> {
        let cached = self.objects.get(id);
        self.record(cached.is_some());
        trace!(id = %id, hit = cached.is_some(), "Object metadata lookup");
        cached
    }

    /// Cache metadata for an object read at `since`
    pub fn put(&self, object: RemoteObject, since: Generation) -> bool {
        let _guard = self.lock();
        if !self.is_current(since) {
            debug!(id = %object.id, "Skipped stale object metadata");
            return false;
        }
        self.insert_object(object);
        true
    }

    fn insert_object(&self, object: RemoteObject) {
        debug!(id = %object.id, name = %object.name, "Cached object metadata");
        self.objects.insert(object.id.clone(), object);
    }

    /// Look up the child id recorded for `name` under `parent`
    pub fn get_child(&self, parent: &ObjectId, name: &str) -> Option<ObjectId> {
        let cached = self.children.get(&(parent.clone(), name.to_string()));
        self.record(cached.is_some());
        trace!(parent = %parent, name = name, hit = cached.is_some(), "Child name lookup");
        cached
    }

    /// Record `object`, read at `since`, as the child called `name` under `parent`
    pub fn put_child(
        &self,
        parent: &ObjectId,
        name: &str,
        object: RemoteObject,
        since: Generation,
    ) -> bool {
        let _guard = self.lock();
        if !self.is_current(since) {
            debug!(parent = %parent, name = name, "Skipped stale child entry");
            return false;
        }
        self.children
            .insert((parent.clone(), name.to_string()), object.id.clone());
        self.insert_object(object);
        true
    }

    /// Refresh the cache from a complete listing of `parent` taken at `since`.
    ///
    /// Names missing from the listing are forgotten. When several entries
    /// share a name, the first one in listing order wins, matching what
    /// resolution picks.
    pub fn put_listing(&self, parent: &ObjectId, entries: &[RemoteObject], since: Generation) -> bool {
        let _guard = self.lock();
        if !self.is_current(since) {
            debug!(parent = %parent, "Skipped stale directory listing");
            return false;
        }
        self.drop_children(parent);
        let mut seen = HashSet::new();
        for entry in entries {
            if seen.insert(entry.name.as_str()) {
                self.children
                    .insert((parent.clone(), entry.name.clone()), entry.id.clone());
            }
            self.insert_object(entry.clone());
        }
        debug!(parent = %parent, entries = entries.len(), "Cached directory listing");
        true
    }

    /// Invalidate an object's cached metadata
    pub fn invalidate(&self, id: &ObjectId) {
        let _guard = self.lock();
        self.bump();
        self.objects.invalidate(id);
        debug!(id = %id, "Invalidated object metadata");
    }

    /// Invalidate every cached child name under `parent`
    pub fn invalidate_children(&self, parent: &ObjectId) {
        let _guard = self.lock();
        self.bump();
        self.drop_children(parent);
    }

    fn drop_children(&self, parent: &ObjectId) {
        let target = parent.clone();
        if let Err(e) = self
            .children
            .invalidate_entries_if(move |(p, _), _| *p == target)
        {
            warn!(parent = %parent, error = %e, "Predicate invalidation unavailable, clearing child index");
            self.children.invalidate_all();
        }
        debug!(parent = %parent, "Invalidated child listing");
    }

    /// Invalidate an object together with the child listings of the given
    /// parents, as one step
    pub fn invalidate_object<'a, I>(&self, id: &ObjectId, parents: I)
    where
        I: IntoIterator<Item = &'a ObjectId>,
    {
        let _guard = self.lock();
        self.bump();
        self.objects.invalidate(id);
        for parent in parents {
            self.drop_children(parent);
        }
        debug!(id = %id, "Invalidated object and parent listings");
    }

    /// Clear all caches
    pub fn clear(&self) {
        let _guard = self.lock();
        self.bump();
        self.objects.invalidate_all();
        self.children.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.stale_puts.store(0, Ordering::Relaxed);
        debug!("Cleared all metadata caches");
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Number of writes dropped because they raced an invalidation
    pub fn stale_puts(&self) -> u64 {
        self.stale_puts.load(Ordering::Relaxed)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();

        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            stale_puts = self.stale_puts(),
            object_entries = self.objects.entry_count(),
            child_entries = self.children.entry_count(),
            "Cache metrics"
        );
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
