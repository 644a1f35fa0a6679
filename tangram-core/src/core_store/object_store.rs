/*
    object_store.rs - The authoritative local object registry

    Indexes live objects by identifier and by alias, records tombstones for
    deleted identifiers, and publishes update/delete events through the bus.

    Update broadcasts are coalesced: field writes enqueue snapshots into a
    pending map keyed by identifier, and `flush_updates` (the scheduling
    tick, normally driven by the SyncDriver) publishes at most one event per
    identifier per tick. Tombstones are garbage-collected on a horizon,
    throttled and gated by a size threshold, so long sessions stay bounded
    without pausing on every delete.

    Invariant: an identifier is never simultaneously present in the live
    index and the tombstone set.
*/

use crate::core_event::event::EventBody;
use crate::core_event::event_system::EventSystem;
use crate::core_store::errors::{StoreError, StoreResult};
use crate::core_store::game_object::{CatalogEntry, GameObject, ObjectId, ObjectSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Shared handle to a registered object
pub type SharedObject = Arc<RwLock<Box<dyn GameObject>>>;

/// Tunables for the registry. The GC parameters are deliberately
/// configuration, not constants: their interplay with the scheduling tick
/// is platform-dependent and tests pin them explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a tombstone suppresses resurrection
    #[serde(with = "humantime_serde")]
    pub gc_horizon: Duration,

    /// Minimum delay between garbage-collection sweeps
    #[serde(with = "humantime_serde")]
    pub gc_throttle: Duration,

    /// Sweeps only run once the tombstone set exceeds this size
    pub gc_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            gc_horizon: Duration::from_millis(600_000),
            gc_throttle: Duration::from_secs(1),
            gc_threshold: 100_000,
        }
    }
}

pub struct ObjectStore {
    config: StoreConfig,
    bus: Arc<EventSystem>,
    identifier_map: RwLock<HashMap<ObjectId, SharedObject>>,
    alias_map: RwLock<HashMap<String, BTreeSet<ObjectId>>>,
    /// identifier -> deletion timestamp, millis on the store clock
    garbage_map: RwLock<HashMap<ObjectId, u64>>,
    /// Coalesced update queue, flushed once per scheduling tick
    pending_updates: Mutex<BTreeMap<ObjectId, ObjectSnapshot>>,
    last_gc_ms: Mutex<Option<u64>>,
    epoch: Instant,
}

impl ObjectStore {
    pub fn new(config: StoreConfig, bus: Arc<EventSystem>) -> Arc<Self> {
        Arc::new(ObjectStore {
            config,
            bus,
            identifier_map: RwLock::new(HashMap::new()),
            alias_map: RwLock::new(HashMap::new()),
            garbage_map: RwLock::new(HashMap::new()),
            pending_updates: Mutex::new(BTreeMap::new()),
            last_gc_ms: Mutex::new(None),
            epoch: Instant::now(),
        })
    }

    /// Milliseconds on the store's own clock (zero at construction).
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Register an object. Fails when the identifier is already live or
    /// tombstoned, leaving existing state untouched. With `broadcast` the
    /// object's snapshot is queued for the next update tick.
    pub fn add(&self, object: Box<dyn GameObject>, broadcast: bool) -> StoreResult<SharedObject> {
        let identifier = object.identifier().clone();
        if self.is_deleted(&identifier) {
            return Err(StoreError::Tombstoned(identifier));
        }

        let shared: SharedObject = {
            let mut identifier_map = self
                .identifier_map
                .write()
                .unwrap_or_else(|e| e.into_inner());
            if identifier_map.contains_key(&identifier) {
                return Err(StoreError::AlreadyExists(identifier));
            }
            let shared: SharedObject = Arc::new(RwLock::new(object));
            identifier_map.insert(identifier.clone(), shared.clone());
            shared
        };

        let snapshot = {
            let mut object = shared.write().unwrap_or_else(|e| e.into_inner());
            self.alias_map
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .entry(object.alias_name().to_string())
                .or_default()
                .insert(identifier.clone());
            object.on_store_added();
            object.to_snapshot()
        };

        trace!(identifier = %identifier, alias = %snapshot.alias_name, "object added");
        if broadcast {
            self.enqueue_update(snapshot);
        }
        Ok(shared)
    }

    /// De-index an object without tombstoning or broadcasting; purely local
    /// detachment.
    pub fn remove(&self, identifier: &ObjectId) -> StoreResult<SharedObject> {
        let removed = self
            .identifier_map
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(identifier)
            .ok_or_else(|| StoreError::NotFound(identifier.clone()))?;

        {
            let mut object = removed.write().unwrap_or_else(|e| e.into_inner());
            let mut alias_map = self.alias_map.write().unwrap_or_else(|e| e.into_inner());
            if let Some(ids) = alias_map.get_mut(object.alias_name()) {
                ids.remove(identifier);
                if ids.is_empty() {
                    alias_map.remove(object.alias_name());
                }
            }
            object.on_store_removed();
        }
        self.pending_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(identifier);
        Ok(removed)
    }

    /// Tombstone an identifier and drop the live object if present. With
    /// `broadcast` (and a live object) a delete event is published
    /// immediately. The tombstone is recorded even when nothing is live, so
    /// deletes of not-yet-seen objects still suppress resurrection.
    pub fn delete(&self, identifier: &ObjectId, broadcast: bool) -> StoreResult<SharedObject> {
        let removed = self.remove(identifier);
        let now = self.now_ms();
        self.garbage_map
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identifier.clone(), now);

        if removed.is_ok() {
            debug!(identifier = %identifier, "object deleted");
            if broadcast {
                self.bus.call(
                    EventBody::DeleteGameObject {
                        identifier: identifier.clone(),
                    },
                    None,
                );
            }
        }
        self.maybe_collect(now);
        removed
    }

    pub fn get(&self, identifier: &ObjectId) -> Option<SharedObject> {
        self.identifier_map
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(identifier)
            .cloned()
    }

    /// All live objects, or only those of one alias, ordered by identifier.
    pub fn get_objects(&self, alias: Option<&str>) -> Vec<SharedObject> {
        match alias {
            Some(alias) => {
                let ids: Vec<ObjectId> = self
                    .alias_map
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(alias)
                    .map(|ids| ids.iter().cloned().collect())
                    .unwrap_or_default();
                ids.iter().filter_map(|id| self.get(id)).collect()
            }
            None => {
                let identifier_map = self
                    .identifier_map
                    .read()
                    .unwrap_or_else(|e| e.into_inner());
                let mut entries: Vec<(&ObjectId, &SharedObject)> = identifier_map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                entries.into_iter().map(|(_, obj)| obj.clone()).collect()
            }
        }
    }

    /// Route one field mutation through an object's schema and queue the
    /// resulting snapshot for broadcast.
    pub fn set_field(&self, identifier: &ObjectId, name: &str, value: Value) -> StoreResult<()> {
        let shared = self
            .get(identifier)
            .ok_or_else(|| StoreError::NotFound(identifier.clone()))?;
        let snapshot = {
            let mut object = shared.write().unwrap_or_else(|e| e.into_inner());
            object.set_field(name, value)?;
            object.to_snapshot()
        };
        self.enqueue_update(snapshot);
        Ok(())
    }

    /// Queue an update event for an object's current state.
    pub fn update(&self, identifier: &ObjectId) -> StoreResult<()> {
        let shared = self
            .get(identifier)
            .ok_or_else(|| StoreError::NotFound(identifier.clone()))?;
        let snapshot = shared
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .to_snapshot();
        self.enqueue_update(snapshot);
        Ok(())
    }

    /// Queue an update event for an externally produced snapshot.
    pub fn update_snapshot(&self, snapshot: ObjectSnapshot) {
        self.enqueue_update(snapshot);
    }

    fn enqueue_update(&self, snapshot: ObjectSnapshot) {
        let mut pending = self
            .pending_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match pending.get_mut(&snapshot.identifier) {
            Some(queued) => queued.merge_from(&snapshot),
            None => {
                pending.insert(snapshot.identifier.clone(), snapshot);
            }
        }
    }

    /// The scheduling tick: publish one update event per queued identifier.
    /// Returns the number of events published.
    pub fn flush_updates(&self) -> usize {
        let drained: Vec<ObjectSnapshot> = {
            let mut pending = self
                .pending_updates
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending).into_values().collect()
        };

        let count = drained.len();
        for snapshot in drained {
            self.bus
                .call(EventBody::UpdateGameObject { snapshot }, None);
        }
        count
    }

    pub fn is_deleted(&self, identifier: &ObjectId) -> bool {
        self.garbage_map
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(identifier)
    }

    /// The (identifier, version) summary of every live object, ordered by
    /// identifier.
    pub fn get_catalog(&self) -> Vec<CatalogEntry> {
        let identifier_map = self
            .identifier_map
            .read()
            .unwrap_or_else(|e| e.into_inner());
        let mut catalog: Vec<CatalogEntry> = identifier_map
            .iter()
            .map(|(identifier, shared)| CatalogEntry {
                identifier: identifier.clone(),
                version: shared.read().unwrap_or_else(|e| e.into_inner()).version(),
            })
            .collect();
        catalog.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        catalog
    }

    /// Forget all tombstones (e.g. when loading a fresh room state).
    pub fn clear_delete_history(&self) {
        self.garbage_map
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Size-gated, throttled sweep; called after every delete.
    fn maybe_collect(&self, now_ms: u64) {
        {
            let garbage_map = self.garbage_map.read().unwrap_or_else(|e| e.into_inner());
            if garbage_map.len() <= self.config.gc_threshold {
                return;
            }
        }
        {
            let mut last = self.last_gc_ms.lock().unwrap_or_else(|e| e.into_inner());
            let throttle = self.config.gc_throttle.as_millis() as u64;
            if let Some(previous) = *last {
                if now_ms.saturating_sub(previous) < throttle {
                    return;
                }
            }
            *last = Some(now_ms);
        }
        self.collect_garbage(now_ms);
    }

    /// Prune tombstones older than the horizon. Returns how many were
    /// pruned.
    pub fn collect_garbage(&self, now_ms: u64) -> usize {
        let horizon = self.config.gc_horizon.as_millis() as u64;
        let mut garbage_map = self.garbage_map.write().unwrap_or_else(|e| e.into_inner());
        let before = garbage_map.len();
        garbage_map.retain(|_, deleted_at| deleted_at.saturating_add(horizon) >= now_ms);
        let pruned = before - garbage_map.len();
        if pruned > 0 {
            debug!(pruned, remaining = garbage_map.len(), "tombstones collected");
        }
        pruned
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            object_count: self
                .identifier_map
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            tombstone_count: self
                .garbage_map
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            pending_update_count: self
                .pending_updates
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub object_count: usize,
    pub tombstone_count: usize,
    pub pending_update_count: usize,
}
