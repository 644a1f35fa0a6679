/*
    synchronizer.rs - The anti-entropy reconciler

    Reacts to bus events:
    - own CONNECT_PEER: stream the local catalog to the new peer in chunks
    - remote catalog: tell the sender to delete tombstoned entries, merge
      the rest into the shared request pool
    - remote fetch: answer with the current snapshot, or a delete notice
      for tombstoned identifiers
    - remote update/delete: apply via the version gate, create unknown
      objects through the factory (without re-broadcast), and satisfy any
      task waiting on the identifier
    - DISCONNECT_PEER: time out that peer's tasks, scrub it from holder
      lists, drop requests left with no holder

    Scheduling is a closed loop, not a fixed batch: whenever a task
    finishes and requests remain below the concurrency cap, a new task
    starts. Target peers are picked by shuffling the open peers and taking
    the least-loaded holder, spreading fetch load across the mesh.

    Locking discipline: handlers compute under the state lock and collect
    outgoing events into an outbox that is flushed only after the lock is
    released, so bus dispatch can re-enter the synchronizer freely.
*/

use crate::core_event::event::{Event, EventBody, EventName};
use crate::core_event::event_system::EventSystem;
use crate::core_identity::PeerId;
use crate::core_network::connection::Connection;
use crate::core_store::game_object::{ApplyOutcome, CatalogEntry, ObjectId, ObjectSnapshot};
use crate::core_store::object_factory::ObjectFactory;
use crate::core_store::object_store::ObjectStore;
use crate::core_sync::request::SyncRequest;
use crate::core_sync::task::{SynchronizeTask, TaskFetch, TaskId};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

const OWNER_KEY: &str = "object-synchronizer";

/// Tunables for the reconciliation loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum concurrently running fetch tasks
    pub max_tasks: usize,

    /// Maximum requests handed to one task
    pub max_requests_per_task: usize,

    /// Timeout rounds a request survives before being dropped
    pub request_ttl: i32,

    /// Inactivity deadline per task
    #[serde(with = "humantime_serde")]
    pub task_timeout: Duration,

    /// Catalog entries per SYNCHRONIZE message
    pub catalog_chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_tasks: 32,
            max_requests_per_task: 32,
            request_ttl: 2,
            task_timeout: Duration::from_secs(30),
            catalog_chunk_size: 2048,
        }
    }
}

/// An event to publish once the state lock is released
struct Outgoing {
    body: EventBody,
    send_to: Option<PeerId>,
}

#[derive(Default)]
struct SyncState {
    /// Shared pool of wanted objects, keyed by identifier
    request_map: BTreeMap<ObjectId, SyncRequest>,
    /// Task ids currently assigned to each peer
    peer_map: HashMap<PeerId, Vec<TaskId>>,
    tasks: HashMap<TaskId, SynchronizeTask>,
    /// identifier -> tasks waiting on it, so one arriving update can
    /// satisfy every interested task
    task_index: HashMap<ObjectId, Vec<TaskId>>,
    /// Tasks that completed without requests; finished on the next tick
    pending_finish: Vec<TaskId>,
    next_task_id: TaskId,
}

pub struct ObjectSynchronizer {
    config: SyncConfig,
    bus: Arc<EventSystem>,
    store: Arc<ObjectStore>,
    factory: Arc<ObjectFactory>,
    network: Arc<dyn Connection>,
    state: Mutex<SyncState>,
}

impl ObjectSynchronizer {
    pub fn new(
        config: SyncConfig,
        bus: Arc<EventSystem>,
        store: Arc<ObjectStore>,
        factory: Arc<ObjectFactory>,
        network: Arc<dyn Connection>,
    ) -> Arc<Self> {
        Arc::new(ObjectSynchronizer {
            config,
            bus,
            store,
            factory,
            network,
            state: Mutex::new(SyncState::default()),
        })
    }

    /// Subscribe to the bus. Handlers hold only a weak reference; `destroy`
    /// (or dropping the bus) tears the wiring down.
    pub fn initialize(this: &Arc<Self>) {
        info!("object synchronizer ready");

        this.bus
            .register(OWNER_KEY)
            .on_with_priority(
                EventName::ConnectPeer,
                2,
                Self::handler(this, Self::on_connect_peer),
            )
            .on(
                EventName::DisconnectPeer,
                Self::handler(this, Self::on_disconnect_peer),
            )
            .on(
                EventName::SynchronizeGameObject,
                Self::handler(this, Self::on_synchronize),
            )
            .on(
                EventName::RequestGameObject,
                Self::handler(this, Self::on_request_game_object),
            )
            .on(
                EventName::UpdateGameObject,
                Self::handler(this, Self::on_update_game_object),
            )
            .on(
                EventName::DeleteGameObject,
                Self::handler(this, Self::on_delete_game_object),
            );
    }

    pub fn destroy(&self) {
        self.bus.unregister(OWNER_KEY);
    }

    fn handler(
        this: &Arc<Self>,
        method: fn(&ObjectSynchronizer, &Event),
    ) -> impl Fn(&Event) + Send + Sync + 'static {
        let weak: Weak<ObjectSynchronizer> = Arc::downgrade(this);
        move |event| {
            if let Some(synchronizer) = weak.upgrade() {
                method(&synchronizer, event);
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.store.now_ms()
    }

    /// Drive deadlines: finish empty tasks queued for the tick, time out
    /// expired ones, then try to schedule further tasks. Called by the
    /// SyncDriver, or directly with a synthetic clock in tests.
    pub fn poll(&self, now_ms: u64) {
        let outbox = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            for task_id in std::mem::take(&mut state.pending_finish) {
                Self::finish_task_locked(&mut state, task_id);
            }

            let expired: Vec<TaskId> = state
                .tasks
                .values()
                .filter(|task| task.is_expired(now_ms))
                .map(|task| task.id)
                .collect();
            for task_id in expired {
                Self::timeout_task_locked(&mut state, task_id);
            }

            self.synchronize_locked(&mut state, now_ms)
        };
        self.flush_outbox(outbox);
    }

    /// `poll` against the shared store clock.
    pub fn poll_now(&self) {
        self.poll(self.now_ms());
    }

    pub fn stats(&self) -> SyncStats {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        SyncStats {
            pending_requests: state.request_map.len(),
            active_tasks: state.tasks.len(),
            tracked_peers: state.peer_map.len(),
        }
    }

    // --- event handlers -------------------------------------------------

    fn on_connect_peer(&self, event: &Event) {
        // only the local observation of a new connection streams a catalog
        if !event.is_send_from_self() {
            return;
        }
        let EventBody::ConnectPeer { peer_id } = event.body() else {
            return;
        };
        debug!(peer = %peer_id, "streaming catalog to new peer");
        self.send_catalog(peer_id);
    }

    fn send_catalog(&self, send_to: &PeerId) {
        let catalog = self.store.get_catalog();
        if catalog.is_empty() {
            return;
        }
        for chunk in catalog.chunks(self.config.catalog_chunk_size) {
            self.bus.call(
                EventBody::SynchronizeGameObject {
                    catalog: chunk.to_vec(),
                },
                Some(send_to),
            );
        }
    }

    fn on_disconnect_peer(&self, event: &Event) {
        let EventBody::DisconnectPeer { peer_id } = event.body() else {
            return;
        };
        let now = self.now_ms();
        let outbox = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            // every task addressed to the peer times out immediately
            let affected: Vec<TaskId> = state
                .tasks
                .values()
                .filter(|task| &task.peer_id == peer_id)
                .map(|task| task.id)
                .collect();
            for task_id in affected {
                debug!(task = task_id, peer = %peer_id, "peer disconnected; timing out task");
                Self::timeout_task_locked(&mut state, task_id);
            }

            state.peer_map.remove(peer_id);

            // a request whose last holder is gone can never be served
            for request in state.request_map.values_mut() {
                request.remove_holder(peer_id);
            }
            state
                .request_map
                .retain(|_, request| !request.holder_ids.is_empty());

            self.synchronize_locked(&mut state, now)
        };
        self.flush_outbox(outbox);
    }

    fn on_synchronize(&self, event: &Event) {
        if event.is_send_from_self() {
            return;
        }
        let EventBody::SynchronizeGameObject { catalog } = event.body() else {
            return;
        };
        let sender = event.send_from().clone();
        debug!(peer = %sender, entries = catalog.len(), "received catalog");

        let now = self.now_ms();
        let mut outbox = Vec::new();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            for entry in catalog {
                if self.store.is_deleted(&entry.identifier) {
                    // stale peer still advertises a deleted object
                    outbox.push(Outgoing {
                        body: EventBody::DeleteGameObject {
                            identifier: entry.identifier.clone(),
                        },
                        send_to: Some(sender.clone()),
                    });
                } else {
                    self.add_request_locked(&mut state, entry, &sender);
                }
            }
            outbox.extend(self.synchronize_locked(&mut state, now));
        }
        self.flush_outbox(outbox);
    }

    fn on_request_game_object(&self, event: &Event) {
        if event.is_send_from_self() {
            return;
        }
        let EventBody::RequestGameObject { identifier } = event.body() else {
            return;
        };
        let sender = event.send_from();

        if self.store.is_deleted(identifier) {
            self.bus.call(
                EventBody::DeleteGameObject {
                    identifier: identifier.clone(),
                },
                Some(sender),
            );
        } else if let Some(object) = self.store.get(identifier) {
            let snapshot = object
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .to_snapshot();
            self.bus
                .call(EventBody::UpdateGameObject { snapshot }, Some(sender));
        }
    }

    fn on_update_game_object(&self, event: &Event) {
        let EventBody::UpdateGameObject { snapshot } = event.body() else {
            return;
        };

        if let Some(object) = self.store.get(&snapshot.identifier) {
            if !event.is_send_from_self() {
                self.apply_update(&object, snapshot);
            }
        } else if self.store.is_deleted(&snapshot.identifier) {
            if !event.is_send_from_self() {
                self.bus.call(
                    EventBody::DeleteGameObject {
                        identifier: snapshot.identifier.clone(),
                    },
                    Some(event.send_from()),
                );
            }
        } else if !event.is_send_from_self() {
            self.create_object(snapshot);
        }

        if !event.is_send_from_self() {
            self.satisfy_tasks(&snapshot.identifier);
        }
    }

    fn on_delete_game_object(&self, event: &Event) {
        let EventBody::DeleteGameObject { identifier } = event.body() else {
            return;
        };
        // the network is the source; never re-broadcast
        let _ = self.store.delete(identifier, false);

        if !event.is_send_from_self() {
            self.satisfy_tasks(identifier);
        }
    }

    // --- object application ---------------------------------------------

    fn apply_update(
        &self,
        object: &crate::core_store::object_store::SharedObject,
        snapshot: &ObjectSnapshot,
    ) {
        let outcome = object
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .apply(snapshot);
        if outcome == ApplyOutcome::Stale {
            // the losing write is dropped silently
            debug!(identifier = %snapshot.identifier, "stale remote update ignored");
        }
    }

    fn create_object(&self, snapshot: &ObjectSnapshot) {
        let object = match self
            .factory
            .create(&snapshot.alias_name, snapshot.identifier.clone())
        {
            Ok(object) => object,
            Err(e) => {
                warn!(alias = %snapshot.alias_name, error = %e, "discarding snapshot of unknown type");
                return;
            }
        };

        let mut object = object;
        object.apply(snapshot);
        // the network already carried this state; add without re-broadcast
        if let Err(e) = self.store.add(object, false) {
            debug!(identifier = %snapshot.identifier, error = %e, "remote object not added");
        }
    }

    // --- request pool ----------------------------------------------------

    fn add_request_locked(&self, state: &mut SyncState, entry: &CatalogEntry, sender: &PeerId) {
        match state.request_map.get_mut(&entry.identifier) {
            Some(request) if request.version == entry.version => {
                // several peers can supply the same version; remember the
                // fallback holder
                request.add_holder(sender.clone());
            }
            Some(request) if request.version > entry.version => {
                // a newer version is already wanted; the older offer is moot
            }
            _ => {
                state.request_map.insert(
                    entry.identifier.clone(),
                    SyncRequest::new(
                        entry.identifier.clone(),
                        entry.version,
                        sender.clone(),
                        self.config.request_ttl,
                    ),
                );
            }
        }
    }

    // --- scheduling -------------------------------------------------------

    /// The closed scheduling loop: keep starting tasks while requests and
    /// task slots remain.
    fn synchronize_locked(&self, state: &mut SyncState, now_ms: u64) -> Vec<Outgoing> {
        let mut outbox = Vec::new();
        while !state.request_map.is_empty() && state.tasks.len() < self.config.max_tasks {
            let Some(target) = self.pick_target_peer(state) else {
                break;
            };

            let requests = self.harvest_requests(state, &target);
            if requests.is_empty() {
                // every request this peer could serve is already satisfied
                // locally; drop idle peer bookkeeping
                if state
                    .peer_map
                    .get(&target)
                    .map(|tasks| tasks.is_empty())
                    .unwrap_or(false)
                {
                    state.peer_map.remove(&target);
                }
                continue;
            }

            outbox.extend(self.start_task_locked(state, target, requests, now_ms));
        }
        outbox
    }

    /// Shuffle open peers (unbiased), then take the least-loaded one that
    /// holds at least one pending request.
    fn pick_target_peer(&self, state: &SyncState) -> Option<PeerId> {
        let mut contexts = self.network.peer_contexts();
        contexts.shuffle(&mut rand::rng());

        let mut best: Option<(usize, PeerId)> = None;
        for context in contexts {
            if !context.is_open {
                continue;
            }
            let is_holder = state
                .request_map
                .values()
                .any(|request| request.holder_ids.contains(&context.peer_id));
            if !is_holder {
                continue;
            }
            let load = state
                .peer_map
                .get(&context.peer_id)
                .map(|tasks| tasks.len())
                .unwrap_or(0);
            if best.as_ref().map(|(min, _)| load < *min).unwrap_or(true) {
                best = Some((load, context.peer_id));
            }
        }
        best.map(|(_, peer_id)| peer_id)
    }

    /// Pull up to `max_requests_per_task` requests this peer can serve out
    /// of the shared pool. Requests whose local copy already matches are
    /// dropped on the way.
    fn harvest_requests(&self, state: &mut SyncState, peer_id: &PeerId) -> Vec<SyncRequest> {
        let mut harvested = Vec::new();
        let mut scanned = Vec::new();

        for (identifier, request) in state.request_map.iter() {
            if harvested.len() >= self.config.max_requests_per_task {
                break;
            }
            if !request.holder_ids.contains(peer_id) {
                continue;
            }
            scanned.push(identifier.clone());

            let wanted = match self.store.get(identifier) {
                None => true,
                Some(object) => {
                    object.read().unwrap_or_else(|e| e.into_inner()).version() < request.version
                }
            };
            if wanted {
                harvested.push(request.clone());
            }
        }

        for identifier in scanned {
            state.request_map.remove(&identifier);
        }
        harvested
    }

    fn start_task_locked(
        &self,
        state: &mut SyncState,
        peer_id: PeerId,
        requests: Vec<SyncRequest>,
        now_ms: u64,
    ) -> Vec<Outgoing> {
        let task_id = state.next_task_id;
        state.next_task_id += 1;

        let (task, fetches) = SynchronizeTask::new(
            task_id,
            peer_id.clone(),
            requests,
            now_ms,
            self.config.task_timeout,
        );

        for identifier in task.identifiers() {
            state
                .task_index
                .entry(identifier)
                .or_default()
                .push(task_id);
        }
        state.peer_map.entry(peer_id).or_default().push(task_id);

        if task.is_complete() {
            // zero-request tasks finish on the next tick, preserving
            // asynchronous completion for callers
            state.pending_finish.push(task_id);
        }
        state.tasks.insert(task_id, task);

        fetches
            .into_iter()
            .map(|TaskFetch { identifier, send_to }| Outgoing {
                body: EventBody::RequestGameObject { identifier },
                send_to,
            })
            .collect()
    }

    /// Satisfy every task waiting on this identifier, finish completed
    /// ones, and keep the scheduling loop running.
    fn satisfy_tasks(&self, identifier: &ObjectId) {
        let now = self.now_ms();
        let outbox = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let Some(waiting) = state.task_index.remove(identifier) else {
                return;
            };

            let mut still_waiting = Vec::new();
            for task_id in waiting {
                let Some(task) = state.tasks.get_mut(&task_id) else {
                    continue;
                };
                if !task.satisfy(identifier, now, self.config.task_timeout) {
                    still_waiting.push(task_id);
                    continue;
                }
                if task.is_complete() {
                    debug!(task = task_id, "synchronize task finished");
                    Self::finish_task_locked(&mut state, task_id);
                }
            }
            if !still_waiting.is_empty() {
                state
                    .task_index
                    .insert(identifier.clone(), still_waiting);
            }

            self.synchronize_locked(&mut state, now)
        };
        self.flush_outbox(outbox);
    }

    /// Remove a finished task from all bookkeeping.
    fn finish_task_locked(state: &mut SyncState, task_id: TaskId) {
        let Some(task) = state.tasks.remove(&task_id) else {
            return;
        };
        for identifier in task.identifiers() {
            if let Some(waiting) = state.task_index.get_mut(&identifier) {
                waiting.retain(|id| *id != task_id);
                if waiting.is_empty() {
                    state.task_index.remove(&identifier);
                }
            }
        }
        if let Some(tasks) = state.peer_map.get_mut(&task.peer_id) {
            tasks.retain(|id| *id != task_id);
        }
    }

    /// Timeout path: return unexhausted requests to the shared pool, then
    /// finish the task.
    fn timeout_task_locked(state: &mut SyncState, task_id: TaskId) {
        let remaining = state
            .tasks
            .get(&task_id)
            .map(|task| task.unexhausted_requests())
            .unwrap_or_default();
        if !remaining.is_empty() {
            debug!(
                task = task_id,
                requeued = remaining.len(),
                "synchronize task timed out"
            );
        }
        for request in remaining {
            state
                .request_map
                .insert(request.identifier.clone(), request);
        }
        Self::finish_task_locked(state, task_id);
    }

    fn flush_outbox(&self, outbox: Vec<Outgoing>) {
        for Outgoing { body, send_to } in outbox {
            self.bus.call(body, send_to.as_ref());
        }
    }

    // test hook: start a task directly, bypassing catalog exchange
    #[cfg(test)]
    pub(crate) fn start_task_for_tests(
        &self,
        peer_id: PeerId,
        requests: Vec<SyncRequest>,
    ) -> TaskId {
        let now = self.now_ms();
        let (task_id, outbox) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let task_id = state.next_task_id;
            let outbox = self.start_task_locked(&mut state, peer_id, requests, now);
            (task_id, outbox)
        };
        self.flush_outbox(outbox);
        task_id
    }

    #[cfg(test)]
    pub(crate) fn pending_request(&self, identifier: &ObjectId) -> Option<SyncRequest> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .request_map
            .get(identifier)
            .cloned()
    }
}

/// Reconciler statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub pending_requests: usize,
    pub active_tasks: usize,
    pub tracked_peers: usize,
}
