//! In-process mesh transport.
//!
//! Every endpoint shares one hub. Sends serialize the envelope to JSON and
//! enqueue it into the target's FIFO inbox; nothing is delivered until
//! `pump()` runs, which models the fire-and-forget, callback-driven
//! completion of a real data channel and keeps delivery out of whatever
//! locks the sender holds. Used for simulation-based convergence tests.

use crate::core_event::event::EventContext;
use crate::core_identity::{PeerContext, PeerId};
use crate::core_network::connection::{Connection, ConnectionCallback};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::warn;

enum Delivery {
    Open,
    Close,
    Connect(PeerId),
    Disconnect(PeerId),
    Data { from: PeerId, bytes: Vec<u8> },
}

struct PeerSlot {
    context: PeerContext,
    connected: HashSet<PeerId>,
    callback: Arc<Mutex<ConnectionCallback>>,
}

#[derive(Default)]
struct Hub {
    peers: HashMap<PeerId, PeerSlot>,
    queue: VecDeque<(PeerId, Delivery)>,
}

/// The shared hub. Create one per simulated room.
#[derive(Clone, Default)]
pub struct MemoryMesh {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint attached to this mesh. The endpoint joins the
    /// mesh when `open` is called on it.
    pub fn endpoint(&self) -> Arc<MeshEndpoint> {
        Arc::new(MeshEndpoint {
            hub: self.hub.clone(),
            local_id: Mutex::new(PeerId::default()),
            local_context: Mutex::new(None),
            callback: Arc::new(Mutex::new(ConnectionCallback::default())),
        })
    }

    /// Deliver queued messages until the mesh is quiet, including messages
    /// enqueued by the callbacks themselves. Returns how many deliveries
    /// were made.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        while self.pump_one() {
            delivered += 1;
        }
        delivered
    }

    /// Deliver at most one queued message. Returns false when the queue is
    /// empty. Lets tests interleave failures with in-flight traffic.
    pub fn pump_one(&self) -> bool {
        let next = {
            let mut hub = self.hub.lock().unwrap_or_else(|e| e.into_inner());
            match hub.queue.pop_front() {
                Some((target, delivery)) => {
                    let callback = hub.peers.get(&target).map(|slot| slot.callback.clone());
                    Some((target, delivery, callback))
                }
                None => None,
            }
        };

        let Some((target, delivery, callback)) = next else {
            return false;
        };
        let Some(callback) = callback else {
            return true;
        };

        // Hub lock is released here; callbacks may send freely.
        let callback = callback.lock().unwrap_or_else(|e| e.into_inner());
        match delivery {
            Delivery::Open => (callback.on_open)(&target),
            Delivery::Close => (callback.on_close)(&target),
            Delivery::Connect(peer) => (callback.on_connect)(&peer),
            Delivery::Disconnect(peer) => (callback.on_disconnect)(&peer),
            Delivery::Data { from, bytes } => match serde_json::from_slice(&bytes) {
                Ok(envelope) => (callback.on_data)(&from, vec![envelope]),
                Err(e) => (callback.on_error)(&from, "malformed-data", &e.to_string()),
            },
        }
        true
    }

    /// Number of queued, undelivered messages.
    pub fn queued(&self) -> usize {
        self.hub.lock().unwrap_or_else(|e| e.into_inner()).queue.len()
    }
}

/// One peer's view of the mesh.
pub struct MeshEndpoint {
    hub: Arc<Mutex<Hub>>,
    local_id: Mutex<PeerId>,
    local_context: Mutex<Option<PeerContext>>,
    callback: Arc<Mutex<ConnectionCallback>>,
}

impl MeshEndpoint {
    fn local(&self) -> PeerId {
        self.local_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Connection for MeshEndpoint {
    fn peer_id(&self) -> PeerId {
        self.local()
    }

    fn peer_ids(&self) -> Vec<PeerId> {
        let local = self.local();
        let hub = self.hub.lock().unwrap_or_else(|e| e.into_inner());
        hub.peers
            .get(&local)
            .map(|slot| {
                let mut ids: Vec<PeerId> = slot.connected.iter().cloned().collect();
                ids.sort();
                ids
            })
            .unwrap_or_default()
    }

    fn peer_context(&self) -> Option<PeerContext> {
        self.local_context
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn peer_contexts(&self) -> Vec<PeerContext> {
        let local = self.local();
        let hub = self.hub.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = hub.peers.get(&local) else {
            return Vec::new();
        };
        let mut ids: Vec<PeerId> = slot.connected.iter().cloned().collect();
        ids.sort();
        ids.iter()
            .filter_map(|id| hub.peers.get(id))
            .map(|slot| slot.context.clone())
            .collect()
    }

    fn open(&self, mut context: PeerContext) {
        context.is_open = true;
        let peer_id = context.peer_id.clone();
        *self.local_id.lock().unwrap_or_else(|e| e.into_inner()) = peer_id.clone();
        *self
            .local_context
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(context.clone());

        let mut hub = self.hub.lock().unwrap_or_else(|e| e.into_inner());
        hub.peers.insert(
            peer_id.clone(),
            PeerSlot {
                context,
                connected: HashSet::new(),
                callback: self.callback.clone(),
            },
        );
        hub.queue.push_back((peer_id, Delivery::Open));
    }

    fn connect(&self, peer_id: &PeerId) -> bool {
        let local = self.local();
        if local.is_empty() || *peer_id == local {
            return false;
        }

        let mut hub = self.hub.lock().unwrap_or_else(|e| e.into_inner());
        if !hub.peers.contains_key(peer_id) || !hub.peers.contains_key(&local) {
            return false;
        }

        if let Some(slot) = hub.peers.get_mut(&local) {
            slot.connected.insert(peer_id.clone());
        }
        if let Some(slot) = hub.peers.get_mut(peer_id) {
            slot.connected.insert(local.clone());
        }
        hub.queue
            .push_back((local.clone(), Delivery::Connect(peer_id.clone())));
        hub.queue
            .push_back((peer_id.clone(), Delivery::Connect(local)));
        true
    }

    fn disconnect(&self, peer_id: &PeerId) -> bool {
        let local = self.local();
        let mut hub = self.hub.lock().unwrap_or_else(|e| e.into_inner());

        let was_connected = hub
            .peers
            .get_mut(&local)
            .map(|slot| slot.connected.remove(peer_id))
            .unwrap_or(false);
        if let Some(slot) = hub.peers.get_mut(peer_id) {
            slot.connected.remove(&local);
        }
        if was_connected {
            hub.queue
                .push_back((local.clone(), Delivery::Disconnect(peer_id.clone())));
            hub.queue.push_back((peer_id.clone(), Delivery::Disconnect(local)));
        }
        was_connected
    }

    fn disconnect_all(&self) {
        let peers = self.peer_ids();
        for peer in peers {
            self.disconnect(&peer);
        }
        let local = self.local();
        if !local.is_empty() {
            let mut hub = self.hub.lock().unwrap_or_else(|e| e.into_inner());
            hub.queue.push_back((local, Delivery::Close));
        }
    }

    fn send(&self, event: EventContext, send_to: Option<&PeerId>) {
        let local = self.local();
        let bytes = match serde_json::to_vec(&event) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "dropping unserializable envelope");
                return;
            }
        };

        let mut hub = self.hub.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = hub.peers.get(&local) else {
            return;
        };
        let targets: Vec<PeerId> = match send_to {
            Some(target) => {
                if slot.connected.contains(target) {
                    vec![target.clone()]
                } else {
                    Vec::new()
                }
            }
            None => {
                let mut ids: Vec<PeerId> = slot.connected.iter().cloned().collect();
                ids.sort();
                ids
            }
        };

        for target in targets {
            hub.queue.push_back((
                target,
                Delivery::Data {
                    from: local.clone(),
                    bytes: bytes.clone(),
                },
            ));
        }
    }

    fn list_all_peers(&self) -> Vec<PeerId> {
        let hub = self.hub.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<PeerId> = hub.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn set_callback(&self, callback: ConnectionCallback) {
        *self.callback.lock().unwrap_or_else(|e| e.into_inner()) = callback;
    }
}
