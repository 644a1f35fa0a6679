//! Fixtures for replication tests.

use crate::core_event::event::EventContext;
use crate::core_event::event_system::EventSystem;
use crate::core_identity::{PeerContext, PeerId};
use crate::core_network::connection::{Connection, ConnectionCallback};
use crate::core_network::memory_mesh::{MemoryMesh, MeshEndpoint};
use crate::core_store::object_factory::ObjectFactory;
use crate::core_store::object_store::{ObjectStore, StoreConfig};
use crate::core_sync::synchronizer::{ObjectSynchronizer, SyncConfig};
use std::sync::{Arc, Mutex, RwLock};

/// Transport stub that records outgoing envelopes and advertises a fixed
/// set of open peers. Lets handler-level tests inject inbound events via
/// `EventSystem::trigger_remote` and inspect what would have been sent.
pub struct RecordingConnection {
    context: PeerContext,
    peers: RwLock<Vec<PeerContext>>,
    sent: Mutex<Vec<(EventContext, Option<PeerId>)>>,
}

impl RecordingConnection {
    pub fn new(user_id: &str) -> Arc<Self> {
        let mut context = PeerContext::create(user_id);
        context.is_open = true;
        Arc::new(RecordingConnection {
            context,
            peers: RwLock::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Register a remote peer as connected and open; returns its id.
    pub fn add_open_peer(&self, user_id: &str) -> PeerId {
        let mut context = PeerContext::create(user_id);
        context.is_open = true;
        let peer_id = context.peer_id.clone();
        self.peers.write().unwrap().push(context);
        peer_id
    }

    pub fn remove_peer(&self, peer_id: &PeerId) {
        self.peers
            .write()
            .unwrap()
            .retain(|context| &context.peer_id != peer_id);
    }

    pub fn sent(&self) -> Vec<(EventContext, Option<PeerId>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Envelopes addressed to one peer (unicast only).
    pub fn sent_to(&self, peer_id: &PeerId) -> Vec<EventContext> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, target)| target.as_ref() == Some(peer_id))
            .map(|(envelope, _)| envelope.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Connection for RecordingConnection {
    fn peer_id(&self) -> PeerId {
        self.context.peer_id.clone()
    }

    fn peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .read()
            .unwrap()
            .iter()
            .map(|context| context.peer_id.clone())
            .collect()
    }

    fn peer_context(&self) -> Option<PeerContext> {
        Some(self.context.clone())
    }

    fn peer_contexts(&self) -> Vec<PeerContext> {
        self.peers.read().unwrap().clone()
    }

    fn open(&self, _context: PeerContext) {}

    fn connect(&self, _peer_id: &PeerId) -> bool {
        true
    }

    fn disconnect(&self, peer_id: &PeerId) -> bool {
        self.remove_peer(peer_id);
        true
    }

    fn disconnect_all(&self) {
        self.peers.write().unwrap().clear();
    }

    fn send(&self, event: EventContext, send_to: Option<&PeerId>) {
        self.sent.lock().unwrap().push((event, send_to.cloned()));
    }

    fn list_all_peers(&self) -> Vec<PeerId> {
        self.peer_ids()
    }

    fn set_callback(&self, _callback: ConnectionCallback) {}
}

/// A complete replication stack for one simulated peer: bus, registry,
/// factory (with the `card` and `token` aliases pre-registered),
/// synchronizer, and a mesh endpoint.
pub struct TestPeer {
    pub bus: Arc<EventSystem>,
    pub store: Arc<ObjectStore>,
    pub factory: Arc<ObjectFactory>,
    pub synchronizer: Arc<ObjectSynchronizer>,
    pub endpoint: Arc<MeshEndpoint>,
    pub peer_id: PeerId,
}

impl TestPeer {
    pub fn join(mesh: &MemoryMesh, user_id: &str) -> TestPeer {
        Self::join_with_configs(mesh, user_id, StoreConfig::default(), SyncConfig::default())
    }

    pub fn join_with_configs(
        mesh: &MemoryMesh,
        user_id: &str,
        store_config: StoreConfig,
        sync_config: SyncConfig,
    ) -> TestPeer {
        let bus = EventSystem::new();
        let endpoint = mesh.endpoint();
        EventSystem::attach_network(&bus, endpoint.clone());

        let store = ObjectStore::new(store_config, bus.clone());
        let factory = Arc::new(ObjectFactory::new());
        factory.register_entity("card");
        factory.register_entity("token");

        let synchronizer = ObjectSynchronizer::new(
            sync_config,
            bus.clone(),
            store.clone(),
            factory.clone(),
            endpoint.clone(),
        );
        ObjectSynchronizer::initialize(&synchronizer);

        let context = PeerContext::create(user_id);
        let peer_id = context.peer_id.clone();
        endpoint.open(context);

        TestPeer {
            bus,
            store,
            factory,
            synchronizer,
            endpoint,
            peer_id,
        }
    }
}

/// Drive the mesh and every peer's ticks until nothing moves anymore
/// (bounded, so a livelocked protocol fails tests instead of hanging).
pub fn settle(mesh: &MemoryMesh, peers: &[&TestPeer]) {
    for _ in 0..50 {
        let delivered = mesh.pump();
        let mut flushed = 0;
        for peer in peers {
            flushed += peer.store.flush_updates();
            peer.synchronizer.poll_now();
        }
        if delivered == 0 && flushed == 0 && mesh.queued() == 0 {
            break;
        }
    }
}
