//! The transport capability consumed by the replication core.

use crate::core_event::event::EventContext;
use crate::core_identity::{PeerContext, PeerId};

/// Callback bundle a transport invokes to hand control back to the
/// application. All callbacks default to no-ops; the event bus installs
/// the real bridge via `EventSystem::attach_network`.
pub struct ConnectionCallback {
    pub on_open: Box<dyn Fn(&PeerId) + Send + Sync>,
    pub on_close: Box<dyn Fn(&PeerId) + Send + Sync>,
    pub on_connect: Box<dyn Fn(&PeerId) + Send + Sync>,
    pub on_disconnect: Box<dyn Fn(&PeerId) + Send + Sync>,
    /// Ordered batch of envelopes from one peer
    pub on_data: Box<dyn Fn(&PeerId, Vec<EventContext>) + Send + Sync>,
    /// (peer, error kind, message)
    pub on_error: Box<dyn Fn(&PeerId, &str, &str) + Send + Sync>,
}

impl Default for ConnectionCallback {
    fn default() -> Self {
        ConnectionCallback {
            on_open: Box::new(|_| {}),
            on_close: Box::new(|_| {}),
            on_connect: Box::new(|_| {}),
            on_disconnect: Box::new(|_| {}),
            on_data: Box::new(|_, _| {}),
            on_error: Box::new(|_, _, _| {}),
        }
    }
}

/// What the replication core needs from a transport. Sends are
/// fire-and-forget; completion and failure surface only through the
/// callback bundle.
pub trait Connection: Send + Sync {
    /// The local peer's own id
    fn peer_id(&self) -> PeerId;

    /// Ids of currently connected peers
    fn peer_ids(&self) -> Vec<PeerId>;

    /// The local peer's own context, if opened
    fn peer_context(&self) -> Option<PeerContext>;

    /// Contexts of currently connected peers, including open/session state
    fn peer_contexts(&self) -> Vec<PeerContext>;

    /// Register the local peer on the mesh
    fn open(&self, context: PeerContext);

    /// Open a data channel to a peer. Returns false when unknown.
    fn connect(&self, peer_id: &PeerId) -> bool;

    /// Drop the data channel to a peer. Returns false when not connected.
    fn disconnect(&self, peer_id: &PeerId) -> bool;

    fn disconnect_all(&self);

    /// Send one envelope: broadcast to every connected peer when `send_to`
    /// is `None`, unicast otherwise. Never delivers back to the sender.
    fn send(&self, event: EventContext, send_to: Option<&PeerId>);

    /// Every peer known to the signaling layer, connected or not
    fn list_all_peers(&self) -> Vec<PeerId>;

    fn set_callback(&self, callback: ConnectionCallback);
}
