//! Event envelopes.
//!
//! `EventBody` is the closed vocabulary of events that cross the wire;
//! `EventContext` is the serde envelope (body + origin peer) and `Event`
//! is what listeners receive, with the dispatch-time self-origin flag
//! resolved against the local peer id.

use crate::core_identity::PeerId;
use crate::core_store::game_object::{CatalogEntry, ObjectId, ObjectSnapshot};
use serde::{Deserialize, Serialize};

/// Subscription key for listeners. `Wildcard` listeners receive every event
/// after the name-specific ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    OpenNetwork,
    CloseNetwork,
    ConnectPeer,
    DisconnectPeer,
    NetworkError,
    SynchronizeGameObject,
    RequestGameObject,
    UpdateGameObject,
    DeleteGameObject,
    Wildcard,
}

/// The wire-relevant event vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_name", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventBody {
    OpenNetwork {
        peer_id: PeerId,
    },
    CloseNetwork {
        peer_id: PeerId,
    },
    ConnectPeer {
        peer_id: PeerId,
    },
    DisconnectPeer {
        peer_id: PeerId,
    },
    NetworkError {
        peer_id: PeerId,
        error_kind: String,
        message: String,
    },
    SynchronizeGameObject {
        catalog: Vec<CatalogEntry>,
    },
    RequestGameObject {
        identifier: ObjectId,
    },
    UpdateGameObject {
        snapshot: ObjectSnapshot,
    },
    DeleteGameObject {
        identifier: ObjectId,
    },
}

impl EventBody {
    pub fn name(&self) -> EventName {
        match self {
            EventBody::OpenNetwork { .. } => EventName::OpenNetwork,
            EventBody::CloseNetwork { .. } => EventName::CloseNetwork,
            EventBody::ConnectPeer { .. } => EventName::ConnectPeer,
            EventBody::DisconnectPeer { .. } => EventName::DisconnectPeer,
            EventBody::NetworkError { .. } => EventName::NetworkError,
            EventBody::SynchronizeGameObject { .. } => EventName::SynchronizeGameObject,
            EventBody::RequestGameObject { .. } => EventName::RequestGameObject,
            EventBody::UpdateGameObject { .. } => EventName::UpdateGameObject,
            EventBody::DeleteGameObject { .. } => EventName::DeleteGameObject,
        }
    }
}

/// Serde envelope: what is actually sent over a data channel. Consumed
/// uniformly whether generated locally or received from the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(flatten)]
    pub body: EventBody,
    pub send_from: PeerId,
}

/// What listeners receive
#[derive(Debug, Clone)]
pub struct Event {
    pub context: EventContext,
    from_self: bool,
}

impl Event {
    pub(crate) fn new(context: EventContext, from_self: bool) -> Self {
        Event { context, from_self }
    }

    pub fn body(&self) -> &EventBody {
        &self.context.body
    }

    pub fn name(&self) -> EventName {
        self.context.body.name()
    }

    pub fn send_from(&self) -> &PeerId {
        &self.context.send_from
    }

    /// True when this event originated from the local peer (either a plain
    /// local trigger, or a `call` observed by the caller's own handlers).
    pub fn is_send_from_self(&self) -> bool {
        self.from_self
    }
}
