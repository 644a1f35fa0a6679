//! The event bus.
//!
//! Dispatch is synchronous in the calling thread, highest priority first,
//! wildcard listeners after the name-specific ones. A panicking listener is
//! isolated and logged; dispatch continues with the next listener.
//!
//! When a Connection is attached, the bus installs itself as the
//! transport's callback bundle: open/close/connect/disconnect/data/error
//! callbacks all re-enter the application as ordinary bus events.

use crate::core_event::event::{Event, EventBody, EventContext, EventName};
use crate::core_event::listener::{EventCallback, Listener, Subscription};
use crate::core_identity::PeerId;
use crate::core_network::connection::{Connection, ConnectionCallback};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, error};

pub struct EventSystem {
    listeners: RwLock<HashMap<EventName, Vec<Subscription>>>,
    network: RwLock<Option<Arc<dyn Connection>>>,
    next_seq: AtomicU64,
}

impl EventSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(EventSystem {
            listeners: RwLock::new(HashMap::new()),
            network: RwLock::new(None),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Attach the transport and install the callback bridge. The bus keeps
    /// only a weak reference inside the callbacks so teardown order does
    /// not leak.
    pub fn attach_network(this: &Arc<Self>, network: Arc<dyn Connection>) {
        *this
            .network
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(network.clone());

        let weak = Arc::downgrade(this);
        network.set_callback(Self::bridge_callback(weak));
    }

    fn bridge_callback(weak: Weak<EventSystem>) -> ConnectionCallback {
        let on_open = {
            let weak = weak.clone();
            Box::new(move |peer_id: &PeerId| {
                if let Some(bus) = weak.upgrade() {
                    bus.trigger(EventBody::OpenNetwork {
                        peer_id: peer_id.clone(),
                    });
                }
            }) as Box<dyn Fn(&PeerId) + Send + Sync>
        };
        let on_close = {
            let weak = weak.clone();
            Box::new(move |peer_id: &PeerId| {
                if let Some(bus) = weak.upgrade() {
                    bus.trigger(EventBody::CloseNetwork {
                        peer_id: peer_id.clone(),
                    });
                }
            }) as Box<dyn Fn(&PeerId) + Send + Sync>
        };
        let on_connect = {
            let weak = weak.clone();
            Box::new(move |peer_id: &PeerId| {
                debug!(peer = %peer_id, "data connection established");
                if let Some(bus) = weak.upgrade() {
                    bus.trigger(EventBody::ConnectPeer {
                        peer_id: peer_id.clone(),
                    });
                }
            }) as Box<dyn Fn(&PeerId) + Send + Sync>
        };
        let on_disconnect = {
            let weak = weak.clone();
            Box::new(move |peer_id: &PeerId| {
                debug!(peer = %peer_id, "data connection lost");
                if let Some(bus) = weak.upgrade() {
                    bus.trigger(EventBody::DisconnectPeer {
                        peer_id: peer_id.clone(),
                    });
                }
            }) as Box<dyn Fn(&PeerId) + Send + Sync>
        };
        let on_data = {
            let weak = weak.clone();
            Box::new(move |_peer_id: &PeerId, envelopes: Vec<EventContext>| {
                if let Some(bus) = weak.upgrade() {
                    for envelope in envelopes {
                        bus.trigger_remote(envelope);
                    }
                }
            }) as Box<dyn Fn(&PeerId, Vec<EventContext>) + Send + Sync>
        };
        let on_error = {
            Box::new(move |peer_id: &PeerId, error_kind: &str, message: &str| {
                if let Some(bus) = weak.upgrade() {
                    bus.trigger(EventBody::NetworkError {
                        peer_id: peer_id.clone(),
                        error_kind: error_kind.to_string(),
                        message: message.to_string(),
                    });
                }
            }) as Box<dyn Fn(&PeerId, &str, &str) + Send + Sync>
        };

        ConnectionCallback {
            on_open,
            on_close,
            on_connect,
            on_disconnect,
            on_data,
            on_error,
        }
    }

    /// The local peer id, or the empty id before a transport is attached.
    pub fn local_peer_id(&self) -> PeerId {
        self.network
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|n| n.peer_id())
            .unwrap_or_default()
    }

    /// Start a subscription chain for the given owner key.
    pub fn register(&self, owner: &str) -> Listener<'_> {
        Listener {
            system: self,
            owner: owner.to_string(),
        }
    }

    pub(crate) fn subscribe(
        &self,
        owner: &str,
        name: EventName,
        priority: i32,
        callback: EventCallback,
    ) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let entries = listeners.entry(name).or_default();
        entries.push(Subscription {
            owner: owner.to_string(),
            priority,
            seq,
            callback,
        });
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    /// Remove every subscription held by this owner.
    pub fn unregister(&self, owner: &str) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        for entries in listeners.values_mut() {
            entries.retain(|s| s.owner != owner);
        }
        listeners.retain(|_, entries| !entries.is_empty());
    }

    /// Remove this owner's subscriptions for one event name.
    pub fn unregister_event(&self, owner: &str, name: EventName) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = listeners.get_mut(&name) {
            entries.retain(|s| s.owner != owner);
            if entries.is_empty() {
                listeners.remove(&name);
            }
        }
    }

    /// Dispatch locally only.
    pub fn trigger(&self, body: EventBody) -> Event {
        let context = EventContext {
            body,
            send_from: self.local_peer_id(),
        };
        let event = Event::new(context, true);
        self.dispatch(&event);
        event
    }

    /// Re-dispatch an envelope delivered by the network, preserving its
    /// true origin. Self-origin is still detected so loopback deliveries
    /// behave identically to local triggers.
    pub fn trigger_remote(&self, context: EventContext) -> Event {
        let from_self = context.send_from == self.local_peer_id();
        let event = Event::new(context, from_self);
        self.dispatch(&event);
        event
    }

    /// Dispatch locally AND forward through the transport: broadcast when
    /// `send_to` is `None`, unicast otherwise. The caller's own handlers
    /// observe the event with the self-origin flag set.
    pub fn call(&self, body: EventBody, send_to: Option<&PeerId>) -> Event {
        let context = EventContext {
            body,
            send_from: self.local_peer_id(),
        };

        let network = self
            .network
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(network) = network {
            network.send(context.clone(), send_to);
        }

        let event = Event::new(context, true);
        self.dispatch(&event);
        event
    }

    fn dispatch(&self, event: &Event) {
        // Snapshot the callbacks so listeners may register/unregister
        // (or trigger further events) during dispatch.
        let callbacks: Vec<EventCallback> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            let named = listeners.get(&event.name()).into_iter().flatten();
            let wildcard = listeners.get(&EventName::Wildcard).into_iter().flatten();
            named.chain(wildcard).map(|s| s.callback.clone()).collect()
        };

        for callback in callbacks {
            let result = catch_unwind(AssertUnwindSafe(|| callback(event)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic>".to_string());
                error!(event = ?event.name(), %message, "event listener panicked; continuing dispatch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::game_object::ObjectId;
    use std::sync::Mutex;

    fn recorded(bus: &Arc<EventSystem>, owner: &str, name: EventName) -> Arc<Mutex<Vec<Event>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        bus.register(owner)
            .on(name, move |event| sink.lock().unwrap().push(event.clone()));
        log
    }

    #[test]
    fn test_trigger_reaches_listener() {
        let bus = EventSystem::new();
        let log = recorded(&bus, "test", EventName::ConnectPeer);

        bus.trigger(EventBody::ConnectPeer {
            peer_id: PeerId::from("p1"),
        });

        let events = log.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_send_from_self());
    }

    #[test]
    fn test_priority_order() {
        let bus = EventSystem::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, priority) in [("low", 0), ("high", 5), ("mid", 2)] {
            let order = order.clone();
            bus.register(label).on_with_priority(
                EventName::ConnectPeer,
                priority,
                move |_| order.lock().unwrap().push(label),
            );
        }

        bus.trigger(EventBody::ConnectPeer {
            peer_id: PeerId::from("p1"),
        });
        assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let bus = EventSystem::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = order.clone();
            bus.register(label)
                .on(EventName::ConnectPeer, move |_| {
                    order.lock().unwrap().push(label)
                });
        }

        bus.trigger(EventBody::ConnectPeer {
            peer_id: PeerId::from("p1"),
        });
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_wildcard_listener_runs_after_named() {
        let bus = EventSystem::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        {
            let order = order.clone();
            bus.register("wild").on_with_priority(
                EventName::Wildcard,
                100,
                move |_| order.lock().unwrap().push("wild"),
            );
        }
        {
            let order = order.clone();
            bus.register("named")
                .on(EventName::DeleteGameObject, move |_| {
                    order.lock().unwrap().push("named")
                });
        }

        bus.trigger(EventBody::DeleteGameObject {
            identifier: ObjectId::from("x1"),
        });
        assert_eq!(*order.lock().unwrap(), vec!["named", "wild"]);
    }

    #[test]
    fn test_panicking_listener_does_not_abort_dispatch() {
        let bus = EventSystem::new();
        {
            bus.register("bad").on_with_priority(
                EventName::ConnectPeer,
                10,
                |_| panic!("listener exploded"),
            );
        }
        let log = recorded(&bus, "good", EventName::ConnectPeer);

        bus.trigger(EventBody::ConnectPeer {
            peer_id: PeerId::from("p1"),
        });
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unregister_owner() {
        let bus = EventSystem::new();
        let log = recorded(&bus, "gone", EventName::ConnectPeer);

        bus.unregister("gone");
        bus.trigger(EventBody::ConnectPeer {
            peer_id: PeerId::from("p1"),
        });
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unregister_event_keeps_other_subscriptions() {
        let bus = EventSystem::new();
        let connect_log = recorded(&bus, "owner", EventName::ConnectPeer);
        let delete_log = recorded(&bus, "owner", EventName::DeleteGameObject);

        bus.unregister_event("owner", EventName::ConnectPeer);
        bus.trigger(EventBody::ConnectPeer {
            peer_id: PeerId::from("p1"),
        });
        bus.trigger(EventBody::DeleteGameObject {
            identifier: ObjectId::from("x1"),
        });

        assert!(connect_log.lock().unwrap().is_empty());
        assert_eq!(delete_log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_trigger_remote_origin_flags() {
        let bus = EventSystem::new();
        let log = recorded(&bus, "test", EventName::UpdateGameObject);

        let context = EventContext {
            body: EventBody::UpdateGameObject {
                snapshot: crate::core_store::game_object::ObjectSnapshot {
                    identifier: ObjectId::from("x1"),
                    alias_name: "card".to_string(),
                    major_version: 1,
                    minor_version: 0.5,
                    sync_data: Default::default(),
                },
            },
            send_from: PeerId::from("someone-else"),
        };
        bus.trigger_remote(context);

        let events = log.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_send_from_self());
        assert_eq!(events[0].send_from(), &PeerId::from("someone-else"));
    }

    #[test]
    fn test_listener_can_trigger_during_dispatch() {
        let bus = EventSystem::new();
        let delete_log = recorded(&bus, "test", EventName::DeleteGameObject);

        {
            let inner = bus.clone();
            bus.register("chain").on(EventName::ConnectPeer, move |_| {
                inner.trigger(EventBody::DeleteGameObject {
                    identifier: ObjectId::from("x1"),
                });
            });
        }

        bus.trigger(EventBody::ConnectPeer {
            peer_id: PeerId::from("p1"),
        });
        assert_eq!(delete_log.lock().unwrap().len(), 1);
    }
}
