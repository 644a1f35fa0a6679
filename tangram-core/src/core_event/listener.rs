//! Subscription handles.

use crate::core_event::event::{Event, EventName};
use crate::core_event::event_system::EventSystem;
use std::sync::Arc;

/// Callback invoked on dispatch. Must not assume exclusive access to any
/// component lock held by the code that triggered the event.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

pub(crate) struct Subscription {
    pub owner: String,
    pub priority: i32,
    /// Registration order, used as a stable tiebreaker for equal priorities
    pub seq: u64,
    pub callback: EventCallback,
}

/// Chainable registration handle scoped to one owner key. Dropping the
/// handle does not unsubscribe; use `EventSystem::unregister`.
pub struct Listener<'a> {
    pub(crate) system: &'a EventSystem,
    pub(crate) owner: String,
}

impl<'a> Listener<'a> {
    /// Subscribe with default priority 0.
    pub fn on<F>(self, name: EventName, callback: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.on_with_priority(name, 0, callback)
    }

    /// Subscribe with an explicit priority; higher priorities run first.
    pub fn on_with_priority<F>(self, name: EventName, priority: i32, callback: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.system
            .subscribe(&self.owner, name, priority, Arc::new(callback));
        self
    }
}
