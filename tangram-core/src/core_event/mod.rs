/*
    core_event - Priority-ordered pub/sub bridging local and network events

    Every locally triggered event can be mirrored to remote peers through
    the Connection collaborator, and every envelope received from the
    network is re-triggered locally as if it had happened here, tagged with
    its true origin. The bus is the sole bridge between transport callbacks
    and application logic.
*/

pub mod event;
pub mod event_system;
pub mod listener;

pub use event::{Event, EventBody, EventContext, EventName};
pub use event_system::EventSystem;
pub use listener::{EventCallback, Listener};
