/*
    core_store - The versioned object registry

    The authoritative local store of game objects, keyed by identifier and
    indexed by alias. Handles:
    - add/remove/soft-delete with tombstones
    - coalesced update broadcast
    - catalog projection for anti-entropy
    - time-boxed tombstone garbage collection
*/

pub mod errors;
pub mod game_object;
pub mod object_factory;
pub mod object_store;
pub mod sync_entity;

pub use errors::{StoreError, StoreResult};
pub use game_object::{ApplyOutcome, CatalogEntry, GameObject, ObjectId, ObjectSnapshot};
pub use object_factory::ObjectFactory;
pub use object_store::{ObjectStore, SharedObject, StoreConfig, StoreStats};
pub use sync_entity::SyncEntity;
