/*
    tangram-core - Replication core for a serverless shared-tabletop mesh

    A mesh of peers, with no central server, converges on a common set of
    versioned game objects (cards, tokens, documents) despite peers joining,
    leaving, and dropping connections at arbitrary times.

    Subsystems:
    - core_identity: content-addressed peer/room identifiers
    - core_event: priority-ordered pub/sub bridging local and network events
    - core_store: the versioned object registry with tombstone GC
    - core_sync: catalog-based anti-entropy synchronizer and fetch tasks
    - core_network: the transport capability boundary + in-memory mesh
*/

pub mod config;
pub mod core_event;
pub mod core_identity;
pub mod core_network;
pub mod core_store;
pub mod core_sync;
pub mod driver;
pub mod logging;
pub mod test_utils;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use core_event::{Event, EventBody, EventContext, EventName, EventSystem, Listener};
pub use core_identity::{PeerContext, PeerId, SessionGrade, SessionState};
pub use core_network::{Connection, ConnectionCallback, MemoryMesh, MeshEndpoint};
pub use core_store::{
    ApplyOutcome, CatalogEntry, GameObject, ObjectFactory, ObjectId, ObjectSnapshot, ObjectStore,
    StoreConfig, StoreError, StoreResult, SyncEntity,
};
pub use core_sync::{ObjectSynchronizer, SyncConfig, SyncRequest};
pub use driver::{DriverConfig, SyncDriver};
pub use logging::{init_logging, LogLevel};
