/*
    core_sync - Catalog-based anti-entropy

    Peers advertise (identifier, version) catalogs on connect; the
    synchronizer compares them against local state, merges the gaps into a
    shared request pool, and drains the pool through bounded-concurrency
    per-peer fetch tasks with TTL-based retry and inactivity timeouts.
*/

pub mod request;
pub mod synchronizer;
pub mod task;

#[cfg(test)]
pub mod tests;

pub use request::SyncRequest;
pub use synchronizer::{ObjectSynchronizer, SyncConfig, SyncStats};
pub use task::{SynchronizeTask, TaskId};
