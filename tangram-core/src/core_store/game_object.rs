//! The object model the registry replicates.
//!
//! Objects carry a two-part version: an integer `major_version` bumped on
//! every mutation, plus a small random fractional `minor_version` re-rolled
//! at the same time. The fraction acts as a tiebreaker so that two
//! independent mutations of the same object on different peers almost never
//! compare equal; `incoming version > local version` is the sole conflict
//! rule in the system.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque object identifier
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        ObjectId(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        ObjectId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        ObjectId(s.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        ObjectId(s)
    }
}

/// Immutable wire projection of an object: the only form in which object
/// state crosses the network or enters the registry from outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub identifier: ObjectId,
    pub alias_name: String,
    pub major_version: u64,
    pub minor_version: f64,
    pub sync_data: BTreeMap<String, Value>,
}

impl ObjectSnapshot {
    /// Effective version used for all comparisons
    pub fn version(&self) -> f64 {
        self.major_version as f64 + self.minor_version
    }

    /// Fold a newer snapshot of the same object into this one. Used by the
    /// coalesced update queue: later field values win, the version advances
    /// to the newer snapshot's.
    pub fn merge_from(&mut self, newer: &ObjectSnapshot) {
        for (key, value) in &newer.sync_data {
            self.sync_data.insert(key.clone(), value.clone());
        }
        self.major_version = newer.major_version;
        self.minor_version = newer.minor_version;
    }
}

/// One line of a peer's advertised catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub identifier: ObjectId,
    pub version: f64,
}

/// Outcome of applying a remote snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The snapshot was newer and has been applied
    Applied,
    /// The snapshot lost the version comparison; local state is unchanged
    Stale,
}

/// A replicated object as seen by the registry.
///
/// Implementations produce snapshots for the wire and accept them back;
/// the version gate inside `apply` keeps the locally observed version
/// monotonically non-decreasing.
pub trait GameObject: Send + Sync + std::fmt::Debug {
    fn identifier(&self) -> &ObjectId;

    /// Type tag used for alias-indexed lookup and factory construction
    fn alias_name(&self) -> &str;

    fn major_version(&self) -> u64;

    fn minor_version(&self) -> f64;

    fn version(&self) -> f64 {
        self.major_version() as f64 + self.minor_version()
    }

    fn to_snapshot(&self) -> ObjectSnapshot;

    /// Apply a snapshot if it is strictly newer than the local state.
    fn apply(&mut self, snapshot: &ObjectSnapshot) -> ApplyOutcome;

    /// Route one field mutation through the object's schema, bumping the
    /// version. Returns the reserved-field error for forbidden paths.
    fn set_field(&mut self, name: &str, value: Value) -> crate::core_store::StoreResult<()>;

    /// Called after the object is indexed by the registry
    fn on_store_added(&mut self) {}

    /// Called after the object is de-indexed
    fn on_store_removed(&mut self) {}
}
