//! Schema-driven game object.
//!
//! Synchronized state lives in a plain field map; every mutation routes
//! through `set_field`, which bumps the major version and re-rolls the
//! fractional tiebreaker. There is no field-level interception anywhere
//! else in the system.

use crate::core_store::errors::{StoreError, StoreResult};
use crate::core_store::game_object::{ApplyOutcome, GameObject, ObjectId, ObjectSnapshot};
use rand::Rng;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Field paths that must never be accepted from a remote snapshot.
const RESERVED_FIELDS: [&str; 3] = ["__proto__", "constructor", "prototype"];

pub(crate) fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

/// Generic versioned object holding its synchronized fields as a map.
///
/// Domain-specific object types can wrap this or implement `GameObject`
/// themselves; the replication core only ever sees the trait.
#[derive(Debug, Clone)]
pub struct SyncEntity {
    identifier: ObjectId,
    alias_name: String,
    major_version: u64,
    minor_version: f64,
    sync_data: BTreeMap<String, Value>,
}

impl SyncEntity {
    pub fn new(alias_name: &str, identifier: ObjectId) -> Self {
        SyncEntity {
            identifier,
            alias_name: alias_name.to_string(),
            major_version: 0,
            minor_version: 0.0,
            sync_data: BTreeMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.sync_data.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.sync_data
    }

    fn bump_version(&mut self) {
        self.major_version += 1;
        // fractional tiebreaker: independent mutations on two peers almost
        // never produce equal versions
        self.minor_version = rand::rng().random::<f64>();
    }
}

impl GameObject for SyncEntity {
    fn identifier(&self) -> &ObjectId {
        &self.identifier
    }

    fn alias_name(&self) -> &str {
        &self.alias_name
    }

    fn major_version(&self) -> u64 {
        self.major_version
    }

    fn minor_version(&self) -> f64 {
        self.minor_version
    }

    fn to_snapshot(&self) -> ObjectSnapshot {
        ObjectSnapshot {
            identifier: self.identifier.clone(),
            alias_name: self.alias_name.clone(),
            major_version: self.major_version,
            minor_version: self.minor_version,
            sync_data: self.sync_data.clone(),
        }
    }

    fn apply(&mut self, snapshot: &ObjectSnapshot) -> ApplyOutcome {
        if snapshot.version() <= self.version() {
            return ApplyOutcome::Stale;
        }

        self.major_version = snapshot.major_version;
        self.minor_version = snapshot.minor_version;
        self.sync_data.clear();
        for (name, value) in &snapshot.sync_data {
            if is_reserved_field(name) {
                warn!(identifier = %self.identifier, field = %name, "skipping reserved field from remote snapshot");
                continue;
            }
            self.sync_data.insert(name.clone(), value.clone());
        }
        ApplyOutcome::Applied
    }

    fn set_field(&mut self, name: &str, value: Value) -> StoreResult<()> {
        if is_reserved_field(name) {
            return Err(StoreError::ReservedField {
                identifier: self.identifier.clone(),
                field: name.to_string(),
            });
        }
        self.sync_data.insert(name.to_string(), value);
        self.bump_version();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn snapshot_with_version(entity: &SyncEntity, major: u64, minor: f64) -> ObjectSnapshot {
        let mut snap = entity.to_snapshot();
        snap.major_version = major;
        snap.minor_version = minor;
        snap
    }

    #[test]
    fn test_set_field_bumps_version() {
        let mut card = SyncEntity::new("card", ObjectId::from("x1"));
        assert_eq!(card.major_version(), 0);

        card.set_field("name", json!("Ace of Spades")).unwrap();
        assert_eq!(card.major_version(), 1);
        assert!(card.minor_version() >= 0.0 && card.minor_version() < 1.0);
        assert_eq!(card.field("name"), Some(&json!("Ace of Spades")));
    }

    #[test]
    fn test_set_field_rejects_reserved() {
        let mut card = SyncEntity::new("card", ObjectId::from("x1"));
        let err = card.set_field("__proto__", json!("evil")).unwrap_err();
        assert!(matches!(err, StoreError::ReservedField { .. }));
        assert_eq!(card.major_version(), 0);
    }

    #[test]
    fn test_apply_stale_is_noop() {
        let mut card = SyncEntity::new("card", ObjectId::from("x1"));
        card.set_field("name", json!("local")).unwrap();

        let stale = snapshot_with_version(&card, 0, 0.5);
        assert_eq!(card.apply(&stale), ApplyOutcome::Stale);
        assert_eq!(card.field("name"), Some(&json!("local")));
    }

    #[test]
    fn test_apply_equal_version_is_noop() {
        let mut card = SyncEntity::new("card", ObjectId::from("x1"));
        let same = snapshot_with_version(&card, 0, 0.0);
        assert_eq!(card.apply(&same), ApplyOutcome::Stale);
    }

    #[test]
    fn test_apply_newer_replaces_fields() {
        let mut card = SyncEntity::new("card", ObjectId::from("x1"));
        card.set_field("name", json!("old")).unwrap();
        card.set_field("face_up", json!(true)).unwrap();

        let mut incoming = snapshot_with_version(&card, card.major_version() + 1, 0.25);
        incoming.sync_data.clear();
        incoming.sync_data.insert("name".into(), json!("new"));

        assert_eq!(card.apply(&incoming), ApplyOutcome::Applied);
        assert_eq!(card.field("name"), Some(&json!("new")));
        // wholesale replacement: fields absent from the snapshot are gone
        assert_eq!(card.field("face_up"), None);
    }

    #[test]
    fn test_apply_skips_reserved_fields_but_applies_rest() {
        let mut card = SyncEntity::new("card", ObjectId::from("x1"));
        let mut incoming = snapshot_with_version(&card, 3, 0.1);
        incoming.sync_data.insert("__proto__".into(), json!("evil"));
        incoming.sync_data.insert("name".into(), json!("ok"));

        assert_eq!(card.apply(&incoming), ApplyOutcome::Applied);
        assert_eq!(card.field("__proto__"), None);
        assert_eq!(card.field("name"), Some(&json!("ok")));
        assert_eq!(card.major_version(), 3);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut card = SyncEntity::new("card", ObjectId::from("x1"));
        card.set_field("suit", json!("hearts")).unwrap();

        let snap = card.to_snapshot();
        let encoded = serde_json::to_string(&snap).unwrap();
        let decoded: ObjectSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(snap, decoded);
    }

    proptest! {
        /// Version monotonicity: whatever sequence of snapshots arrives,
        /// the locally observed version never decreases.
        #[test]
        fn prop_version_monotonic(versions in prop::collection::vec((0u64..20, 0.0f64..1.0), 1..40)) {
            let mut card = SyncEntity::new("card", ObjectId::from("x1"));
            let mut observed = card.version();

            for (major, minor) in versions {
                let snap = snapshot_with_version(&card, major, minor);
                card.apply(&snap);
                let now = card.version();
                prop_assert!(now >= observed);
                observed = now;
            }
        }

        /// An apply only succeeds when strictly newer, and then adopts the
        /// incoming version exactly.
        #[test]
        fn prop_apply_gate(major in 0u64..5, minor in 0.0f64..1.0) {
            let mut card = SyncEntity::new("card", ObjectId::from("x1"));
            card.set_field("n", json!(1)).unwrap();
            let before = card.version();

            let snap = snapshot_with_version(&card, major, minor);
            let outcome = card.apply(&snap);
            if snap.version() > before {
                prop_assert_eq!(outcome, ApplyOutcome::Applied);
                prop_assert_eq!(card.version(), snap.version());
            } else {
                prop_assert_eq!(outcome, ApplyOutcome::Stale);
                prop_assert_eq!(card.version(), before);
            }
        }
    }
}
