/*
    Convergence tests - whole-mesh replica convergence

    After a bounded number of catalog exchanges and fetch rounds with no
    further disconnects, every peer's catalog must contain identical
    (identifier, version) pairs for all non-tombstoned identifiers.
*/

use crate::core_network::connection::Connection;
use crate::core_network::memory_mesh::MemoryMesh;
use crate::core_store::game_object::{GameObject, ObjectId, ObjectSnapshot};
use crate::core_store::sync_entity::SyncEntity;
use crate::test_utils::{settle, TestPeer};
use serde_json::json;

fn seeded_card(id: &str, major: u64, minor: f64, name: &str) -> Box<dyn GameObject> {
    let mut entity = SyncEntity::new("card", ObjectId::from(id));
    let mut snapshot: ObjectSnapshot = entity.to_snapshot();
    snapshot.major_version = major;
    snapshot.minor_version = minor;
    snapshot.sync_data.insert("name".to_string(), json!(name));
    entity.apply(&snapshot);
    Box::new(entity)
}

#[test]
fn test_two_peers_with_disjoint_and_overlapping_objects_converge() {
    let mesh = MemoryMesh::new();
    let a = TestPeer::join(&mesh, "alice");
    let b = TestPeer::join(&mesh, "bob");

    // disjoint objects plus one shared identifier with divergent versions
    a.store.add(seeded_card("a1", 1, 0.1, "a-one"), false).unwrap();
    a.store.add(seeded_card("a2", 4, 0.4, "a-two"), false).unwrap();
    a.store.add(seeded_card("shared", 3, 0.5, "newer"), false).unwrap();
    b.store.add(seeded_card("b1", 2, 0.2, "b-one"), false).unwrap();
    b.store.add(seeded_card("shared", 1, 0.5, "older"), false).unwrap();

    a.endpoint.connect(&b.peer_id);
    settle(&mesh, &[&a, &b]);

    let catalog_a = a.store.get_catalog();
    let catalog_b = b.store.get_catalog();
    assert_eq!(catalog_a.len(), 4);
    assert_eq!(catalog_a, catalog_b);

    // the divergent identifier resolved to the higher version everywhere
    for peer in [&a, &b] {
        let object = peer.store.get(&ObjectId::from("shared")).unwrap();
        let object = object.read().unwrap();
        assert!((object.version() - 3.5).abs() < 1e-9);
        assert_eq!(object.to_snapshot().sync_data["name"], json!("newer"));
    }
}

#[test]
fn test_full_mesh_of_three_peers_converges() {
    let mesh = MemoryMesh::new();
    let a = TestPeer::join(&mesh, "alice");
    let b = TestPeer::join(&mesh, "bob");
    let c = TestPeer::join(&mesh, "carol");

    a.store.add(seeded_card("a1", 1, 0.1, "from-a"), false).unwrap();
    b.store.add(seeded_card("b1", 1, 0.2, "from-b"), false).unwrap();
    c.store.add(seeded_card("c1", 1, 0.3, "from-c"), false).unwrap();

    a.endpoint.connect(&b.peer_id);
    a.endpoint.connect(&c.peer_id);
    b.endpoint.connect(&c.peer_id);
    settle(&mesh, &[&a, &b, &c]);

    let catalog_a = a.store.get_catalog();
    assert_eq!(catalog_a.len(), 3);
    assert_eq!(catalog_a, b.store.get_catalog());
    assert_eq!(catalog_a, c.store.get_catalog());
}

#[test]
fn test_field_update_propagates_after_convergence() {
    let mesh = MemoryMesh::new();
    let a = TestPeer::join(&mesh, "alice");
    let b = TestPeer::join(&mesh, "bob");
    let c = TestPeer::join(&mesh, "carol");

    a.store.add(seeded_card("a1", 1, 0.1, "original"), false).unwrap();
    a.endpoint.connect(&b.peer_id);
    a.endpoint.connect(&c.peer_id);
    b.endpoint.connect(&c.peer_id);
    settle(&mesh, &[&a, &b, &c]);

    a.store
        .set_field(&ObjectId::from("a1"), "name", json!("renamed"))
        .unwrap();
    settle(&mesh, &[&a, &b, &c]);

    for peer in [&a, &b, &c] {
        let object = peer.store.get(&ObjectId::from("a1")).unwrap();
        let object = object.read().unwrap();
        assert_eq!(object.to_snapshot().sync_data["name"], json!("renamed"));
        assert_eq!(object.major_version(), 2);
    }
    assert_eq!(a.store.get_catalog(), b.store.get_catalog());
    assert_eq!(a.store.get_catalog(), c.store.get_catalog());
}

#[test]
fn test_late_joiner_catches_up() {
    let mesh = MemoryMesh::new();
    let a = TestPeer::join(&mesh, "alice");
    let b = TestPeer::join(&mesh, "bob");

    for (id, name) in [("a1", "one"), ("a2", "two"), ("a3", "three")] {
        a.store.add(seeded_card(id, 1, 0.5, name), false).unwrap();
    }
    a.endpoint.connect(&b.peer_id);
    settle(&mesh, &[&a, &b]);

    let c = TestPeer::join(&mesh, "carol");
    c.endpoint.connect(&a.peer_id);
    c.endpoint.connect(&b.peer_id);
    settle(&mesh, &[&a, &b, &c]);

    assert_eq!(c.store.get_catalog(), a.store.get_catalog());
    assert_eq!(c.store.get_catalog().len(), 3);
}
