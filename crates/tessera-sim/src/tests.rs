//! Unit tests for the simulated cluster.

use serde_json::{Value, json};
use tessera_admin::{AdminClient, AdminError, Method, NodeHandle, NodeLauncher, NodeSpec, PathBlocker};
use tessera_types::{CONFLICT_MARKER, EntityKind, Endpoint, Identifier};
use test_case::test_case;

use crate::SimCluster;

// ============================================================================
// Test Helpers
// ============================================================================

fn endpoint(peer_port: u16) -> Endpoint {
    Endpoint::new("localhost", peer_port, peer_port + 1000)
}

fn spec(n: u16, join: Option<u16>) -> NodeSpec {
    NodeSpec {
        host: "localhost".to_string(),
        peer_port: 30_000 + n,
        local_peer_port: 29_999 - n,
        port_offset: n,
        name: None,
        join: join.map(endpoint),
        restart: false,
    }
}

fn restart(n: u16) -> NodeSpec {
    NodeSpec {
        restart: true,
        ..spec(n, None)
    }
}

/// Starts `count` nodes, each joining the first.
fn start_nodes(sim: &SimCluster, count: u16) -> Vec<Box<dyn NodeHandle>> {
    (0..count)
        .map(|n| {
            let join = (n > 0).then_some(30_000);
            sim.start(&spec(n, join)).unwrap()
        })
        .collect()
}

fn snapshot(sim: &SimCluster, peer_port: u16) -> Value {
    let mut raw = sim.get(&endpoint(peer_port), "/ajax").unwrap();
    raw.as_object_mut().unwrap().remove("me");
    raw
}

fn create_datacenter(sim: &SimCluster, peer_port: u16, name: &str) -> Identifier {
    let created = sim
        .post(&endpoint(peer_port), "/ajax/datacenters/new", &json!({"name": name}))
        .unwrap();
    let (id, _) = created.as_object().unwrap().iter().next().unwrap();
    Identifier::parse(id).unwrap()
}

fn cut(sim: &SimCluster, a: u16, b: u16) {
    sim.block(29_999 - a, 30_000 + b).unwrap();
    sim.block(29_999 - b, 30_000 + a).unwrap();
}

fn heal(sim: &SimCluster, a: u16, b: u16) {
    sim.unblock(29_999 - a, 30_000 + b).unwrap();
    sim.unblock(29_999 - b, 30_000 + a).unwrap();
}

// ============================================================================
// Membership and gossip
// ============================================================================

#[test]
fn joined_nodes_share_a_view() {
    let sim = SimCluster::new();
    let _nodes = start_nodes(&sim, 3);

    assert_eq!(sim.components().len(), 1);
    let first = snapshot(&sim, 30_000);
    assert_eq!(first["machines"].as_object().unwrap().len(), 3);
    assert_eq!(snapshot(&sim, 30_002), first);

    let me = sim.get(&endpoint(30_001), "/ajax/me").unwrap();
    assert_eq!(me, json!(sim.node_id(30_001).unwrap().to_string()));
}

#[test]
fn unjoined_nodes_stay_apart() {
    let sim = SimCluster::new();
    let _a = sim.start(&spec(0, None)).unwrap();
    let _b = sim.start(&spec(1, None)).unwrap();
    assert_eq!(sim.components().len(), 2);
}

#[test]
fn writes_propagate_within_component_only() {
    let sim = SimCluster::new();
    let _nodes = start_nodes(&sim, 2);
    let dc = create_datacenter(&sim, 30_000, "dc");

    cut(&sim, 0, 1);
    assert_eq!(sim.components().len(), 2);
    sim.post(&endpoint(30_000), &format!("/ajax/datacenters/{dc}/name"), &json!("east"))
        .unwrap();
    assert_eq!(sim.field(30_000, EntityKind::Datacenter, dc, "name"), Some(json!("east")));
    assert_eq!(sim.field(30_001, EntityKind::Datacenter, dc, "name"), Some(json!("dc")));

    heal(&sim, 0, 1);
    assert_eq!(sim.field(30_001, EntityKind::Datacenter, dc, "name"), Some(json!("east")));
    assert!(sim.blocked_paths().is_empty());
}

#[test]
fn one_blocked_direction_is_enough_to_partition() {
    let sim = SimCluster::new();
    let _nodes = start_nodes(&sim, 2);
    sim.block(29_999, 30_001).unwrap();
    assert_eq!(sim.components().len(), 2);
}

// ============================================================================
// Conflicts
// ============================================================================

#[test]
fn concurrent_renames_conflict_and_resolve() {
    let sim = SimCluster::new();
    let _nodes = start_nodes(&sim, 2);
    let dc = create_datacenter(&sim, 30_000, "dc");
    let name_path = format!("/ajax/datacenters/{dc}/name");

    cut(&sim, 0, 1);
    sim.post(&endpoint(30_000), &name_path, &json!("east")).unwrap();
    sim.post(&endpoint(30_001), &name_path, &json!("west")).unwrap();
    heal(&sim, 0, 1);

    assert_eq!(snapshot(&sim, 30_000)["datacenters"][dc.to_string()]["name"], json!(CONFLICT_MARKER));
    let listing = sim.get(&endpoint(30_001), &format!("{name_path}/resolve")).unwrap();
    let candidates: Vec<&Value> = listing.as_array().unwrap().iter().map(|pair| &pair[1]).collect();
    assert_eq!(candidates.len(), 2);
    assert!(candidates.contains(&&json!("east")) && candidates.contains(&&json!("west")));

    let rejected = sim.post(&endpoint(30_000), &format!("{name_path}/resolve"), &json!("north"));
    assert!(matches!(rejected, Err(AdminError::RequestFailed { status: 400, .. })));

    sim.post(&endpoint(30_000), &format!("{name_path}/resolve"), &json!("west"))
        .unwrap();
    assert_eq!(sim.field(30_001, EntityKind::Datacenter, dc, "name"), Some(json!("west")));
}

#[test]
fn namespace_update_skips_unchanged_fields() {
    let sim = SimCluster::new();
    let _nodes = start_nodes(&sim, 2);
    let created = sim
        .post(
            &endpoint(30_000),
            "/ajax/dummy_namespaces/new",
            &json!({"name": "ns", "port": 11_211, "primary_uuid": null, "replica_affinities": {}}),
        )
        .unwrap();
    let (id, body) = created.as_object().unwrap().iter().next().unwrap();
    let id = Identifier::parse(id).unwrap();
    assert_eq!(body["shards"], json!(["{a, b, c, d, e, f, g, h, i, j, k, l, m, n, o, p, q, r, s, t, u, v, w, x, y, z}"]));

    cut(&sim, 0, 1);
    let mut update = body.clone();
    update["port"] = json!(11_300);
    sim.post(&endpoint(30_000), &format!("/ajax/dummy_namespaces/{id}"), &update)
        .unwrap();
    sim.post(&endpoint(30_001), &format!("/ajax/dummy_namespaces/{id}/name"), &json!("renamed"))
        .unwrap();
    heal(&sim, 0, 1);

    let merged = &snapshot(&sim, 30_001)["dummy_namespaces"][id.to_string()];
    assert_eq!(merged["port"], json!(11_300));
    assert_eq!(merged["name"], json!("renamed"));
}

// ============================================================================
// Node lifecycle and faults
// ============================================================================

#[test]
fn stopped_node_is_unreachable_until_restarted() {
    let sim = SimCluster::new();
    let mut nodes = start_nodes(&sim, 2);
    let id = sim.node_id(30_001).unwrap();

    nodes[1].stop().unwrap();
    assert!(!nodes[1].is_alive());
    assert!(matches!(
        sim.get(&endpoint(30_001), "/ajax"),
        Err(AdminError::Unreachable { .. })
    ));

    let dc = create_datacenter(&sim, 30_000, "while-down");
    assert!(sim.start(&spec(1, None)).is_err(), "fresh start over existing data");
    let _restarted = sim.start(&restart(1)).unwrap();
    assert_eq!(sim.node_id(30_001), Some(id));
    assert!(sim.entity_ids(30_001, EntityKind::Datacenter).contains(&dc));
}

#[test]
fn destroy_forgets_the_node() {
    let sim = SimCluster::new();
    let mut nodes = start_nodes(&sim, 1);
    nodes[0].destroy().unwrap();
    assert_eq!(sim.node_count(), 0);
}

#[test]
fn injected_faults_fire_once() {
    let sim = SimCluster::new();
    sim.fail_next_start();
    assert!(sim.start(&spec(0, None)).is_err());
    assert!(sim.start(&spec(0, None)).is_ok());
    assert!(sim.start(&restart(0)).is_err(), "port already in use");
    assert!(sim.start(&restart(1)).is_err(), "nothing to restart");

    sim.fail_paths_after(1);
    assert!(sim.block(1, 2).is_ok());
    assert!(sim.block(3, 4).is_err());
    assert!(sim.block(3, 4).is_ok());
    assert_eq!(sim.path_calls(), 3);
}

#[test_case(Method::Get, "/ajax/nothing/here"; "unknown collection")]
#[test_case(Method::Get, "/status"; "outside ajax")]
#[test_case(Method::Post, "/ajax/machines/new"; "machines cannot be created")]
#[test_case(Method::Get, "/ajax/datacenters/00000000-0000-0000-0000-000000000000"; "unknown entity")]
fn unknown_routes_are_not_found(method: Method, path: &str) {
    let sim = SimCluster::new();
    let _nodes = start_nodes(&sim, 1);
    let result = sim.request(&endpoint(30_000), method, path, Some(&json!({"name": "x"})));
    assert!(matches!(result, Err(AdminError::RequestFailed { status: 404, .. })));
}
