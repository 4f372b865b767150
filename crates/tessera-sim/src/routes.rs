//! Admin routes served by simulated nodes.

use serde_json::{Map, Value, json};
use tessera_admin::{AdminError, Method};
use tessera_types::{EntityKind, Endpoint, Identifier, NamespaceKind, ShardSet, is_conflict_marker};

use crate::state::SimState;

/// Fields a client may overwrite with a full namespace update.
const NAMESPACE_FIELDS: [&str; 8] = [
    "name",
    "port",
    "primary_uuid",
    "replica_affinities",
    "shards",
    "primary_pinnings",
    "secondary_pinnings",
    "blueprint",
];

fn not_found() -> AdminError {
    AdminError::RequestFailed {
        status: 404,
        reason: "Not Found".to_string(),
    }
}

fn bad_request(reason: impl Into<String>) -> AdminError {
    AdminError::RequestFailed {
        status: 400,
        reason: reason.into(),
    }
}

fn writable(kind: EntityKind, field: &str) -> bool {
    match kind {
        EntityKind::Machine => matches!(field, "name" | "datacenter_uuid"),
        EntityKind::Datacenter => field == "name",
        EntityKind::Namespace(_) => NAMESPACE_FIELDS.contains(&field),
    }
}

impl SimState {
    pub(crate) fn handle(
        &mut self,
        endpoint: &Endpoint,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, AdminError> {
        let port = endpoint.peer_port;
        if !self.nodes.get(&port).is_some_and(|node| node.running) {
            return Err(AdminError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let Some((&"ajax", rest)) = segments.split_first() else {
            return Err(not_found());
        };

        let response = match (method, rest) {
            (Method::Get, []) => self.snapshot(port),
            (Method::Get, ["me"]) => Ok(json!(self.nodes[&port].id.to_string())),
            (Method::Get, [prefix, id]) => {
                let (kind, id) = target(prefix, id)?;
                self.nodes[&port].metadata.render_entity(kind, id).ok_or_else(not_found)
            }
            (Method::Post, [prefix, "new"]) => self.create(port, prefix, body),
            (Method::Post, [prefix, id]) => {
                let (kind, id) = target(prefix, id)?;
                self.update(port, kind, id, body)
            }
            (Method::Post, [prefix, id, field]) => {
                let (kind, id) = target(prefix, id)?;
                if !writable(kind, field) {
                    return Err(not_found());
                }
                let value = body.ok_or_else(|| bad_request("missing body"))?.clone();
                self.write(port, kind, id, field, value)?;
                Ok(Value::Null)
            }
            (Method::Get, [prefix, id, field, "resolve"]) => {
                let (kind, id) = target(prefix, id)?;
                let state = self.nodes[&port].metadata.field(kind, id, field).ok_or_else(not_found)?;
                Ok(state.listing())
            }
            (Method::Post, [prefix, id, field, "resolve"]) => {
                let (kind, id) = target(prefix, id)?;
                let value = body.ok_or_else(|| bad_request("missing body"))?.clone();
                let listing = self.nodes[&port].metadata.field(kind, id, field).ok_or_else(not_found)?.listing();
                let known = listing
                    .as_array()
                    .is_some_and(|entries| entries.iter().any(|entry| entry.get(1) == Some(&value)));
                if !known {
                    return Err(bad_request("value is not a candidate"));
                }
                self.write(port, kind, id, field, value)?;
                Ok(Value::Null)
            }
            _ => Err(not_found()),
        };
        self.gossip();
        response
    }

    fn snapshot(&self, port: u16) -> Result<Value, AdminError> {
        let node = &self.nodes[&port];
        let mut snapshot = Map::new();
        for kind in EntityKind::ALL {
            snapshot.insert(kind.route_prefix().to_string(), node.metadata.render_collection(kind));
        }
        snapshot.insert("me".to_string(), json!(node.id.to_string()));
        Ok(Value::Object(snapshot))
    }

    fn write(&mut self, port: u16, kind: EntityKind, id: Identifier, field: &str, value: Value) -> Result<(), AdminError> {
        let node = self.nodes.get_mut(&port).ok_or_else(not_found)?;
        if !node.metadata.contains(kind, id) {
            return Err(not_found());
        }
        node.metadata.write(&mut self.versions, kind, id, field, value);
        Ok(())
    }

    fn create(&mut self, port: u16, prefix: &str, body: Option<&Value>) -> Result<Value, AdminError> {
        let kind = EntityKind::from_route_prefix(prefix).ok_or_else(not_found)?;
        let body = body
            .and_then(Value::as_object)
            .ok_or_else(|| bad_request("expected a JSON object"))?;
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_request("missing name"))?;

        let fields: Vec<(&str, Value)> = match kind {
            EntityKind::Machine => return Err(not_found()),
            EntityKind::Datacenter => vec![("name", json!(name))],
            EntityKind::Namespace(namespace_kind) => namespace_fields(namespace_kind, name, body)?,
        };

        let id = Identifier::random();
        let node = self.nodes.get_mut(&port).ok_or_else(not_found)?;
        for (field, value) in fields {
            node.metadata.write(&mut self.versions, kind, id, field, value);
        }
        let rendered = node.metadata.render_entity(kind, id).unwrap_or(Value::Null);
        Ok(json!({ id.to_string(): rendered }))
    }

    /// Full namespace update; unchanged and disputed fields are left alone.
    fn update(&mut self, port: u16, kind: EntityKind, id: Identifier, body: Option<&Value>) -> Result<Value, AdminError> {
        if kind.namespace_kind().is_none() {
            return Err(not_found());
        }
        let body = body
            .and_then(Value::as_object)
            .ok_or_else(|| bad_request("expected a JSON object"))?;
        for (field, value) in body {
            if !writable(kind, field) {
                continue;
            }
            let current = self.nodes[&port].metadata.field(kind, id, field);
            let unchanged = current.is_some_and(|state| state.is_conflicted() || state.render() == *value);
            if !unchanged {
                self.write(port, kind, id, field, value.clone())?;
            }
        }
        Ok(Value::Null)
    }
}

fn target(prefix: &str, id: &str) -> Result<(EntityKind, Identifier), AdminError> {
    let kind = EntityKind::from_route_prefix(prefix).ok_or_else(not_found)?;
    let id = Identifier::parse(id).map_err(|_| not_found())?;
    Ok((kind, id))
}

fn namespace_fields(
    kind: NamespaceKind,
    name: &str,
    body: &Map<String, Value>,
) -> Result<Vec<(&'static str, Value)>, AdminError> {
    let port = body
        .get("port")
        .filter(|port| port.as_u64().is_some())
        .cloned()
        .ok_or_else(|| bad_request("missing port"))?;
    let primary = body.get("primary_uuid").cloned().unwrap_or(Value::Null);
    let affinities = body.get("replica_affinities").cloned().unwrap_or_else(|| json!({}));
    if is_conflict_marker(&primary) || !affinities.is_object() {
        return Err(bad_request("malformed namespace"));
    }
    Ok(vec![
        ("name", json!(name)),
        ("port", port),
        ("primary_uuid", primary),
        ("replica_affinities", affinities),
        ("shards", ShardSet::whole(kind).to_json()),
        ("primary_pinnings", json!({})),
        ("secondary_pinnings", json!({})),
        ("blueprint", json!({"peers_roles": {}})),
    ])
}
