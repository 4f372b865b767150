use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::wire::{self, WireObject};
use crate::{EntityKind, Identifier, ModelError, TopologyEntity};

/// Network location of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    /// Port for cluster (peer) traffic.
    pub peer_port: u16,
    /// Port of the administrative HTTP interface.
    pub admin_port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, peer_port: u16, admin_port: u16) -> Self {
        Self {
            host: host.into(),
            peer_port,
            admin_port,
        }
    }

    /// Builds an endpoint whose admin port sits `offset` above the peer port.
    pub fn with_admin_offset(host: impl Into<String>, peer_port: u16, offset: u16) -> Option<Self> {
        let admin_port = peer_port.checked_add(offset)?;
        Some(Self::new(host, peer_port, admin_port))
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.admin_port)
    }
}

/// Everything known about a machine the controller can talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInfo {
    pub name: String,
    pub datacenter: Option<Identifier>,
    pub port_offset: u16,
    pub endpoint: Endpoint,
    /// Source port of outgoing peer connections; only set for locally started machines.
    pub local_peer_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MachineState {
    Placeholder,
    Known(MachineInfo),
}

/// A cluster node, either fully known or a placeholder learned from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    id: Identifier,
    state: MachineState,
}

impl Machine {
    pub fn placeholder(id: Identifier) -> Self {
        Self {
            id,
            state: MachineState::Placeholder,
        }
    }

    pub fn known(id: Identifier, info: MachineInfo) -> Self {
        Self {
            id,
            state: MachineState::Known(info),
        }
    }

    /// Decodes a machine from its `/ajax/machines/<id>` payload.
    ///
    /// Conflict-marked fields fall back to defaults until the conflict is resolved.
    pub fn from_wire(
        id: Identifier,
        payload: &WireObject,
        endpoint: Endpoint,
        local_peer_port: Option<u16>,
    ) -> Result<Self, ModelError> {
        let kind = EntityKind::Machine;
        let name = match wire::settled(payload, kind, "name")? {
            Some(value) => wire::decode_string("name", value)?,
            None => String::new(),
        };
        let datacenter = match wire::settled(payload, kind, "datacenter_uuid")? {
            Some(value) => wire::decode_optional_id("datacenter_uuid", value)?,
            None => None,
        };
        let port_offset = match wire::settled(payload, kind, "port_offset")? {
            Some(value) => wire::decode_port("port_offset", value)?,
            None => 0,
        };
        Ok(Self::known(
            id,
            MachineInfo {
                name,
                datacenter,
                port_offset,
                endpoint,
                local_peer_port,
            },
        ))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.state, MachineState::Placeholder)
    }

    pub fn info(&self) -> Option<&MachineInfo> {
        match &self.state {
            MachineState::Known(info) => Some(info),
            MachineState::Placeholder => None,
        }
    }

    pub fn info_mut(&mut self) -> Option<&mut MachineInfo> {
        match &mut self.state {
            MachineState::Known(info) => Some(info),
            MachineState::Placeholder => None,
        }
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.info().map(|info| &info.endpoint)
    }

    pub fn datacenter(&self) -> Option<Identifier> {
        self.info().and_then(|info| info.datacenter)
    }

    pub fn port_offset(&self) -> Option<u16> {
        self.info().map(|info| info.port_offset)
    }

    pub fn local_peer_port(&self) -> Option<u16> {
        self.info().and_then(|info| info.local_peer_port)
    }
}

impl TopologyEntity for Machine {
    fn id(&self) -> Identifier {
        self.id
    }

    fn owner_map_kind(&self) -> EntityKind {
        EntityKind::Machine
    }

    fn name(&self) -> Option<&str> {
        self.info().map(|info| info.name.as_str())
    }

    fn is_verifiable(&self) -> bool {
        !self.is_placeholder()
    }

    fn to_json(&self) -> Value {
        match &self.state {
            MachineState::Known(info) => json!({
                "datacenter_uuid": wire::encode_optional_id(info.datacenter),
                "name": info.name,
                "port_offset": info.port_offset,
            }),
            MachineState::Placeholder => json!({}),
        }
    }

    fn field_matches(&self, field: &str, remote: &Value) -> bool {
        let Some(info) = self.info() else {
            return true;
        };
        match field {
            "datacenter_uuid" => wire::decode_optional_id(field, remote).is_ok_and(|dc| dc == info.datacenter),
            "name" => remote.as_str() == Some(info.name.as_str()),
            "port_offset" => remote.as_u64() == Some(u64::from(info.port_offset)),
            _ => true,
        }
    }

    fn apply_field(&mut self, field: &str, value: &Value) -> Result<(), ModelError> {
        let info = self.info_mut().ok_or_else(|| ModelError::InvalidField {
            field: field.to_string(),
            reason: "placeholder machines carry no fields".to_string(),
        })?;
        match field {
            "datacenter_uuid" => info.datacenter = wire::decode_optional_id(field, value)?,
            "name" => info.name = wire::decode_string(field, value)?,
            "port_offset" => info.port_offset = wire::decode_port(field, value)?,
            _ => {
                return Err(ModelError::UnknownField {
                    kind: EntityKind::Machine,
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            MachineState::Known(info) => {
                write!(f, "Machine(name: {}, datacenter: ", info.name)?;
                match info.datacenter {
                    Some(dc) => write!(f, "{dc}")?,
                    None => f.write_str("none")?,
                }
                write!(f, ", port_offset: {}, endpoint: {})", info.port_offset, info.endpoint)
            }
            MachineState::Placeholder => f.write_str("Placeholder machine"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::with_admin_offset("localhost", 30_000, 1000).unwrap()
    }

    #[test]
    fn test_from_wire() {
        let dc = Identifier::random();
        let payload = json!({"datacenter_uuid": dc.to_string(), "name": "m1", "port_offset": 3});
        let machine = Machine::from_wire(
            Identifier::random(),
            payload.as_object().unwrap(),
            endpoint(),
            Some(29_999),
        )
        .unwrap();

        assert_eq!(machine.name(), Some("m1"));
        assert_eq!(machine.datacenter(), Some(dc));
        assert_eq!(machine.port_offset(), Some(3));
        assert_eq!(machine.endpoint().unwrap().admin_port, 31_000);
        assert_eq!(machine.local_peer_port(), Some(29_999));
        assert_eq!(machine.to_json(), payload);
    }

    #[test]
    fn test_placeholder_is_exempt() {
        let mut machine = Machine::placeholder(Identifier::random());
        assert!(!machine.is_verifiable());
        assert!(machine.field_matches("name", &json!("anything")));
        assert_eq!(machine.name(), None);
        assert!(machine.apply_field("name", &json!("x")).is_err());
    }

    #[test]
    fn test_field_matches() {
        let payload = json!({"datacenter_uuid": null, "name": "m1", "port_offset": 0});
        let mut machine =
            Machine::from_wire(Identifier::random(), payload.as_object().unwrap(), endpoint(), None).unwrap();

        assert!(machine.field_matches("datacenter_uuid", &Value::Null));
        assert!(!machine.field_matches("name", &json!("m2")));

        machine.apply_field("name", &json!("m2")).unwrap();
        assert!(machine.field_matches("name", &json!("m2")));
        assert!(matches!(
            machine.apply_field("color", &json!("red")),
            Err(ModelError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_admin_offset_overflow() {
        assert!(Endpoint::with_admin_offset("localhost", 65_000, 1000).is_none());
    }
}
