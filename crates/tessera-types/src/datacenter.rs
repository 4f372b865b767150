use std::fmt::{self, Display};

use serde_json::{Value, json};

use crate::wire::{self, WireObject};
use crate::{EntityKind, Identifier, ModelError, TopologyEntity};

/// A named group of machines used for replica placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datacenter {
    id: Identifier,
    name: String,
}

impl Datacenter {
    pub fn new(id: Identifier, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }

    pub fn from_wire(id: Identifier, payload: &WireObject) -> Result<Self, ModelError> {
        let name = match wire::settled(payload, EntityKind::Datacenter, "name")? {
            Some(value) => wire::decode_string("name", value)?,
            None => String::new(),
        };
        Ok(Self { id, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TopologyEntity for Datacenter {
    fn id(&self) -> Identifier {
        self.id
    }

    fn owner_map_kind(&self) -> EntityKind {
        EntityKind::Datacenter
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn to_json(&self) -> Value {
        json!({ "name": self.name })
    }

    fn field_matches(&self, field: &str, remote: &Value) -> bool {
        match field {
            "name" => remote.as_str() == Some(self.name.as_str()),
            _ => true,
        }
    }

    fn apply_field(&mut self, field: &str, value: &Value) -> Result<(), ModelError> {
        match field {
            "name" => {
                self.name = wire::decode_string(field, value)?;
                Ok(())
            }
            _ => Err(ModelError::UnknownField {
                kind: EntityKind::Datacenter,
                field: field.to_string(),
            }),
        }
    }
}

impl Display for Datacenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Datacenter(name: {})", self.name)
    }
}
