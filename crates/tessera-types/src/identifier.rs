use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::ModelError;

const GROUP_LENGTHS: [usize; 5] = [8, 4, 4, 4, 12];

/// Opaque 128-bit identity of a machine, datacenter or namespace.
///
/// Only the canonical hyphenated form is accepted: braced, URN and simple
/// renderings are rejected rather than coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(Uuid);

impl Identifier {
    /// Length of the canonical textual form.
    pub const TEXT_LEN: usize = 36;

    /// Parses the canonical textual form.
    pub fn parse(text: &str) -> Result<Self, ModelError> {
        if !Self::is_canonical(text) {
            return Err(ModelError::InvalidIdentifier(text.to_string()));
        }
        Uuid::parse_str(text)
            .map(Self)
            .map_err(|_| ModelError::InvalidIdentifier(text.to_string()))
    }

    /// Returns true if `text` has the 8-4-4-4-12 hexadecimal shape.
    pub fn is_canonical(text: &str) -> bool {
        if text.len() != Self::TEXT_LEN || text.matches('-').count() != 4 {
            return false;
        }
        text.split('-')
            .zip(GROUP_LENGTHS)
            .all(|(group, len)| group.len() == len && group.bytes().all(|b| b.is_ascii_hexdigit()))
    }

    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Identifier {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
