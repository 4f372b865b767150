use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{EntityKind, Identifier};

/// Identity of one controller instance.
///
/// Handles carry the token of the controller that issued them so that an
/// entity of one partition group is never silently looked up in another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterToken(u64);

impl ClusterToken {
    /// Returns a token distinct from every other token in this process.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ClusterToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster#{}", self.0)
    }
}

/// An entity as issued by a specific controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    token: ClusterToken,
    kind: EntityKind,
    id: Identifier,
}

impl EntityHandle {
    pub fn new(token: ClusterToken, kind: EntityKind, id: Identifier) -> Self {
        Self { token, kind, id }
    }

    pub fn token(&self) -> ClusterToken {
        self.token
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> Identifier {
        self.id
    }
}

/// How a caller designates an entity in a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Id(Identifier),
    Name(String),
    Handle(EntityHandle),
}

impl Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Id(id) => write!(f, "{id}"),
            Reference::Name(name) => write!(f, "{name:?}"),
            Reference::Handle(handle) => write!(f, "{} {} of {}", handle.kind, handle.id, handle.token),
        }
    }
}

impl From<Identifier> for Reference {
    fn from(id: Identifier) -> Self {
        Reference::Id(id)
    }
}

impl From<EntityHandle> for Reference {
    fn from(handle: EntityHandle) -> Self {
        Reference::Handle(handle)
    }
}

impl From<&EntityHandle> for Reference {
    fn from(handle: &EntityHandle) -> Self {
        Reference::Handle(*handle)
    }
}

/// Text in identifier form is an identifier; anything else is a name.
impl From<&str> for Reference {
    fn from(text: &str) -> Self {
        match Identifier::parse(text) {
            Ok(id) => Reference::Id(id),
            Err(_) => Reference::Name(text.to_string()),
        }
    }
}

impl From<String> for Reference {
    fn from(text: String) -> Self {
        Reference::from(text.as_str())
    }
}

impl From<&String> for Reference {
    fn from(text: &String) -> Self {
        Reference::from(text.as_str())
    }
}
