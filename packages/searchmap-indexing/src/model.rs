//! Core value types shared by every component.
//!
//! - `TypeIdentifier`: the mapped type name (never a raw runtime class)
//! - `EntityId` / `EntityKey`: identity of an entity, the plan's dedup key
//! - `EntityInstance`: the live object handed over by the persistence layer

use crate::paths::PathSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Field values of one index document
pub type DocumentFieldValues = serde_json::Map<String, Value>;

/// Shared handle on a live entity instance
pub type EntityRef = Arc<dyn EntityInstance>;

/// Mapped entity type identifier
///
/// Always names the most specific *mapped* supertype, so proxies and
/// generated subclasses collapse onto the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeIdentifier(Arc<str>);

impl TypeIdentifier {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TypeIdentifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TypeIdentifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(TypeIdentifier::from)
    }
}

impl From<&str> for TypeIdentifier {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TypeIdentifier {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&TypeIdentifier> for TypeIdentifier {
    fn from(id: &TypeIdentifier) -> Self {
        id.clone()
    }
}

/// Identifier value of an entity (may be composite)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Int(i64),
    Str(String),
    Uuid(Uuid),
    Composite(Vec<EntityId>),
}

impl EntityId {
    /// Convert a property value into an identifier.
    ///
    /// Numbers must fit `i64`; arrays become composite identifiers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(EntityId::Int),
            Value::String(s) => Some(EntityId::Str(s.clone())),
            Value::Array(parts) if !parts.is_empty() => parts
                .iter()
                .map(EntityId::from_value)
                .collect::<Option<Vec<_>>>()
                .map(EntityId::Composite),
            _ => None,
        }
    }

    /// Document id as sent to the backend
    pub fn to_document_id(&self) -> String {
        match self {
            EntityId::Int(v) => v.to_string(),
            EntityId::Str(s) => s.clone(),
            EntityId::Uuid(u) => u.hyphenated().to_string(),
            EntityId::Composite(parts) => parts
                .iter()
                .map(EntityId::to_document_id)
                .collect::<Vec<_>>()
                .join(":"),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_document_id())
    }
}

impl From<i64> for EntityId {
    fn from(v: i64) -> Self {
        EntityId::Int(v)
    }
}

impl From<i32> for EntityId {
    fn from(v: i32) -> Self {
        EntityId::Int(i64::from(v))
    }
}

impl From<u32> for EntityId {
    fn from(v: u32) -> Self {
        EntityId::Int(i64::from(v))
    }
}

impl From<&str> for EntityId {
    fn from(v: &str) -> Self {
        EntityId::Str(v.to_string())
    }
}

impl From<String> for EntityId {
    fn from(v: String) -> Self {
        EntityId::Str(v)
    }
}

impl From<Uuid> for EntityId {
    fn from(v: Uuid) -> Self {
        EntityId::Uuid(v)
    }
}

/// (type, identifier): deduplication key of pending operations
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub type_id: TypeIdentifier,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(type_id: impl Into<TypeIdentifier>, id: impl Into<EntityId>) -> Self {
        Self {
            type_id: type_id.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_id, self.id)
    }
}

/// Kind of lifecycle change reported by the persistence layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notification: (key, kind, changed property paths, instance or null)
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub key: EntityKey,
    pub kind: ChangeKind,
    /// `None` when the persistence layer cannot tell which properties changed
    pub changed_paths: Option<PathSet>,
    pub instance: Option<EntityRef>,
}

impl LifecycleEvent {
    pub fn created(key: EntityKey, instance: EntityRef) -> Self {
        Self {
            key,
            kind: ChangeKind::Create,
            changed_paths: None,
            instance: Some(instance),
        }
    }

    pub fn updated(key: EntityKey, instance: EntityRef, changed_paths: Option<PathSet>) -> Self {
        Self {
            key,
            kind: ChangeKind::Update,
            changed_paths,
            instance: Some(instance),
        }
    }

    pub fn deleted(key: EntityKey) -> Self {
        Self {
            key,
            kind: ChangeKind::Delete,
            changed_paths: None,
            instance: None,
        }
    }
}

/// Live entity object as seen by the indexing engine
pub trait EntityInstance: Send + Sync + fmt::Debug {
    /// Runtime class name, possibly a proxy or an unmapped subclass
    fn runtime_class(&self) -> &str;

    /// Top-level property value
    fn property(&self, name: &str) -> Option<Value>;

    /// Names of the properties this instance exposes
    fn property_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Dotted property lookup (`"author.name"`)
    fn property_path(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let mut current = self.property(segments.next()?)?;
        for segment in segments {
            current = current.get(segment)?.clone();
        }
        Some(current)
    }
}

/// Entity backed by a JSON property map
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicEntity {
    class: String,
    properties: serde_json::Map<String, Value>,
}

impl DynamicEntity {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            properties: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn into_ref(self) -> EntityRef {
        Arc::new(self)
    }
}

impl EntityInstance for DynamicEntity {
    fn runtime_class(&self) -> &str {
        &self.class
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.properties.get(name).cloned()
    }

    fn property_names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }
}
