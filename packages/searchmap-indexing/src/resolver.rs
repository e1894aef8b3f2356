//! Entity reference resolution
//!
//! Maps live instances (possibly proxies or unmapped subclasses) to the
//! `EntityKey` of their most specific mapped type.

use crate::error::{IndexingError, Result};
use crate::model::{EntityId, EntityInstance, EntityKey, TypeIdentifier};
use crate::registry::TypeContextRegistry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Runtime class hierarchy of the object model
pub trait TypeHierarchy: Send + Sync + fmt::Debug {
    /// Direct superclass of `class`, `None` at the top
    fn superclass(&self, class: &str) -> Option<String>;
}

/// Hierarchy backed by a declared class -> superclass table
#[derive(Debug, Clone, Default)]
pub struct StaticTypeHierarchy {
    parents: HashMap<String, String>,
}

impl StaticTypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(mut self, class: impl Into<String>, parent: impl Into<String>) -> Self {
        self.parents.insert(class.into(), parent.into());
        self
    }
}

impl TypeHierarchy for StaticTypeHierarchy {
    fn superclass(&self, class: &str) -> Option<String> {
        self.parents.get(class).cloned()
    }
}

/// Key resolution capability
pub trait KeyResolver: Send + Sync {
    fn resolve_key(&self, instance: &dyn EntityInstance) -> Result<EntityKey>;
}

/// Default resolver: hierarchy walk with a per-class memo
#[derive(Debug)]
pub struct EntityReferenceResolver {
    registry: Arc<TypeContextRegistry>,
    hierarchy: Arc<dyn TypeHierarchy>,
    proxy_marker: String,
    memo: DashMap<String, Option<TypeIdentifier>>,
}

impl EntityReferenceResolver {
    pub fn new(
        registry: Arc<TypeContextRegistry>,
        hierarchy: Arc<dyn TypeHierarchy>,
        proxy_marker: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            hierarchy,
            proxy_marker: proxy_marker.into(),
            memo: DashMap::new(),
        }
    }

    /// Mapped type of a runtime class, if any
    pub fn try_resolve_type(&self, runtime_class: &str) -> Option<TypeIdentifier> {
        if let Some(cached) = self.memo.get(runtime_class) {
            return cached.clone();
        }

        let resolved = self.walk(runtime_class);
        debug!(
            runtime_class,
            resolved = ?resolved.as_ref().map(TypeIdentifier::as_str),
            "Resolved runtime class"
        );
        self.memo
            .insert(runtime_class.to_string(), resolved.clone());
        resolved
    }

    /// Mapped type of a runtime class, `UnindexedType` when none exists
    pub fn resolve_type(&self, runtime_class: &str) -> Result<TypeIdentifier> {
        self.try_resolve_type(runtime_class)
            .ok_or_else(|| IndexingError::UnindexedType(runtime_class.to_string()))
    }

    /// Key of a live instance
    pub fn identify(&self, instance: &dyn EntityInstance) -> Result<EntityKey> {
        let type_id = self.resolve_type(instance.runtime_class())?;
        let id = self.registry.resolve(&type_id)?.extract_id(instance)?;
        Ok(EntityKey { type_id, id })
    }

    /// Key from a type identifier and a raw identifier
    pub fn identify_id(
        &self,
        type_id: impl Into<TypeIdentifier>,
        raw_id: impl Into<EntityId>,
    ) -> Result<EntityKey> {
        let type_id = type_id.into();
        if !self.registry.contains(&type_id) {
            return Err(IndexingError::UnindexedType(type_id.as_str().to_string()));
        }
        Ok(EntityKey {
            type_id,
            id: raw_id.into(),
        })
    }

    pub fn memoized_classes(&self) -> usize {
        self.memo.len()
    }

    fn walk(&self, runtime_class: &str) -> Option<TypeIdentifier> {
        let start = match runtime_class.find(&self.proxy_marker) {
            Some(pos) => &runtime_class[..pos],
            None => runtime_class,
        };

        let mut visited = HashSet::new();
        let mut current = start.to_string();
        loop {
            let candidate = TypeIdentifier::from(current.as_str());
            if self.registry.contains(&candidate) {
                return Some(candidate);
            }
            if !visited.insert(current.clone()) {
                return None;
            }
            current = self.hierarchy.superclass(&current)?;
        }
    }
}

impl KeyResolver for EntityReferenceResolver {
    fn resolve_key(&self, instance: &dyn EntityInstance) -> Result<EntityKey> {
        self.identify(instance)
    }
}
