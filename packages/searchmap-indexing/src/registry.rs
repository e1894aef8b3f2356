//! TypeContext registry
//!
//! Static per-type indexing metadata, built once at startup and read
//! without synchronization afterwards.
//!
//! Two kinds of context exist:
//! - **indexed**: the type has its own index and documents
//! - **contained**: the type only appears embedded in indexed documents

use crate::error::{IndexingError, Result};
use crate::model::{EntityId, EntityInstance, TypeIdentifier};
use crate::paths::{PathSet, ReadSet};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Custom identifier extraction function
pub type IdentifierFn = Arc<dyn Fn(&dyn EntityInstance) -> Option<EntityId> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Indexed { index_name: String },
    Contained,
}

/// How the identifier of an instance is obtained
#[derive(Clone)]
pub enum IdentifierStrategy {
    /// Single property holding the id
    Property(String),
    /// Several properties forming a composite id
    Composite(Vec<String>),
    Custom(IdentifierFn),
}

impl fmt::Debug for IdentifierStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierStrategy::Property(name) => f.debug_tuple("Property").field(name).finish(),
            IdentifierStrategy::Composite(names) => {
                f.debug_tuple("Composite").field(names).finish()
            }
            IdentifierStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Default for IdentifierStrategy {
    fn default() -> Self {
        IdentifierStrategy::Property("id".to_string())
    }
}

/// An embedded association declared on a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedAssociation {
    /// Property on the owning type
    pub property: String,
    /// Embedded type
    pub target: TypeIdentifier,
    /// Paths of the target read by the embedding
    pub includes: ReadSet,
    /// Embedding levels allowed from here down, `None` for unbounded
    pub max_depth: Option<usize>,
}

/// Indexing metadata of one mapped type
#[derive(Debug, Clone)]
pub struct TypeContext {
    pub type_id: TypeIdentifier,
    pub entity_name: String,
    pub kind: TypeKind,
    pub identifier: IdentifierStrategy,
    /// Paths whose change makes the type's own document dirty
    pub dirty_paths: ReadSet,
    pub supertype: Option<TypeIdentifier>,
    pub embeddings: Vec<EmbeddedAssociation>,
}

impl TypeContext {
    pub fn is_indexed(&self) -> bool {
        matches!(self.kind, TypeKind::Indexed { .. })
    }

    pub fn index_name(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Indexed { index_name } => Some(index_name),
            TypeKind::Contained => None,
        }
    }

    /// Extract the identifier of `instance`
    pub fn extract_id(&self, instance: &dyn EntityInstance) -> Result<EntityId> {
        let missing = |property: &str| IndexingError::IdentifierExtraction {
            type_id: self.type_id.clone(),
            reason: format!("property '{}' is absent or not an identifier", property),
        };

        match &self.identifier {
            IdentifierStrategy::Property(name) => instance
                .property(name)
                .as_ref()
                .and_then(EntityId::from_value)
                .ok_or_else(|| missing(name)),
            IdentifierStrategy::Composite(names) => names
                .iter()
                .map(|name| {
                    instance
                        .property(name)
                        .as_ref()
                        .and_then(EntityId::from_value)
                        .ok_or_else(|| missing(name))
                })
                .collect::<Result<Vec<_>>>()
                .map(EntityId::Composite),
            IdentifierStrategy::Custom(extract) => {
                extract(instance).ok_or_else(|| IndexingError::IdentifierExtraction {
                    type_id: self.type_id.clone(),
                    reason: "custom identifier function returned no value".to_string(),
                })
            }
        }
    }

    /// Whether a change to `changed` dirties the type's own document
    pub fn is_dirty(&self, changed: Option<&PathSet>) -> bool {
        self.dirty_paths.is_triggered_by(changed)
    }
}

/// Fluent builder for one type context
#[derive(Debug)]
pub struct TypeContextBuilder {
    context: TypeContext,
}

impl TypeContextBuilder {
    fn new(type_id: TypeIdentifier, kind: TypeKind) -> Self {
        Self {
            context: TypeContext {
                entity_name: type_id.as_str().to_string(),
                type_id,
                kind,
                identifier: IdentifierStrategy::default(),
                dirty_paths: ReadSet::All,
                supertype: None,
                embeddings: Vec::new(),
            },
        }
    }

    /// Entity name, defaults to the type identifier
    pub fn entity_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.context.entity_name = name.into();
        self
    }

    pub fn id_property(&mut self, property: impl Into<String>) -> &mut Self {
        self.context.identifier = IdentifierStrategy::Property(property.into());
        self
    }

    pub fn composite_id<S: Into<String>>(
        &mut self,
        properties: impl IntoIterator<Item = S>,
    ) -> &mut Self {
        self.context.identifier =
            IdentifierStrategy::Composite(properties.into_iter().map(Into::into).collect());
        self
    }

    pub fn custom_id<F>(&mut self, extract: F) -> &mut Self
    where
        F: Fn(&dyn EntityInstance) -> Option<EntityId> + Send + Sync + 'static,
    {
        self.context.identifier = IdentifierStrategy::Custom(Arc::new(extract));
        self
    }

    /// Restrict dirtiness of the own document to these paths
    pub fn dirty_paths<S: Into<String>>(
        &mut self,
        paths: impl IntoIterator<Item = S>,
    ) -> &mut Self {
        self.context.dirty_paths = ReadSet::paths(paths);
        self
    }

    pub fn supertype(&mut self, supertype: impl Into<TypeIdentifier>) -> &mut Self {
        self.context.supertype = Some(supertype.into());
        self
    }

    /// Embed `target` through `property`, reading every target path
    pub fn embed(
        &mut self,
        property: impl Into<String>,
        target: impl Into<TypeIdentifier>,
    ) -> &mut Self {
        self.embed_with(property, target, ReadSet::All, None)
    }

    pub fn embed_with(
        &mut self,
        property: impl Into<String>,
        target: impl Into<TypeIdentifier>,
        includes: ReadSet,
        max_depth: Option<usize>,
    ) -> &mut Self {
        self.context.embeddings.push(EmbeddedAssociation {
            property: property.into(),
            target: target.into(),
            includes,
            max_depth,
        });
        self
    }

    fn build(self) -> TypeContext {
        self.context
    }
}

/// Collects type contexts and validates them into a registry
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    builders: Vec<TypeContextBuilder>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_indexed(
        &mut self,
        type_id: impl Into<TypeIdentifier>,
        index_name: impl Into<String>,
    ) -> &mut TypeContextBuilder {
        self.push(TypeContextBuilder::new(
            type_id.into(),
            TypeKind::Indexed {
                index_name: index_name.into(),
            },
        ))
    }

    pub fn add_contained(&mut self, type_id: impl Into<TypeIdentifier>) -> &mut TypeContextBuilder {
        self.push(TypeContextBuilder::new(type_id.into(), TypeKind::Contained))
    }

    fn push(&mut self, builder: TypeContextBuilder) -> &mut TypeContextBuilder {
        let idx = self.builders.len();
        self.builders.push(builder);
        &mut self.builders[idx]
    }

    pub fn build(self) -> Result<TypeContextRegistry> {
        let contexts: Vec<TypeContext> =
            self.builders.into_iter().map(TypeContextBuilder::build).collect();

        let mut by_type = HashMap::with_capacity(contexts.len());
        let mut by_name = HashMap::with_capacity(contexts.len());
        for (idx, ctx) in contexts.iter().enumerate() {
            if by_type.insert(ctx.type_id.clone(), idx).is_some() {
                return Err(IndexingError::mapping(format!(
                    "type '{}' registered twice",
                    ctx.type_id
                )));
            }
            if by_name.insert(ctx.entity_name.clone(), idx).is_some() {
                return Err(IndexingError::mapping(format!(
                    "entity name '{}' registered twice",
                    ctx.entity_name
                )));
            }
        }

        let mut index_names = HashSet::new();
        for ctx in &contexts {
            if let Some(index_name) = ctx.index_name() {
                if !index_names.insert(index_name) {
                    return Err(IndexingError::mapping(format!(
                        "index '{}' is used by more than one type",
                        index_name
                    )));
                }
            }
            if let Some(supertype) = &ctx.supertype {
                if !by_type.contains_key(supertype) {
                    return Err(IndexingError::mapping(format!(
                        "type '{}' declares unregistered supertype '{}'",
                        ctx.type_id, supertype
                    )));
                }
            }
            for embedding in &ctx.embeddings {
                if !by_type.contains_key(&embedding.target) {
                    return Err(IndexingError::mapping(format!(
                        "{}.{} embeds unregistered type '{}'",
                        ctx.type_id, embedding.property, embedding.target
                    )));
                }
            }
        }

        Ok(TypeContextRegistry {
            contexts,
            by_type,
            by_name,
        })
    }
}

/// Immutable lookup of type contexts
#[derive(Debug)]
pub struct TypeContextRegistry {
    contexts: Vec<TypeContext>,
    by_type: HashMap<TypeIdentifier, usize>,
    by_name: HashMap<String, usize>,
}

impl TypeContextRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Context of a mapped type, `UnknownType` otherwise
    pub fn resolve(&self, type_id: &TypeIdentifier) -> Result<&TypeContext> {
        self.get(type_id)
            .ok_or_else(|| IndexingError::UnknownType(type_id.clone()))
    }

    pub fn get(&self, type_id: &TypeIdentifier) -> Option<&TypeContext> {
        self.by_type.get(type_id).map(|&idx| &self.contexts[idx])
    }

    pub fn contains(&self, type_id: &TypeIdentifier) -> bool {
        self.by_type.contains_key(type_id)
    }

    pub fn for_entity_name(&self, name: &str) -> Result<&TypeContext> {
        match self.by_name.get(name) {
            Some(&idx) => Ok(&self.contexts[idx]),
            None => Err(IndexingError::UnknownEntityName {
                name: name.to_string(),
                known: self.contexts.iter().map(|c| c.entity_name.clone()).collect(),
            }),
        }
    }

    /// Indexed contexts in registration order
    pub fn all_indexed(&self) -> impl Iterator<Item = &TypeContext> {
        self.contexts.iter().filter(|c| c.is_indexed())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeContext> {
        self.contexts.iter()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DynamicEntity;
    use serde_json::json;

    fn registry() -> TypeContextRegistry {
        let mut builder = TypeContextRegistry::builder();
        builder
            .add_indexed("Order", "orders")
            .embed("lines", "LineItem");
        builder
            .add_contained("LineItem")
            .entity_name("line_item")
            .composite_id(["order_id", "line_no"]);
        builder
            .add_indexed("Book", "books")
            .id_property("isbn")
            .dirty_paths(["title", "author"]);
        builder.build().unwrap()
    }

    #[test]
    fn test_resolve_and_kinds() {
        let registry = registry();
        let order = registry.resolve(&"Order".into()).unwrap();
        assert!(order.is_indexed());
        assert_eq!(order.index_name(), Some("orders"));

        let line = registry.resolve(&"LineItem".into()).unwrap();
        assert!(!line.is_indexed());
        assert_eq!(line.index_name(), None);

        assert!(matches!(
            registry.resolve(&"Invoice".into()),
            Err(IndexingError::UnknownType(_))
        ));
    }

    #[test]
    fn test_all_indexed_in_registration_order() {
        let registry = registry();
        let names: Vec<_> = registry
            .all_indexed()
            .map(|c| c.type_id.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["Order", "Book"]);
    }

    #[test]
    fn test_for_entity_name_lists_known_names() {
        let registry = registry();
        assert_eq!(
            registry.for_entity_name("line_item").unwrap().type_id,
            TypeIdentifier::from("LineItem")
        );

        match registry.for_entity_name("Invoice") {
            Err(IndexingError::UnknownEntityName { name, known }) => {
                assert_eq!(name, "Invoice");
                assert_eq!(known, vec!["Order", "line_item", "Book"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_extract_id_strategies() {
        let registry = registry();

        let line = DynamicEntity::new("LineItem")
            .with("order_id", 10)
            .with("line_no", 2);
        let id = registry
            .resolve(&"LineItem".into())
            .unwrap()
            .extract_id(&line)
            .unwrap();
        assert_eq!(id.to_document_id(), "10:2");

        let book = DynamicEntity::new("Book").with("title", json!("Dune"));
        let err = registry
            .resolve(&"Book".into())
            .unwrap()
            .extract_id(&book)
            .unwrap_err();
        assert!(matches!(err, IndexingError::IdentifierExtraction { .. }));
    }

    #[test]
    fn test_custom_identifier() {
        let mut builder = TypeContextRegistry::builder();
        builder
            .add_indexed("Author", "authors")
            .custom_id(|instance| {
                instance
                    .property("email")
                    .and_then(|v| v.as_str().map(|s| EntityId::from(s.to_lowercase())))
            });
        let registry = builder.build().unwrap();

        let author = DynamicEntity::new("Author").with("email", "A@B.org");
        let id = registry
            .resolve(&"Author".into())
            .unwrap()
            .extract_id(&author)
            .unwrap();
        assert_eq!(id, EntityId::from("a@b.org"));
    }

    #[test]
    fn test_dirty_paths() {
        let registry = registry();
        let book = registry.resolve(&"Book".into()).unwrap();
        let changed: PathSet = ["price"].into_iter().collect();
        assert!(!book.is_dirty(Some(&changed)));
        let changed: PathSet = ["author.name"].into_iter().collect();
        assert!(book.is_dirty(Some(&changed)));
        assert!(book.is_dirty(None));
    }

    #[test]
    fn test_build_rejects_invalid_mappings() {
        let mut builder = TypeContextRegistry::builder();
        builder.add_indexed("Order", "orders");
        builder.add_contained("Order");
        assert!(matches!(builder.build(), Err(IndexingError::Mapping(_))));

        let mut builder = TypeContextRegistry::builder();
        builder.add_indexed("Order", "orders").embed("lines", "LineItem");
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("unregistered type 'LineItem'"));

        let mut builder = TypeContextRegistry::builder();
        builder.add_indexed("Paperback", "paperbacks").supertype("Book");
        assert!(matches!(builder.build(), Err(IndexingError::Mapping(_))));
    }
}
