//! Search mapping: the immutable, shared part of the engine
//!
//! Built once at startup and handed to every unit of work as
//! `Arc<SearchMapping>`.

use crate::config::{IndexingConfig, Validatable};
use crate::containment::ContainmentGraph;
use crate::error::Result;
use crate::registry::{RegistryBuilder, TypeContextRegistry};
use crate::resolver::{EntityReferenceResolver, StaticTypeHierarchy, TypeHierarchy};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct SearchMapping {
    config: IndexingConfig,
    registry: Arc<TypeContextRegistry>,
    resolver: EntityReferenceResolver,
    containment: ContainmentGraph,
}

impl SearchMapping {
    pub fn builder() -> SearchMappingBuilder {
        SearchMappingBuilder::default()
    }

    pub fn config(&self) -> &IndexingConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeContextRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &EntityReferenceResolver {
        &self.resolver
    }

    pub fn containment(&self) -> &ContainmentGraph {
        &self.containment
    }
}

#[derive(Debug, Default)]
pub struct SearchMappingBuilder {
    config: Option<IndexingConfig>,
    types: RegistryBuilder,
    hierarchy: Option<Arc<dyn TypeHierarchy>>,
}

impl SearchMappingBuilder {
    pub fn config(mut self, config: IndexingConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn hierarchy(mut self, hierarchy: Arc<dyn TypeHierarchy>) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    /// Declare the mapped types
    pub fn types(mut self, declare: impl FnOnce(&mut RegistryBuilder)) -> Self {
        declare(&mut self.types);
        self
    }

    pub fn build(self) -> Result<Arc<SearchMapping>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = Arc::new(self.types.build()?);
        let hierarchy = self
            .hierarchy
            .unwrap_or_else(|| Arc::new(StaticTypeHierarchy::new()));
        let resolver =
            EntityReferenceResolver::new(registry.clone(), hierarchy, config.proxy_marker.clone());
        let containment = ContainmentGraph::build(&registry, config.max_containment_depth);

        info!(
            types = registry.len(),
            indexed = registry.all_indexed().count(),
            containment_paths = containment.path_count(),
            "Search mapping built"
        );

        Ok(Arc::new(SearchMapping {
            config,
            registry,
            resolver,
            containment,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexingError;

    #[test]
    fn test_build_mapping() {
        let mapping = SearchMapping::builder()
            .types(|t| {
                t.add_indexed("Order", "orders").embed("lines", "LineItem");
                t.add_contained("LineItem");
            })
            .build()
            .unwrap();

        assert_eq!(mapping.registry().len(), 2);
        assert!(mapping.containment().is_contained(&"LineItem".into()));
        assert_eq!(mapping.config().batch_size, 100);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = SearchMapping::builder()
            .config(IndexingConfig::default().with_batch_size(0))
            .build();
        assert!(matches!(result, Err(IndexingError::Config(_))));
    }
}
