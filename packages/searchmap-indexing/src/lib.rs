/*
 * Searchmap Indexing - indexing-plan reconciliation and dispatch
 *
 * Turns entity lifecycle events into the minimal set of index document
 * operations and commits them in step with the persistence transaction.
 *
 * Architecture:
 * - TypeContext Registry (static per-type metadata)
 * - Entity Reference Resolver (proxy/subclass -> mapped type)
 * - Containment Graph (embedded entity -> indexed roots)
 * - Indexing Plan (per-key merge of pending operations)
 * - Dispatcher (batching, bounded concurrent submission, commit/rollback)
 */

// Public modules
pub mod collaborators;
pub mod config;
pub mod containment;
pub mod dispatcher;
pub mod error;
pub mod mapping;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod model;
pub mod paths;
pub mod plan;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod work;

#[cfg(test)]
mod test_support;

// Re-exports
pub use collaborators::{
    BackendWorkClient, BatchReport, CollaboratorError, EntityLoader, FieldValueExtractor,
    ReverseAssociationLoader, WorkBatch, WorkItem, WorkOperation,
};
pub use config::{ConfigError, IndexingConfig, Validatable};
pub use containment::{ContainmentGraph, ContainmentHop, ContainmentPath};
pub use dispatcher::{Dispatcher, FlushOutcome, IndexingServices, PreparedFlush, RollbackOutcome};
pub use error::{ErrorCategory, FailureCause, IndexingError, IndexingFailure, Result};
pub use mapping::{SearchMapping, SearchMappingBuilder};
#[cfg(feature = "metrics")]
pub use metrics::IndexingMetrics;
pub use model::{
    ChangeKind, DocumentFieldValues, DynamicEntity, EntityId, EntityInstance, EntityKey,
    EntityRef, LifecycleEvent, TypeIdentifier,
};
pub use paths::{PathSet, ReadSet};
pub use plan::{EntityChange, IndexingPlan, OperationKind, PendingOperation, PlanEntry};
pub use registry::{
    EmbeddedAssociation, IdentifierStrategy, RegistryBuilder, TypeContext, TypeContextBuilder,
    TypeContextRegistry, TypeKind,
};
pub use resolver::{EntityReferenceResolver, KeyResolver, StaticTypeHierarchy, TypeHierarchy};
pub use session::{IndexingUnitOfWork, TransactionObserver};
pub use work::{Phase, WorkState, WorkStateMachine};
