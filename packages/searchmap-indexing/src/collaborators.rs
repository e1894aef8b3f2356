//! Collaborator interfaces consumed by the engine
//!
//! The persistence layer, the field extraction and the backend wire client
//! live outside this crate; the engine only talks to them through these
//! traits.

use crate::containment::ContainmentPath;
use crate::model::{DocumentFieldValues, EntityInstance, EntityKey, EntityRef};
use crate::registry::TypeContext;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error returned by collaborator implementations
pub type CollaboratorError = anyhow::Error;

/// Locates the instances that embed a changed entity
pub trait ReverseAssociationLoader: Send + Sync {
    /// Keys of the `path.containing` entities reaching `leaf` through `path`.
    /// The stream is finite and may be empty.
    fn load_containing_entities<'a>(
        &'a self,
        leaf: &'a EntityKey,
        path: &'a ContainmentPath,
    ) -> BoxStream<'a, Result<EntityKey, CollaboratorError>>;
}

/// Produces document field values from an instance
pub trait FieldValueExtractor: Send + Sync {
    fn extract(
        &self,
        instance: &dyn EntityInstance,
        context: &TypeContext,
    ) -> Result<DocumentFieldValues, CollaboratorError>;
}

/// Loads entities whose instance was not supplied at registration
#[async_trait]
pub trait EntityLoader: Send + Sync {
    /// `Ok(None)` when the entity no longer exists
    async fn load(&self, key: &EntityKey) -> Result<Option<EntityRef>, CollaboratorError>;
}

/// Backend client executing index work
#[async_trait]
pub trait BackendWorkClient: Send + Sync {
    async fn submit(&self, batch: WorkBatch) -> Result<BatchReport, CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOperation {
    Add,
    /// Upsert
    Update,
    Delete,
}

impl WorkOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOperation::Add => "add",
            WorkOperation::Update => "update",
            WorkOperation::Delete => "delete",
        }
    }
}

/// One document operation sent to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub key: EntityKey,
    pub index_name: String,
    pub document_id: String,
    pub operation: WorkOperation,
    /// Field values for add/update, `None` for delete
    pub document: Option<DocumentFieldValues>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkBatch {
    /// Position of the batch within its flush
    pub sequence: usize,
    pub items: Vec<WorkItem>,
}

impl WorkBatch {
    pub fn keys(&self) -> Vec<EntityKey> {
        self.items.iter().map(|item| item.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Per-item outcome of a batch; items not listed succeeded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub item_failures: HashMap<EntityKey, String>,
}

impl BatchReport {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self, key: EntityKey, reason: impl Into<String>) -> Self {
        self.item_failures.insert(key, reason.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.item_failures.is_empty()
    }
}
