//! Indexing plan
//!
//! Per-unit-of-work map `EntityKey -> PendingOperation`. Later registrations
//! for the same key merge into the pending operation:
//!
//! | existing      | incoming             | result                 |
//! |---------------|----------------------|------------------------|
//! | ADD           | ADD/UPDATE/AOU       | ADD (refreshed)        |
//! | ADD           | DELETE               | NOOP                   |
//! | UPDATE        | ADD/UPDATE/AOU       | UPDATE (refreshed)     |
//! | UPDATE        | DELETE               | DELETE                 |
//! | DELETE        | ADD/UPDATE/AOU       | UPDATE (resurrection)  |
//! | DELETE        | DELETE               | DELETE                 |
//! | AOU           | ADD/UPDATE/AOU       | AOU (refreshed)        |
//! | AOU           | DELETE               | DELETE                 |
//! | NOOP          | ADD/UPDATE/AOU       | ADD (refreshed)        |
//! | NOOP          | DELETE               | NOOP                   |
//!
//! Every registration is also recorded in a change log that drives
//! containment expansion at flush time.

use crate::error::{IndexingError, Result};
use crate::mapping::SearchMapping;
use crate::model::{EntityKey, EntityRef, TypeIdentifier};
use crate::paths::PathSet;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Add,
    Update,
    AddOrUpdate,
    Delete,
    Noop,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Add => "ADD",
            OperationKind::Update => "UPDATE",
            OperationKind::AddOrUpdate => "ADD_OR_UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::Noop => "NOOP",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pending document operation.
///
/// A `None` instance means "load at flush".
#[derive(Debug, Clone)]
pub enum PendingOperation {
    Add(Option<EntityRef>),
    Update(Option<EntityRef>),
    AddOrUpdate(Option<EntityRef>),
    Delete,
    Noop,
}

impl PendingOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            PendingOperation::Add(_) => OperationKind::Add,
            PendingOperation::Update(_) => OperationKind::Update,
            PendingOperation::AddOrUpdate(_) => OperationKind::AddOrUpdate,
            PendingOperation::Delete => OperationKind::Delete,
            PendingOperation::Noop => OperationKind::Noop,
        }
    }

    pub fn instance(&self) -> Option<&EntityRef> {
        match self {
            PendingOperation::Add(instance)
            | PendingOperation::Update(instance)
            | PendingOperation::AddOrUpdate(instance) => instance.as_ref(),
            PendingOperation::Delete | PendingOperation::Noop => None,
        }
    }

    /// Apply the merge table
    pub fn merge(self, incoming: PendingOperation) -> PendingOperation {
        use PendingOperation::*;

        match (self, incoming) {
            (existing, Noop) => existing,

            (Add(old), Add(new) | Update(new) | AddOrUpdate(new)) => Add(new.or(old)),
            (Add(_), Delete) => Noop,

            (Update(old), Add(new) | Update(new) | AddOrUpdate(new)) => Update(new.or(old)),
            (Update(_), Delete) => Delete,

            (Delete, Add(new) | Update(new) | AddOrUpdate(new)) => Update(new),
            (Delete, Delete) => Delete,

            (AddOrUpdate(old), Add(new) | Update(new) | AddOrUpdate(new)) => {
                AddOrUpdate(new.or(old))
            }
            (AddOrUpdate(_), Delete) => Delete,

            (Noop, Add(new) | Update(new) | AddOrUpdate(new)) => Add(new),
            (Noop, Delete) => Noop,
        }
    }

    /// Replace the carried instance without changing the operation
    fn refresh(&mut self, fresh: Option<EntityRef>) {
        let Some(fresh) = fresh else { return };
        match self {
            PendingOperation::Add(instance)
            | PendingOperation::Update(instance)
            | PendingOperation::AddOrUpdate(instance) => *instance = Some(fresh),
            PendingOperation::Delete | PendingOperation::Noop => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub key: EntityKey,
    pub operation: PendingOperation,
}

/// Change-log record: a registered entity and the paths that changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    pub key: EntityKey,
    /// `None` when unknown (or for creates and deletes)
    pub changed_paths: Option<PathSet>,
}

enum Target {
    Indexed,
    Contained,
}

/// Pending operations of one unit of work
#[derive(Debug)]
pub struct IndexingPlan {
    mapping: Arc<SearchMapping>,
    entries: Vec<PlanEntry>,
    positions: HashMap<EntityKey, usize>,
    changes: Vec<EntityChange>,
    change_positions: HashMap<EntityKey, usize>,
}

impl IndexingPlan {
    pub fn new(mapping: Arc<SearchMapping>) -> Self {
        Self {
            mapping,
            entries: Vec::new(),
            positions: HashMap::new(),
            changes: Vec::new(),
            change_positions: HashMap::new(),
        }
    }

    pub fn mapping(&self) -> &Arc<SearchMapping> {
        &self.mapping
    }

    pub fn add(&mut self, key: EntityKey, instance: Option<EntityRef>) -> Result<()> {
        self.register(key, None, PendingOperation::Add(instance))
    }

    pub fn update(&mut self, key: EntityKey, instance: Option<EntityRef>) -> Result<()> {
        self.update_paths(key, instance, None)
    }

    /// Update restricted to `changed_paths`.
    ///
    /// The own document is only scheduled when a dirtiness-relevant path
    /// changed; an existing entry still gets the fresher instance.
    pub fn update_paths(
        &mut self,
        key: EntityKey,
        instance: Option<EntityRef>,
        changed_paths: Option<PathSet>,
    ) -> Result<()> {
        let mapping = self.mapping.clone();
        let dirty = mapping
            .registry()
            .get(&key.type_id)
            .map(|ctx| ctx.is_dirty(changed_paths.as_ref()))
            .unwrap_or(true);

        if dirty {
            return self.register(key, changed_paths, PendingOperation::Update(instance));
        }

        self.classify(&key.type_id)?;
        self.record_change(&key, changed_paths);
        if let Some(&idx) = self.positions.get(&key) {
            self.entries[idx].operation.refresh(instance);
        }
        Ok(())
    }

    pub fn delete(&mut self, key: EntityKey) -> Result<()> {
        self.register(key, None, PendingOperation::Delete)
    }

    pub fn add_or_update(&mut self, key: EntityKey, instance: Option<EntityRef>) -> Result<()> {
        self.register(key, None, PendingOperation::AddOrUpdate(instance))
    }

    /// Containment-triggered reindex of an indexed root.
    ///
    /// Returns `true` when a new ADD_OR_UPDATE (load at flush) was scheduled;
    /// an existing entry is left untouched.
    pub fn reindex(&mut self, key: EntityKey) -> Result<bool> {
        match self.classify(&key.type_id)? {
            Target::Indexed => {}
            Target::Contained => return Err(IndexingError::NotIndexable(key.type_id)),
        }
        if self.positions.contains_key(&key) {
            return Ok(false);
        }
        self.push_entry(key, PendingOperation::AddOrUpdate(None));
        Ok(true)
    }

    /// Change log in arrival order, one record per key
    pub fn changes(&self) -> &[EntityChange] {
        &self.changes
    }

    /// Keys with a live operation, then changed keys without one
    pub fn pending_keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self
            .entries
            .iter()
            .filter(|entry| entry.operation.kind() != OperationKind::Noop)
            .map(|entry| entry.key.clone())
            .collect();
        for change in &self.changes {
            if !self.positions.contains_key(&change.key) {
                keys.push(change.key.clone());
            }
        }
        keys
    }

    pub fn get(&self, key: &EntityKey) -> Option<&PendingOperation> {
        self.positions
            .get(key)
            .map(|&idx| &self.entries[idx].operation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Final operations in first-registration order, NOOPs dropped
    pub fn resolve(self) -> Vec<PlanEntry> {
        self.entries
            .into_iter()
            .filter(|entry| entry.operation.kind() != OperationKind::Noop)
            .collect()
    }

    fn register(
        &mut self,
        key: EntityKey,
        changed_paths: Option<PathSet>,
        operation: PendingOperation,
    ) -> Result<()> {
        let target = self.classify(&key.type_id)?;
        self.record_change(&key, changed_paths);
        if let Target::Indexed = target {
            self.merge_entry(key, operation);
        }
        Ok(())
    }

    fn classify(&self, type_id: &TypeIdentifier) -> Result<Target> {
        let ctx = self
            .mapping
            .registry()
            .get(type_id)
            .ok_or_else(|| IndexingError::UnindexedType(type_id.as_str().to_string()))?;

        if ctx.is_indexed() {
            Ok(Target::Indexed)
        } else if self.mapping.containment().is_contained(type_id) {
            Ok(Target::Contained)
        } else {
            Err(IndexingError::NotIndexable(type_id.clone()))
        }
    }

    fn merge_entry(&mut self, key: EntityKey, operation: PendingOperation) {
        match self.positions.get(&key) {
            Some(&idx) => {
                let entry = &mut self.entries[idx];
                let existing = std::mem::replace(&mut entry.operation, PendingOperation::Noop);
                entry.operation = existing.merge(operation);
            }
            None => self.push_entry(key, operation),
        }
    }

    fn push_entry(&mut self, key: EntityKey, operation: PendingOperation) {
        self.positions.insert(key.clone(), self.entries.len());
        self.entries.push(PlanEntry { key, operation });
    }

    fn record_change(&mut self, key: &EntityKey, changed_paths: Option<PathSet>) {
        match self.change_positions.get(key) {
            Some(&idx) => {
                let change = &mut self.changes[idx];
                match (&mut change.changed_paths, changed_paths) {
                    (Some(existing), Some(incoming)) => existing.union_with(&incoming),
                    (slot, _) => *slot = None,
                }
            }
            None => {
                self.change_positions.insert(key.clone(), self.changes.len());
                self.changes.push(EntityChange {
                    key: key.clone(),
                    changed_paths,
                });
            }
        }
    }
}
