//! Unit of work
//!
//! One `IndexingUnitOfWork` per persistence transaction. It owns the plan and
//! the state machine; the persistence layer drives it through the
//! `TransactionObserver` hooks:
//!
//! - `before_commit`: expand, translate and submit (OPEN → FLUSHING → EXECUTING)
//! - `after_commit`: await every batch (→ COMMITTED | FAILED)
//! - `after_rollback`: discard waiting work, ignore in-flight results (→ ROLLED_BACK)

use crate::dispatcher::{Dispatcher, FlushOutcome, InFlightWork, RollbackOutcome};
use crate::error::{ErrorCategory, IndexingError, IndexingFailure, Result};
use crate::model::{ChangeKind, EntityKey, EntityRef, LifecycleEvent};
use crate::paths::PathSet;
use crate::plan::IndexingPlan;
use crate::work::{Phase, WorkState, WorkStateMachine};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Transaction synchronization hooks
#[async_trait]
pub trait TransactionObserver: Send {
    async fn before_commit(&mut self) -> Result<()>;

    async fn after_commit(&mut self) -> Result<FlushOutcome>;

    async fn after_rollback(&mut self) -> Result<RollbackOutcome>;
}

#[derive(Debug)]
pub struct IndexingUnitOfWork {
    dispatcher: Arc<Dispatcher>,
    state: WorkStateMachine,
    plan: Option<IndexingPlan>,
    in_flight: Option<InFlightWork>,
    /// Keys that failed before submission
    pending_failures: Vec<IndexingFailure>,
    flush_started: Option<Instant>,
    outcome: Option<FlushOutcome>,
    rollback: Option<RollbackOutcome>,
}

impl IndexingUnitOfWork {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let plan = IndexingPlan::new(dispatcher.mapping().clone());
        Self {
            dispatcher,
            state: WorkStateMachine::new(),
            plan: Some(plan),
            in_flight: None,
            pending_failures: Vec::new(),
            flush_started: None,
            outcome: None,
            rollback: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.state.id()
    }

    /// OPEN, FLUSHING, EXECUTING, COMMITTED, FAILED or ROLLED_BACK
    pub fn current_state(&self) -> &WorkState {
        self.state.state()
    }

    pub fn phase(&self) -> Phase {
        self.state.state().phase()
    }

    /// Stored flush outcome, once settled
    pub fn outcome(&self) -> Option<&FlushOutcome> {
        self.outcome.as_ref()
    }

    pub fn plan(&self) -> Option<&IndexingPlan> {
        self.plan.as_ref()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Registration
    // ═══════════════════════════════════════════════════════════════════

    pub fn register_create(&mut self, key: EntityKey, instance: Option<EntityRef>) -> Result<()> {
        self.open_plan()?.add(key, instance)
    }

    pub fn register_update(&mut self, key: EntityKey, instance: Option<EntityRef>) -> Result<()> {
        self.open_plan()?.update(key, instance)
    }

    pub fn register_update_paths(
        &mut self,
        key: EntityKey,
        instance: Option<EntityRef>,
        changed_paths: PathSet,
    ) -> Result<()> {
        self.open_plan()?
            .update_paths(key, instance, Some(changed_paths))
    }

    pub fn register_delete(&mut self, key: EntityKey) -> Result<()> {
        self.open_plan()?.delete(key)
    }

    pub fn register_add_or_update(
        &mut self,
        key: EntityKey,
        instance: Option<EntityRef>,
    ) -> Result<()> {
        self.open_plan()?.add_or_update(key, instance)
    }

    /// Record a lifecycle notification from the persistence layer
    pub fn register_event(&mut self, event: LifecycleEvent) -> Result<()> {
        let LifecycleEvent {
            key,
            kind,
            changed_paths,
            instance,
        } = event;
        let plan = self.open_plan()?;
        match kind {
            ChangeKind::Create => plan.add(key, instance),
            ChangeKind::Update => plan.update_paths(key, instance, changed_paths),
            ChangeKind::Delete => plan.delete(key),
        }
    }

    /// Create, identifying the instance through the resolver
    pub fn register_instance_create(&mut self, instance: EntityRef) -> Result<EntityKey> {
        let key = self.identify(&instance)?;
        self.register_create(key.clone(), Some(instance))?;
        Ok(key)
    }

    pub fn register_instance_update(&mut self, instance: EntityRef) -> Result<EntityKey> {
        let key = self.identify(&instance)?;
        self.register_update(key.clone(), Some(instance))?;
        Ok(key)
    }

    pub fn register_instance_delete(&mut self, instance: EntityRef) -> Result<EntityKey> {
        let key = self.identify(&instance)?;
        self.register_delete(key.clone())?;
        Ok(key)
    }

    fn identify(&self, instance: &EntityRef) -> Result<EntityKey> {
        self.state.ensure_open()?;
        self.dispatcher
            .mapping()
            .resolver()
            .identify(instance.as_ref())
    }

    fn open_plan(&mut self) -> Result<&mut IndexingPlan> {
        self.state.ensure_open()?;
        self.plan
            .as_mut()
            .ok_or_else(|| IndexingError::UnitOfWorkClosed {
                state: self.state.state().state_name().to_string(),
            })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Flush
    // ═══════════════════════════════════════════════════════════════════

    /// Explicit flush: submit and await everything
    pub async fn flush(&mut self) -> Result<FlushOutcome> {
        self.before_commit().await?;
        self.after_commit().await
    }

    /// Pre-commit: expand, translate and submit. No-op once flushing started.
    pub async fn before_commit(&mut self) -> Result<()> {
        if !self.state.state().accepts_registrations() {
            return Ok(());
        }
        let Some(plan) = self.plan.take() else {
            return Ok(());
        };

        self.state.begin_flush()?;
        self.flush_started = Some(Instant::now());
        info!(
            "Unit of work {}: flushing {} pending operations",
            self.id(),
            plan.len()
        );

        let pending = plan.pending_keys();
        let prepared = match self.dispatcher.prepare(plan).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Unit of work {}: flush preparation failed: {}", self.id(), e);
                self.pending_failures.push(e.into_indexing_failure(pending));
                return self.finish(None);
            }
        };

        self.pending_failures.extend(prepared.failures);
        if prepared.batches.is_empty() {
            return self.finish(None);
        }

        self.state.begin_execution(prepared.batches.len())?;
        debug!(
            "Unit of work {}: submitting {} batches",
            self.id(),
            prepared.batches.len()
        );
        self.in_flight = Some(self.dispatcher.submit(prepared.batches));
        Ok(())
    }

    /// Post-commit: await outstanding batches.
    ///
    /// Idempotent once settled; `FlushFailed` lists failed and succeeded keys.
    pub async fn after_commit(&mut self) -> Result<FlushOutcome> {
        if self.outcome.is_none() && self.state.state().accepts_registrations() {
            self.before_commit().await?;
        }
        if self.outcome.is_none() {
            if let Some(work) = self.in_flight.take() {
                let settled = self.dispatcher.settle(work).await;
                self.finish(Some(settled))?;
            }
        }

        match &self.outcome {
            Some(outcome) => outcome.clone().into_result(),
            None => Err(IndexingError::InvalidStateTransition {
                from: self.state.state().state_name().to_string(),
                to: "committed".to_string(),
            }),
        }
    }

    /// Decide COMMITTED or FAILED and store the outcome
    fn finish(&mut self, batches: Option<FlushOutcome>) -> Result<()> {
        let mut outcome = batches.unwrap_or_default();
        let mut failures = std::mem::take(&mut self.pending_failures);
        failures.append(&mut outcome.failures);
        outcome.failures = failures;
        outcome.duration_ms = self
            .flush_started
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0);

        if outcome.is_success() {
            self.state.commit(outcome.succeeded.len())?;
            info!(
                "Unit of work {} committed - {} documents in {} batches, {}ms",
                self.id(),
                outcome.succeeded.len(),
                outcome.batches_submitted,
                outcome.duration_ms
            );
        } else {
            let failed_keys = outcome.failed_keys();
            let category = outcome
                .failures
                .first()
                .map(IndexingFailure::category)
                .unwrap_or(ErrorCategory::Infrastructure);
            let summary = outcome
                .failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            error!(
                "Unit of work {} failed - {} of {} documents not indexed: {}",
                self.id(),
                failed_keys.len(),
                failed_keys.len() + outcome.succeeded.len(),
                summary
            );
            self.state.fail(failed_keys, summary, category)?;
        }

        self.dispatcher.record_flush(&outcome);
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Rollback: discard pending work, await in-flight batches, ignore results
    pub async fn after_rollback(&mut self) -> Result<RollbackOutcome> {
        if let Some(outcome) = &self.rollback {
            return Ok(outcome.clone());
        }

        let mut outcome = RollbackOutcome::default();
        if let Some(plan) = self.plan.take() {
            outcome.discarded = plan.resolve().into_iter().map(|entry| entry.key).collect();
        }
        if let Some(work) = self.in_flight.take() {
            let abandoned = self.dispatcher.abandon(work).await;
            outcome.discarded.extend(abandoned.discarded);
            outcome.unretracted.extend(abandoned.unretracted);
            outcome.ignored_failures += abandoned.ignored_failures;
        }
        if let Some(flushed) = &self.outcome {
            outcome.unretracted.extend(flushed.succeeded.iter().cloned());
        }
        self.pending_failures.clear();

        self.state.roll_back(outcome.unretracted.len())?;
        if outcome.unretracted.is_empty() {
            info!("Unit of work {} rolled back", self.id());
        } else {
            warn!(
                "Unit of work {} rolled back after {} documents were indexed; they are not retracted",
                self.id(),
                outcome.unretracted.len()
            );
        }

        self.dispatcher.record_rollback();
        self.rollback = Some(outcome.clone());
        Ok(outcome)
    }
}

#[async_trait]
impl TransactionObserver for IndexingUnitOfWork {
    async fn before_commit(&mut self) -> Result<()> {
        IndexingUnitOfWork::before_commit(self).await
    }

    async fn after_commit(&mut self) -> Result<FlushOutcome> {
        IndexingUnitOfWork::after_commit(self).await
    }

    async fn after_rollback(&mut self) -> Result<RollbackOutcome> {
        IndexingUnitOfWork::after_rollback(self).await
    }
}
