//! Dispatcher / executor
//!
//! Turns a resolved plan into backend work:
//! 1. containment expansion of the plan's change log
//! 2. translation of each operation into a `WorkItem` (field extraction,
//!    load-at-flush through the `EntityLoader`)
//! 3. batching per `batch_size`
//! 4. concurrent submission bounded by `max_in_flight_batches`, each call
//!    wrapped in the submission deadline
//!
//! Batches still waiting for a permit when the transaction rolls back are
//! discarded; batches already handed to the backend cannot be recalled.

use crate::collaborators::{
    BackendWorkClient, BatchReport, EntityLoader, FieldValueExtractor, ReverseAssociationLoader,
    WorkBatch, WorkItem, WorkOperation,
};
use crate::error::{FailureCause, IndexingError, IndexingFailure, Result};
use crate::mapping::SearchMapping;
use crate::model::{EntityKey, EntityRef};
use crate::plan::{IndexingPlan, PendingOperation, PlanEntry};
use crate::session::IndexingUnitOfWork;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(feature = "metrics")]
use crate::metrics::IndexingMetrics;

/// Collaborators used at flush time
#[derive(Clone)]
pub struct IndexingServices {
    pub reverse_loader: Arc<dyn ReverseAssociationLoader>,
    pub extractor: Arc<dyn FieldValueExtractor>,
    pub entity_loader: Arc<dyn EntityLoader>,
    pub backend: Arc<dyn BackendWorkClient>,
}

/// Result of a flush
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushOutcome {
    pub succeeded: Vec<EntityKey>,
    pub failures: Vec<IndexingFailure>,
    pub batches_submitted: usize,
    pub duration_ms: u64,
}

impl FlushOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_keys(&self) -> Vec<EntityKey> {
        self.failures
            .iter()
            .flat_map(|f| f.keys.iter().cloned())
            .collect()
    }

    /// `FlushFailed` when any entity was not indexed
    pub fn into_result(self) -> Result<FlushOutcome> {
        if self.is_success() {
            return Ok(self);
        }
        Err(IndexingError::FlushFailed {
            failed: self.failed_keys(),
            succeeded: self.succeeded,
            failures: self.failures,
        })
    }
}

/// Result of a rollback
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackOutcome {
    /// Entities whose work never reached the backend
    pub discarded: Vec<EntityKey>,
    /// Entities the backend acknowledged before the rollback
    pub unretracted: Vec<EntityKey>,
    /// Failures of in-flight batches, ignored
    pub ignored_failures: usize,
}

/// Work translated from a plan, ready for submission
#[derive(Debug, Default)]
pub struct PreparedFlush {
    pub batches: Vec<WorkBatch>,
    /// Keys that could not be translated into work items
    pub failures: Vec<IndexingFailure>,
}

impl PreparedFlush {
    pub fn item_count(&self) -> usize {
        self.batches.iter().map(WorkBatch::len).sum()
    }

    pub fn keys(&self) -> Vec<EntityKey> {
        self.batches.iter().flat_map(WorkBatch::keys).collect()
    }
}

#[derive(Debug)]
enum BatchResult {
    Acknowledged(BatchReport),
    Failed(FailureCause),
    /// Never reached the backend
    Discarded,
}

/// Submitted batches of one unit of work
#[derive(Debug)]
pub struct InFlightWork {
    tasks: Vec<(Vec<EntityKey>, JoinHandle<BatchResult>)>,
    cancel: CancellationToken,
}

impl InFlightWork {
    pub fn batch_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for InFlightWork {
    fn drop(&mut self) {
        // batches not yet holding a permit never reach the backend
        self.cancel.cancel();
    }
}

/// Executes plans against the backend
pub struct Dispatcher {
    mapping: Arc<SearchMapping>,
    services: IndexingServices,
    #[cfg(feature = "metrics")]
    metrics: Option<IndexingMetrics>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", self.mapping.config())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(mapping: Arc<SearchMapping>, services: IndexingServices) -> Self {
        Self {
            mapping,
            services,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: IndexingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[cfg(feature = "metrics")]
    fn record_submitted(&self, items: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_submitted(items);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn record_submitted(&self, _items: usize) {}

    #[cfg(feature = "metrics")]
    pub(crate) fn record_flush(&self, outcome: &FlushOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_flush(outcome);
        }
    }

    #[cfg(not(feature = "metrics"))]
    pub(crate) fn record_flush(&self, _outcome: &FlushOutcome) {}

    #[cfg(feature = "metrics")]
    pub(crate) fn record_rollback(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_rollback();
        }
    }

    #[cfg(not(feature = "metrics"))]
    pub(crate) fn record_rollback(&self) {}

    pub fn mapping(&self) -> &Arc<SearchMapping> {
        &self.mapping
    }

    /// Open a unit of work bound to this dispatcher
    pub fn begin(self: &Arc<Self>) -> IndexingUnitOfWork {
        IndexingUnitOfWork::new(self.clone())
    }

    /// Expand, resolve and translate a plan.
    ///
    /// Reverse-association loader errors, including loaded roots that cannot
    /// be reindexed, abort the whole flush; translation errors only fail the
    /// affected keys.
    pub async fn prepare(&self, mut plan: IndexingPlan) -> Result<PreparedFlush> {
        let changes = plan.changes().to_vec();
        let mut expanded = 0usize;
        for change in &changes {
            let roots = self
                .mapping
                .containment()
                .reindex_required_roots(
                    &change.key,
                    change.changed_paths.as_ref(),
                    self.services.reverse_loader.as_ref(),
                )
                .await?;
            for root in roots {
                // a root that cannot be reindexed breaks the loader contract
                let scheduled = plan.reindex(root.clone()).map_err(|e| {
                    IndexingError::LoaderFailure {
                        key: change.key.clone(),
                        message: format!("invalid containing entity {}: {}", root, e),
                    }
                })?;
                if scheduled {
                    expanded += 1;
                }
            }
        }
        if expanded > 0 {
            debug!(
                "Containment expansion scheduled {} root documents from {} changes",
                expanded,
                changes.len()
            );
        }

        let entries = plan.resolve();
        let mut items = Vec::with_capacity(entries.len());
        let mut failures = Vec::new();
        for entry in entries {
            let key = entry.key.clone();
            match self.translate(entry).await {
                Ok(item) => items.push(item),
                Err(cause) => {
                    warn!("Cannot translate {} into a work item: {}", key, cause);
                    failures.push(IndexingFailure::new(vec![key], cause));
                }
            }
        }

        let batch_size = self.mapping.config().batch_size;
        let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            batches.push(WorkBatch {
                sequence: batches.len(),
                items: items.by_ref().take(batch_size).collect(),
            });
        }

        Ok(PreparedFlush { batches, failures })
    }

    async fn translate(&self, entry: PlanEntry) -> std::result::Result<WorkItem, FailureCause> {
        let PlanEntry { key, operation } = entry;
        let ctx = self
            .mapping
            .registry()
            .get(&key.type_id)
            .ok_or_else(|| {
                FailureCause::Extraction(format!("type '{}' is not mapped", key.type_id))
            })?;
        let index_name = ctx
            .index_name()
            .ok_or_else(|| {
                FailureCause::Extraction(format!("type '{}' has no index", key.type_id))
            })?
            .to_string();

        let (work_op, instance) = match operation {
            PendingOperation::Add(instance) => (WorkOperation::Add, instance),
            PendingOperation::Update(instance) | PendingOperation::AddOrUpdate(instance) => {
                (WorkOperation::Update, instance)
            }
            PendingOperation::Delete | PendingOperation::Noop => {
                return Ok(delete_item(key, index_name));
            }
        };

        let instance: EntityRef = match instance {
            Some(instance) => instance,
            None => match self.services.entity_loader.load(&key).await {
                Ok(Some(loaded)) => loaded,
                Ok(None) => {
                    debug!("{} no longer exists, deleting its document", key);
                    return Ok(delete_item(key, index_name));
                }
                Err(e) => return Err(FailureCause::Loader(e.to_string())),
            },
        };

        let document = self
            .services
            .extractor
            .extract(instance.as_ref(), ctx)
            .map_err(|e| FailureCause::Extraction(e.to_string()))?;

        Ok(WorkItem {
            document_id: key.id.to_document_id(),
            key,
            index_name,
            operation: work_op,
            document: Some(document),
        })
    }

    /// Spawn one task per batch
    pub fn submit(&self, batches: Vec<WorkBatch>) -> InFlightWork {
        let config = self.mapping.config();
        let semaphore = Arc::new(Semaphore::new(config.max_in_flight_batches));
        let cancel = CancellationToken::new();
        let timeout = config.submit_timeout();

        self.record_submitted(batches.iter().map(WorkBatch::len).sum());

        let tasks = batches
            .into_iter()
            .map(|batch| {
                let keys = batch.keys();
                let handle = tokio::spawn(submit_batch(
                    self.services.backend.clone(),
                    batch,
                    semaphore.clone(),
                    cancel.clone(),
                    timeout,
                ));
                (keys, handle)
            })
            .collect();

        InFlightWork { tasks, cancel }
    }

    /// Await every batch and aggregate per-key results
    pub async fn settle(&self, mut work: InFlightWork) -> FlushOutcome {
        let batches_submitted = work.tasks.len();
        let (keys, handles): (Vec<_>, Vec<_>) = std::mem::take(&mut work.tasks).into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        let mut outcome = FlushOutcome {
            batches_submitted,
            ..Default::default()
        };
        for (keys, result) in keys.into_iter().zip(results) {
            match result {
                Ok(BatchResult::Acknowledged(report)) => {
                    for key in keys {
                        match report.item_failures.get(&key) {
                            Some(reason) => {
                                warn!("Backend rejected {}: {}", key, reason);
                                outcome.failures.push(IndexingFailure::new(
                                    vec![key],
                                    FailureCause::Rejected(reason.clone()),
                                ));
                            }
                            None => outcome.succeeded.push(key),
                        }
                    }
                }
                Ok(BatchResult::Failed(cause)) => {
                    error!("Batch of {} work items failed: {}", keys.len(), cause);
                    outcome.failures.push(IndexingFailure::new(keys, cause));
                }
                Ok(BatchResult::Discarded) => {
                    outcome.failures.push(IndexingFailure::new(
                        keys,
                        FailureCause::Backend("batch discarded before submission".to_string()),
                    ));
                }
                Err(join_err) => {
                    error!("Batch task panicked: {}", join_err);
                    outcome.failures.push(IndexingFailure::new(
                        keys,
                        FailureCause::Backend(format!("batch task panicked: {}", join_err)),
                    ));
                }
            }
        }
        outcome
    }

    /// Discard waiting batches, await in-flight ones and ignore their results
    pub async fn abandon(&self, mut work: InFlightWork) -> RollbackOutcome {
        work.cancel.cancel();
        let (keys, handles): (Vec<_>, Vec<_>) = std::mem::take(&mut work.tasks).into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        let mut outcome = RollbackOutcome::default();
        for (keys, result) in keys.into_iter().zip(results) {
            match result {
                Ok(BatchResult::Acknowledged(report)) => {
                    for key in keys {
                        if report.item_failures.contains_key(&key) {
                            outcome.ignored_failures += 1;
                        } else {
                            outcome.unretracted.push(key);
                        }
                    }
                }
                Ok(BatchResult::Discarded) => outcome.discarded.extend(keys),
                Ok(BatchResult::Failed(_)) | Err(_) => outcome.ignored_failures += 1,
            }
        }

        if !outcome.unretracted.is_empty() {
            warn!(
                "{} documents were indexed before the rollback and stay in the index",
                outcome.unretracted.len()
            );
        }
        info!("Rollback discarded {} work items", outcome.discarded.len());
        outcome
    }
}

fn delete_item(key: EntityKey, index_name: String) -> WorkItem {
    WorkItem {
        document_id: key.id.to_document_id(),
        key,
        index_name,
        operation: WorkOperation::Delete,
        document: None,
    }
}

async fn submit_batch(
    backend: Arc<dyn BackendWorkClient>,
    batch: WorkBatch,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    timeout: Duration,
) -> BatchResult {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return BatchResult::Discarded,
        permit = semaphore.acquire_owned() => permit,
    };
    let _permit = match permit {
        Ok(permit) => permit,
        Err(_) => return BatchResult::Discarded,
    };

    let sequence = batch.sequence;
    match tokio::time::timeout(timeout, backend.submit(batch)).await {
        Ok(Ok(report)) => BatchResult::Acknowledged(report),
        Ok(Err(e)) => BatchResult::Failed(FailureCause::Backend(e.to_string())),
        Err(_) => {
            warn!(
                "Batch {} timed out after {}ms",
                sequence,
                timeout.as_millis()
            );
            BatchResult::Failed(FailureCause::Timeout {
                after_ms: timeout.as_millis() as u64,
            })
        }
    }
}
