//! In-memory collaborators shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use searchmap_indexing::{
    BackendWorkClient, BatchReport, CollaboratorError, ContainmentPath, Dispatcher,
    DocumentFieldValues, DynamicEntity, EntityInstance, EntityKey, EntityLoader, EntityRef,
    FieldValueExtractor, IndexingConfig, IndexingServices, ReadSet, ReverseAssociationLoader,
    SearchMapping, StaticTypeHierarchy, TypeContext, WorkBatch,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Orders embedding line items embedding products, plus standalone books
pub fn fixture_mapping(config: IndexingConfig) -> Arc<SearchMapping> {
    let hierarchy = StaticTypeHierarchy::new().with_parent("Paperback", "Book");

    SearchMapping::builder()
        .config(config)
        .hierarchy(Arc::new(hierarchy))
        .types(|t| {
            t.add_indexed("Order", "orders").embed_with(
                "lines",
                "LineItem",
                ReadSet::paths(["price", "quantity", "product.name"]),
                None,
            );
            t.add_contained("LineItem").embed("product", "Product");
            t.add_contained("Product");
            t.add_indexed("Book", "books").dirty_paths(["title", "author"]);
        })
        .build()
        .unwrap()
}

pub fn book(id: i64, title: &str) -> EntityRef {
    DynamicEntity::new("Book")
        .with("id", id)
        .with("title", title)
        .into_ref()
}

pub fn order(id: i64) -> EntityRef {
    DynamicEntity::new("Order")
        .with("id", id)
        .with("status", "open")
        .into_ref()
}

// ═══════════════════════════════════════════════════════════════════════════
// Backend
// ═══════════════════════════════════════════════════════════════════════════

/// Backend recording every batch it receives
#[derive(Default)]
pub struct RecordingBackend {
    batches: Mutex<Vec<WorkBatch>>,
    calls_started: AtomicUsize,
    in_progress: AtomicUsize,
    peak_in_progress: AtomicUsize,
    rejections: HashMap<EntityKey, String>,
    unavailable: bool,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `key` with `reason` in the batch report
    pub fn rejecting(mut self, key: EntityKey, reason: &str) -> Self {
        self.rejections.insert(key, reason.to_string());
        self
    }

    /// Fail every submission
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Each submission waits for one permit of the returned gate
    pub fn gated(mut self, open_permits: usize) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(open_permits));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn batches(&self) -> Vec<WorkBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn submitted_keys(&self) -> Vec<EntityKey> {
        self.batches().iter().flat_map(WorkBatch::keys).collect()
    }

    /// Highest number of submissions observed at the same time
    pub fn peak_in_progress(&self) -> usize {
        self.peak_in_progress.load(Ordering::SeqCst)
    }

    pub fn calls_started(&self) -> usize {
        self.calls_started.load(Ordering::SeqCst)
    }

    pub async fn wait_for_calls(&self, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls_started() < expected {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("backend calls did not start in time");
    }
}

#[async_trait]
impl BackendWorkClient for RecordingBackend {
    async fn submit(&self, batch: WorkBatch) -> Result<BatchReport, CollaboratorError> {
        self.calls_started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_progress.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_progress.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_progress.fetch_sub(1, Ordering::SeqCst);

        let keys = batch.keys();
        self.batches.lock().unwrap().push(batch);
        if self.unavailable {
            return Err(anyhow::anyhow!("backend unavailable"));
        }

        let mut report = BatchReport::success();
        for key in keys {
            if let Some(reason) = self.rejections.get(&key) {
                report = report.with_failure(key, reason.clone());
            }
        }
        Ok(report)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Loaders and extraction
// ═══════════════════════════════════════════════════════════════════════════

/// Reverse associations keyed by (leaf, path descriptor)
#[derive(Default)]
pub struct MapReverseLoader {
    containing: HashMap<(EntityKey, String), Vec<EntityKey>>,
    broken: bool,
    calls: AtomicUsize,
}

impl MapReverseLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, leaf: EntityKey, descriptor: &str, roots: Vec<EntityKey>) -> Self {
        self.containing
            .insert((leaf, descriptor.to_string()), roots);
        self
    }

    /// Every stream yields one root, then an error
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReverseAssociationLoader for MapReverseLoader {
    fn load_containing_entities<'a>(
        &'a self,
        leaf: &'a EntityKey,
        path: &'a ContainmentPath,
    ) -> BoxStream<'a, Result<EntityKey, CollaboratorError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            let items = vec![
                Ok(EntityKey::new(path.containing.clone(), 1)),
                Err(anyhow::anyhow!("database connection lost")),
            ];
            return stream::iter(items).boxed();
        }

        let roots = self
            .containing
            .get(&(leaf.clone(), path.descriptor()))
            .cloned()
            .unwrap_or_default();
        stream::iter(roots.into_iter().map(Ok)).boxed()
    }
}

/// Copies every property of the instance; fails on a `fail_extraction` flag
pub struct JsonExtractor;

impl FieldValueExtractor for JsonExtractor {
    fn extract(
        &self,
        instance: &dyn EntityInstance,
        context: &TypeContext,
    ) -> Result<DocumentFieldValues, CollaboratorError> {
        if instance.property("fail_extraction").is_some() {
            anyhow::bail!("cannot extract {} document", context.type_id);
        }
        let mut document = DocumentFieldValues::new();
        for name in instance.property_names() {
            if let Some(value) = instance.property(&name) {
                document.insert(name, value);
            }
        }
        Ok(document)
    }
}

/// Entities available for load-at-flush
#[derive(Default)]
pub struct MapEntityLoader {
    entities: HashMap<EntityKey, EntityRef>,
    loads: AtomicUsize,
}

impl MapEntityLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: EntityKey, entity: EntityRef) -> Self {
        self.entities.insert(key, entity);
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityLoader for MapEntityLoader {
    async fn load(&self, key: &EntityKey) -> Result<Option<EntityRef>, CollaboratorError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.entities.get(key).cloned())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Wiring
// ═══════════════════════════════════════════════════════════════════════════

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub backend: Arc<RecordingBackend>,
    pub reverse_loader: Arc<MapReverseLoader>,
    pub entity_loader: Arc<MapEntityLoader>,
}

impl Harness {
    pub fn new(config: IndexingConfig, backend: RecordingBackend) -> Self {
        Self::with_loaders(config, backend, MapReverseLoader::new(), MapEntityLoader::new())
    }

    pub fn with_loaders(
        config: IndexingConfig,
        backend: RecordingBackend,
        reverse_loader: MapReverseLoader,
        entity_loader: MapEntityLoader,
    ) -> Self {
        init_tracing();
        let backend = Arc::new(backend);
        let reverse_loader = Arc::new(reverse_loader);
        let entity_loader = Arc::new(entity_loader);

        let services = IndexingServices {
            reverse_loader: reverse_loader.clone(),
            extractor: Arc::new(JsonExtractor),
            entity_loader: entity_loader.clone(),
            backend: backend.clone(),
        };
        let dispatcher = Arc::new(Dispatcher::new(fixture_mapping(config), services));

        Self {
            dispatcher,
            backend,
            reverse_loader,
            entity_loader,
        }
    }
}
