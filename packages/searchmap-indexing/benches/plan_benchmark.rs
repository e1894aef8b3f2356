//! Indexing plan benchmarks
//!
//! - Registration and merge of repeated changes per key
//! - Containment closure over deep embedding chains
//! - Full flush against a no-op backend

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::stream::{self, BoxStream, StreamExt};
use searchmap_indexing::{
    BackendWorkClient, BatchReport, CollaboratorError, ContainmentGraph, ContainmentPath,
    Dispatcher, DocumentFieldValues, DynamicEntity, EntityInstance, EntityKey, EntityLoader,
    EntityRef, FieldValueExtractor, IndexingConfig, IndexingPlan, IndexingServices, ReadSet,
    ReverseAssociationLoader, SearchMapping, TypeContext, TypeContextRegistry, WorkBatch,
};
use std::sync::Arc;

fn mapping() -> Arc<SearchMapping> {
    SearchMapping::builder()
        .types(|t| {
            t.add_indexed("Order", "orders").embed_with(
                "lines",
                "LineItem",
                ReadSet::paths(["price", "product.name"]),
                None,
            );
            t.add_contained("LineItem").embed("product", "Product");
            t.add_contained("Product");
            t.add_indexed("Book", "books");
        })
        .build()
        .unwrap()
}

fn book(id: i64) -> EntityRef {
    DynamicEntity::new("Book")
        .with("id", id)
        .with("title", "bench")
        .into_ref()
}

// ============================================================================
// Plan
// ============================================================================

fn bench_plan_merge(c: &mut Criterion) {
    let mapping = mapping();
    let mut group = c.benchmark_group("plan_merge");

    for keys in [100i64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(keys as u64 * 3));
        group.bench_with_input(BenchmarkId::from_parameter(keys), &keys, |b, &keys| {
            b.iter(|| {
                let mut plan = IndexingPlan::new(mapping.clone());
                for id in 0..keys {
                    let key = EntityKey::new("Book", id);
                    plan.add(key.clone(), Some(book(id))).unwrap();
                    plan.update(key.clone(), None).unwrap();
                    if id % 3 == 0 {
                        plan.delete(key).unwrap();
                    }
                }
                black_box(plan.resolve())
            });
        });
    }

    group.finish();
}

// ============================================================================
// Containment
// ============================================================================

fn chain_registry(depth: usize) -> TypeContextRegistry {
    let mut builder = TypeContextRegistry::builder();
    builder.add_indexed("Level0", "levels").embed("child", "Level1");
    for level in 1..depth {
        builder
            .add_contained(format!("Level{}", level))
            .embed("child", format!("Level{}", level + 1));
    }
    builder.add_contained(format!("Level{}", depth));
    builder.build().unwrap()
}

fn bench_containment_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("containment_build");

    for depth in [2usize, 8, 32] {
        let registry = chain_registry(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &registry, |b, registry| {
            b.iter(|| black_box(ContainmentGraph::build(registry, 64)));
        });
    }

    group.finish();
}

// ============================================================================
// Flush
// ============================================================================

struct NoopServices;

impl ReverseAssociationLoader for NoopServices {
    fn load_containing_entities<'a>(
        &'a self,
        _leaf: &'a EntityKey,
        _path: &'a ContainmentPath,
    ) -> BoxStream<'a, Result<EntityKey, CollaboratorError>> {
        stream::empty().boxed()
    }
}

impl FieldValueExtractor for NoopServices {
    fn extract(
        &self,
        instance: &dyn EntityInstance,
        _context: &TypeContext,
    ) -> Result<DocumentFieldValues, CollaboratorError> {
        let mut document = DocumentFieldValues::new();
        if let Some(title) = instance.property("title") {
            document.insert("title".to_string(), title);
        }
        Ok(document)
    }
}

#[async_trait]
impl EntityLoader for NoopServices {
    async fn load(&self, _key: &EntityKey) -> Result<Option<EntityRef>, CollaboratorError> {
        Ok(None)
    }
}

#[async_trait]
impl BackendWorkClient for NoopServices {
    async fn submit(&self, _batch: WorkBatch) -> Result<BatchReport, CollaboratorError> {
        Ok(BatchReport::success())
    }
}

fn bench_flush(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let services = Arc::new(NoopServices);
    let dispatcher = Arc::new(Dispatcher::new(
        mapping(),
        IndexingServices {
            reverse_loader: services.clone(),
            extractor: services.clone(),
            entity_loader: services.clone(),
            backend: services,
        },
    ));

    let mut group = c.benchmark_group("flush");
    for keys in [100i64, 1_000] {
        group.throughput(Throughput::Elements(keys as u64));
        group.bench_with_input(BenchmarkId::from_parameter(keys), &keys, |b, &keys| {
            b.to_async(&runtime).iter(|| {
                let dispatcher = dispatcher.clone();
                async move {
                    let mut uow = dispatcher.begin();
                    for id in 0..keys {
                        uow.register_create(EntityKey::new("Book", id), Some(book(id)))
                            .unwrap();
                    }
                    black_box(uow.flush().await.unwrap())
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan_merge, bench_containment_build, bench_flush);
criterion_main!(benches);
