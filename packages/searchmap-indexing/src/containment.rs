//! Containment graph
//!
//! Answers "which indexed documents embed entity X" for a changed entity.
//!
//! ## Build
//! 1. Reverse-edge index: contained type -> direct embedding edges
//! 2. Upward BFS per contained type, bounded by the configured depth and by
//!    each embedding's own `max_depth`
//! 3. Each chain ending at an indexed type becomes a `ContainmentPath` whose
//!    read set is narrowed hop by hop; chains reading nothing are pruned
//!
//! ## Runtime
//! The affected instances are located through the `ReverseAssociationLoader`.

use crate::collaborators::ReverseAssociationLoader;
use crate::error::{IndexingError, Result};
use crate::model::{EntityKey, TypeIdentifier};
use crate::paths::{PathSet, ReadSet};
use crate::registry::{EmbeddedAssociation, TypeContextRegistry};
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::debug;

/// One embedding hop: `containing.property` embeds `contained`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainmentHop {
    pub containing: TypeIdentifier,
    pub property: String,
    pub contained: TypeIdentifier,
}

/// Route from an indexed root type down to an embedded type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainmentPath {
    /// Indexed root type
    pub containing: TypeIdentifier,
    /// Embedded leaf type
    pub contained: TypeIdentifier,
    /// Hops from root to leaf
    pub hops: Vec<ContainmentHop>,
    /// Leaf paths read by the root document through this route
    pub reads: ReadSet,
}

impl ContainmentPath {
    /// Dotted traversal descriptor, e.g. `Order.lines.product`
    pub fn descriptor(&self) -> String {
        let mut out = self.containing.as_str().to_string();
        for hop in &self.hops {
            out.push('.');
            out.push_str(&hop.property);
        }
        out
    }

    pub fn depth(&self) -> usize {
        self.hops.len()
    }
}

impl fmt::Display for ContainmentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} reads {}", self.descriptor(), self.contained, self.reads)
    }
}

#[derive(Debug, Clone)]
struct ReverseEdge<'a> {
    containing: &'a TypeIdentifier,
    embedding: &'a EmbeddedAssociation,
}

/// Precomputed containment closure
#[derive(Debug, Default)]
pub struct ContainmentGraph {
    paths_by_contained: HashMap<TypeIdentifier, Vec<ContainmentPath>>,
}

impl ContainmentGraph {
    /// Static analysis of the registry's embedded associations
    pub fn build(registry: &TypeContextRegistry, max_depth: usize) -> Self {
        let mut reverse: HashMap<&TypeIdentifier, Vec<ReverseEdge<'_>>> = HashMap::new();
        let mut targets: BTreeSet<&TypeIdentifier> = BTreeSet::new();
        for ctx in registry.iter() {
            for embedding in &ctx.embeddings {
                reverse
                    .entry(&embedding.target)
                    .or_default()
                    .push(ReverseEdge {
                        containing: &ctx.type_id,
                        embedding,
                    });
                targets.insert(&embedding.target);
            }
        }

        let mut paths_by_contained = HashMap::new();
        for leaf in targets {
            let paths = Self::closure(leaf, &reverse, registry, max_depth);
            if !paths.is_empty() {
                debug!(leaf = %leaf, paths = paths.len(), "Containment closure computed");
                paths_by_contained.insert(leaf.clone(), paths);
            }
        }

        Self { paths_by_contained }
    }

    /// All root paths reaching `leaf`, found by walking reverse edges upward
    fn closure<'a>(
        leaf: &'a TypeIdentifier,
        reverse: &HashMap<&'a TypeIdentifier, Vec<ReverseEdge<'a>>>,
        registry: &TypeContextRegistry,
        max_depth: usize,
    ) -> Vec<ContainmentPath> {
        let mut paths = Vec::new();
        // chains are stored leaf-first
        let mut queue: VecDeque<Vec<ReverseEdge<'a>>> = VecDeque::new();
        let mut visited: HashSet<(&TypeIdentifier, String)> = HashSet::new();

        let start = |edge: &ReverseEdge<'a>| vec![edge.clone()];
        if let Some(edges) = reverse.get(leaf) {
            queue.extend(edges.iter().map(start));
        }

        while let Some(chain) = queue.pop_front() {
            let top = chain[chain.len() - 1].containing;
            let descriptor = chain_descriptor(&chain);
            if !visited.insert((top, descriptor)) {
                continue;
            }

            let indexed = registry.get(top).map(|c| c.is_indexed()).unwrap_or(false);
            if indexed && depth_allowed(&chain) {
                if let Some(reads) = chain_reads(&chain) {
                    paths.push(to_path(leaf, &chain, reads));
                }
            }

            if chain.len() >= max_depth {
                continue;
            }
            if let Some(edges) = reverse.get(top) {
                for edge in edges {
                    let mut extended = chain.clone();
                    extended.push(edge.clone());
                    queue.push_back(extended);
                }
            }
        }

        paths.sort_by(|a, b| {
            (a.containing.as_str(), a.descriptor()).cmp(&(b.containing.as_str(), b.descriptor()))
        });
        paths
    }

    /// Precomputed paths ending at `contained`
    pub fn paths_for(&self, contained: &TypeIdentifier) -> &[ContainmentPath] {
        self.paths_by_contained
            .get(contained)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `type_id` is embedded in at least one indexed type
    pub fn is_contained(&self, type_id: &TypeIdentifier) -> bool {
        self.paths_by_contained.contains_key(type_id)
    }

    pub fn path_count(&self) -> usize {
        self.paths_by_contained.values().map(Vec::len).sum()
    }

    /// Indexed documents embedding `changed`, restricted to paths reading one
    /// of `changed_paths` (any path when `None`). Sorted, deduplicated.
    pub async fn reindex_required_roots(
        &self,
        changed: &EntityKey,
        changed_paths: Option<&PathSet>,
        loader: &dyn ReverseAssociationLoader,
    ) -> Result<Vec<EntityKey>> {
        let mut roots = BTreeSet::new();

        for path in self.paths_for(&changed.type_id) {
            if !path.reads.is_triggered_by(changed_paths) {
                continue;
            }

            let mut stream = loader.load_containing_entities(changed, path);
            while let Some(item) = stream.next().await {
                let root = item.map_err(|e| IndexingError::LoaderFailure {
                    key: changed.clone(),
                    message: format!("{}: {}", path.descriptor(), e),
                })?;
                roots.insert(root);
            }
        }

        debug!(
            changed = %changed,
            roots = roots.len(),
            "Containment expansion"
        );
        Ok(roots.into_iter().collect())
    }
}

fn chain_descriptor(chain: &[ReverseEdge<'_>]) -> String {
    chain
        .iter()
        .rev()
        .map(|edge| format!("{}.{}", edge.containing, edge.embedding.property))
        .collect::<Vec<_>>()
        .join("/")
}

/// Every embedding's `max_depth` must cover the levels below it
fn depth_allowed(chain: &[ReverseEdge<'_>]) -> bool {
    chain.iter().enumerate().all(|(levels_below, edge)| {
        edge.embedding
            .max_depth
            .map(|max| levels_below < max)
            .unwrap_or(true)
    })
}

/// Leaf read set computed from the root downward
fn chain_reads(chain: &[ReverseEdge<'_>]) -> Option<ReadSet> {
    let mut edges = chain.iter().rev();
    let root = edges.next()?;
    let mut reads = root.embedding.includes.clone();
    for edge in edges {
        reads = reads
            .narrow(&edge.embedding.property)?
            .restrict(&edge.embedding.includes)?;
    }
    Some(reads)
}

fn to_path(leaf: &TypeIdentifier, chain: &[ReverseEdge<'_>], reads: ReadSet) -> ContainmentPath {
    let hops: Vec<ContainmentHop> = chain
        .iter()
        .rev()
        .map(|edge| ContainmentHop {
            containing: edge.containing.clone(),
            property: edge.embedding.property.clone(),
            contained: edge.embedding.target.clone(),
        })
        .collect();

    ContainmentPath {
        containing: chain[chain.len() - 1].containing.clone(),
        contained: leaf.clone(),
        hops,
        reads,
    }
}
