//! Property path sets
//!
//! Paths are dotted property chains relative to an entity type
//! (`"price"`, `"product.name"`). Two paths overlap when they are equal or
//! one is a dotted prefix of the other.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Whether `a` and `b` touch the same property subtree
pub fn paths_overlap(a: &str, b: &str) -> bool {
    a == b || is_dotted_prefix(a, b) || is_dotted_prefix(b, a)
}

fn is_dotted_prefix(prefix: &str, path: &str) -> bool {
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path.as_bytes()[prefix.len()] == b'.'
}

/// Ordered set of property paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathSet(BTreeSet<String>);

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        self.0.insert(path.into())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn union_with(&mut self, other: &PathSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// True when any path of `self` overlaps any path of `other`
    pub fn intersects(&self, other: &PathSet) -> bool {
        self.iter()
            .any(|a| other.iter().any(|b| paths_overlap(a, b)))
    }

    /// Paths below `property`, relative to it
    fn strip_prefix(&self, property: &str) -> PathSet {
        self.0
            .iter()
            .filter_map(|p| {
                p.strip_prefix(property)
                    .and_then(|rest| rest.strip_prefix('.'))
                    .map(str::to_string)
            })
            .collect()
    }
}

impl<S: Into<String>> FromIterator<S> for PathSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for PathSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, path) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            f.write_str(path)?;
        }
        write!(f, "}}")
    }
}

/// Property paths read by a document (or by one embedding of it)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSet {
    /// Every property is read
    #[default]
    All,
    Paths(PathSet),
}

impl ReadSet {
    pub fn paths<S: Into<String>>(paths: impl IntoIterator<Item = S>) -> Self {
        ReadSet::Paths(paths.into_iter().collect())
    }

    /// Read set seen from inside the embedded `property`.
    ///
    /// Naming the property itself reads the whole embedded object. `None`
    /// when nothing below `property` is read.
    pub fn narrow(&self, property: &str) -> Option<ReadSet> {
        match self {
            ReadSet::All => Some(ReadSet::All),
            ReadSet::Paths(paths) if paths.contains(property) => Some(ReadSet::All),
            ReadSet::Paths(paths) => {
                let nested = paths.strip_prefix(property);
                (!nested.is_empty()).then_some(ReadSet::Paths(nested))
            }
        }
    }

    /// Intersection keeping the more specific of two overlapping paths.
    /// `None` when nothing is left.
    pub fn restrict(&self, other: &ReadSet) -> Option<ReadSet> {
        match (self, other) {
            (ReadSet::All, other) => Some(other.clone()),
            (this, ReadSet::All) => Some(this.clone()),
            (ReadSet::Paths(a), ReadSet::Paths(b)) => {
                let mut kept = PathSet::new();
                for pa in a.iter() {
                    for pb in b.iter() {
                        if pa == pb || is_dotted_prefix(pb, pa) {
                            kept.insert(pa);
                        } else if is_dotted_prefix(pa, pb) {
                            kept.insert(pb);
                        }
                    }
                }
                (!kept.is_empty()).then_some(ReadSet::Paths(kept))
            }
        }
    }

    /// Whether a change to `changed` affects what this set reads.
    /// Unknown changes (`None`) always trigger.
    pub fn is_triggered_by(&self, changed: Option<&PathSet>) -> bool {
        match (self, changed) {
            (_, None) => true,
            (ReadSet::All, Some(changed)) => !changed.is_empty(),
            (ReadSet::Paths(paths), Some(changed)) => paths.intersects(changed),
        }
    }
}

impl fmt::Display for ReadSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadSet::All => write!(f, "*"),
            ReadSet::Paths(paths) => write!(f, "{}", paths),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> PathSet {
        paths.iter().copied().collect()
    }

    #[test]
    fn test_paths_overlap() {
        assert!(paths_overlap("price", "price"));
        assert!(paths_overlap("product", "product.name"));
        assert!(paths_overlap("product.name", "product"));
        assert!(!paths_overlap("product", "productCode"));
        assert!(!paths_overlap("price", "quantity"));
    }

    #[test]
    fn test_narrow() {
        let reads = ReadSet::paths(["price", "product.name", "product.sku"]);
        assert_eq!(
            reads.narrow("product"),
            Some(ReadSet::paths(["name", "sku"]))
        );
        assert_eq!(reads.narrow("customer"), None);
        assert_eq!(ReadSet::paths(["product"]).narrow("product"), Some(ReadSet::All));
        assert_eq!(ReadSet::All.narrow("anything"), Some(ReadSet::All));
    }

    #[test]
    fn test_restrict_keeps_specific_paths() {
        let outer = ReadSet::paths(["name", "supplier"]);
        let inner = ReadSet::paths(["name", "supplier.country", "weight"]);
        assert_eq!(
            outer.restrict(&inner),
            Some(ReadSet::paths(["name", "supplier.country"]))
        );
        assert_eq!(
            ReadSet::paths(["name"]).restrict(&ReadSet::paths(["weight"])),
            None
        );
        assert_eq!(ReadSet::All.restrict(&inner), Some(inner.clone()));
    }

    #[test]
    fn test_is_triggered_by() {
        let reads = ReadSet::paths(["price", "product.name"]);
        assert!(reads.is_triggered_by(None));
        assert!(reads.is_triggered_by(Some(&set(&["price"]))));
        assert!(reads.is_triggered_by(Some(&set(&["product"]))));
        assert!(!reads.is_triggered_by(Some(&set(&["quantity"]))));
        assert!(ReadSet::All.is_triggered_by(Some(&set(&["anything"]))));
        assert!(!ReadSet::All.is_triggered_by(Some(&PathSet::new())));
    }
}
