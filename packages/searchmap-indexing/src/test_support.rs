//! Fixture mapping shared by unit tests

use crate::mapping::SearchMapping;
use crate::paths::ReadSet;
use crate::resolver::StaticTypeHierarchy;
use std::sync::Arc;

/// Orders embedding line items embedding products, plus standalone books.
///
/// `Warehouse` is mapped but neither indexed nor embedded.
pub(crate) fn fixture_mapping() -> Arc<SearchMapping> {
    let hierarchy = StaticTypeHierarchy::new().with_parent("Paperback", "Book");

    SearchMapping::builder()
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
            t.add_contained("Warehouse");
        })
        .build()
        .expect("fixture mapping is valid")
}
