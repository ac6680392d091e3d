//! Catalog domain model.
//!
//! # Responsibility
//! - Define the category/product/tag records shared by repository and
//!   service layers.
//! - Define the product/tag join record consumed by the relation reconciler.
//!
//! # Invariants
//! - Every entity is identified by a storage-assigned integer id.
//! - A product/tag pair appears in at most one live join row.

pub mod category;
pub mod product;
pub mod product_tag;
pub mod tag;
