//! Product/tag join record.
//!
//! # Invariants
//! - Join rows are inserted and deleted, never updated; `id` is immutable.
//! - `(owner_id, target_id)` is unique across live rows.

use crate::model::product::ProductId;
use crate::model::tag::TagId;
use crate::reconcile::Association;

/// Storage-assigned join row id.
pub type ProductTagId = i64;

/// One `product_tags` row: product `owner_id` is tagged with `target_id`.
pub type ProductTag = Association<ProductId, TagId, ProductTagId>;
