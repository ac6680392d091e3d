//! Product records.
//!
//! # Invariants
//! - `category_id` is nullable; deleting a category detaches its products.
//! - Tags are never stored on the product row; they live in `product_tags`.

use crate::model::category::{Category, CategoryId};
use crate::model::tag::Tag;
use serde::{Deserialize, Serialize};

/// Storage-assigned product id. Products are the owner side of the
/// product/tag relation.
pub type ProductId = i64;

/// Stock applied when a create request does not carry one.
pub const DEFAULT_STOCK: i64 = 10;

/// One product row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub product_name: String,
    pub price: f64,
    pub stock: i64,
    pub category_id: Option<CategoryId>,
}

/// Input for product create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub product_name: String,
    pub price: f64,
    #[serde(default = "default_stock")]
    pub stock: i64,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

impl NewProduct {
    pub fn new(product_name: impl Into<String>, price: f64) -> Self {
        Self {
            product_name: product_name.into(),
            price,
            stock: DEFAULT_STOCK,
            category_id: None,
        }
    }
}

/// Partial product update. `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductChanges {
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stock: Option<i64>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

impl ProductChanges {
    /// Returns whether no column would be written.
    pub fn is_empty(&self) -> bool {
        self.product_name.is_none()
            && self.price.is_none()
            && self.stock.is_none()
            && self.category_id.is_none()
    }
}

/// Product read model with its category and tags resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRecord {
    #[serde(flatten)]
    pub product: Product,
    pub category: Option<Category>,
    /// Tags sorted by id.
    pub tags: Vec<Tag>,
}

impl ProductRecord {
    /// Returns the tag ids of this product in ascending order.
    pub fn tag_ids(&self) -> Vec<i64> {
        self.tags.iter().map(|tag| tag.id).collect()
    }
}

fn default_stock() -> i64 {
    DEFAULT_STOCK
}
