//! Category records.

use crate::model::product::Product;
use serde::{Deserialize, Serialize};

/// Storage-assigned category id.
pub type CategoryId = i64;

/// One product category row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub category_name: String,
}

/// Input for category create and rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub category_name: String,
}

impl NewCategory {
    pub fn new(category_name: impl Into<String>) -> Self {
        Self {
            category_name: category_name.into(),
        }
    }
}

/// Category read model including the products filed under it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRecord {
    #[serde(flatten)]
    pub category: Category,
    /// Products sorted by id.
    pub products: Vec<Product>,
}
