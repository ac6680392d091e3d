//! Tag records.

use crate::model::product::Product;
use serde::{Deserialize, Serialize};

/// Storage-assigned tag id.
///
/// The relation reconciler treats these as opaque values and never loads the
/// tag row behind them.
pub type TagId = i64;

/// One tag row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub tag_name: String,
}

/// Input for tag create and rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTag {
    pub tag_name: String,
}

impl NewTag {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
        }
    }
}

/// Tag read model including every product carrying the tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagRecord {
    #[serde(flatten)]
    pub tag: Tag,
    /// Products sorted by id.
    pub products: Vec<Product>,
}
