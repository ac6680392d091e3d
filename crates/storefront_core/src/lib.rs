//! Core domain logic for the storefront catalog.
//! This crate is the single source of truth for catalog invariants,
//! including product/tag association reconciliation.

pub mod db;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::category::{Category, CategoryId, CategoryRecord, NewCategory};
pub use model::product::{
    NewProduct, Product, ProductChanges, ProductId, ProductRecord, DEFAULT_STOCK,
};
pub use model::product_tag::{ProductTag, ProductTagId};
pub use model::tag::{NewTag, Tag, TagId, TagRecord};
pub use reconcile::{
    plan_reconciliation, Association, AssociationStore, AssociationWriter, ReconcileError,
    ReconcileOutcome, ReconcilePlan, ReconcileResult, RelationReconciler,
};
pub use repo::catalog_repo::{
    CatalogRepository, EntityKind, RepoError, RepoResult, SqliteCatalogRepository,
};
pub use repo::product_tag_repo::SqliteProductTagStore;
pub use service::catalog_service::{CatalogResult, CatalogService, CatalogServiceError};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
