//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for the catalog.
//! - Provide the SQLite association store behind the relation reconciler.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repositories refuse connections whose schema is not fully migrated.
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.

pub mod catalog_repo;
pub mod product_tag_repo;
mod schema;
