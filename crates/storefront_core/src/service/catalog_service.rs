//! Catalog use-case service.
//!
//! # Responsibility
//! - Provide category/product/tag create, read, update and delete APIs.
//! - Drive product tag-set updates through the relation reconciler.
//!
//! # Invariants
//! - Write use-cases return the entity as re-read from storage.
//! - Product update with `tag_ids = None` never touches join rows.
//! - Reconcile failures are surfaced unchanged; the service never retries.

use crate::model::category::{CategoryId, CategoryRecord, NewCategory};
use crate::model::product::{NewProduct, ProductChanges, ProductId, ProductRecord};
use crate::model::tag::{NewTag, TagId, TagRecord};
use crate::reconcile::{ReconcileError, ReconcileOutcome};
use crate::repo::catalog_repo::{CatalogRepository, EntityKind, RepoError, RepoResult};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Service error for catalog use-cases.
#[derive(Debug)]
pub enum CatalogServiceError {
    /// Target entity does not exist.
    NotFound { kind: EntityKind, id: i64 },
    /// Persistence-layer failure.
    Repo(RepoError),
    /// Tag-set reconciliation failure.
    Reconcile(ReconcileError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for CatalogServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Reconcile(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent catalog state: {details}"),
        }
    }
}

impl Error for CatalogServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Reconcile(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for CatalogServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Repo(other),
        }
    }
}

impl From<ReconcileError> for CatalogServiceError {
    fn from(value: ReconcileError) -> Self {
        Self::Reconcile(value)
    }
}

pub type CatalogResult<T> = Result<T, CatalogServiceError>;

/// Catalog service facade over repository implementations.
pub struct CatalogService<R: CatalogRepository> {
    repo: R,
}

impl<R: CatalogRepository> CatalogService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn list_categories(&self) -> RepoResult<Vec<CategoryRecord>> {
        self.repo.list_categories()
    }

    pub fn get_category(&self, id: CategoryId) -> RepoResult<Option<CategoryRecord>> {
        self.repo.get_category(id)
    }

    pub fn create_category(&self, category: &NewCategory) -> CatalogResult<CategoryRecord> {
        let id = self.repo.create_category(category)?;
        self.repo
            .get_category(id)?
            .ok_or(CatalogServiceError::InconsistentState(
                "created category not found in read-back",
            ))
    }

    pub fn update_category(
        &self,
        id: CategoryId,
        category: &NewCategory,
    ) -> CatalogResult<CategoryRecord> {
        self.repo.update_category(id, category)?;
        self.repo
            .get_category(id)?
            .ok_or(CatalogServiceError::InconsistentState(
                "updated category not found in read-back",
            ))
    }

    pub fn delete_category(&self, id: CategoryId) -> CatalogResult<()> {
        Ok(self.repo.delete_category(id)?)
    }

    pub fn list_tags(&self) -> RepoResult<Vec<TagRecord>> {
        self.repo.list_tags()
    }

    pub fn get_tag(&self, id: TagId) -> RepoResult<Option<TagRecord>> {
        self.repo.get_tag(id)
    }

    pub fn create_tag(&self, tag: &NewTag) -> CatalogResult<TagRecord> {
        let id = self.repo.create_tag(tag)?;
        self.repo
            .get_tag(id)?
            .ok_or(CatalogServiceError::InconsistentState(
                "created tag not found in read-back",
            ))
    }

    pub fn update_tag(&self, id: TagId, tag: &NewTag) -> CatalogResult<TagRecord> {
        self.repo.update_tag(id, tag)?;
        self.repo
            .get_tag(id)?
            .ok_or(CatalogServiceError::InconsistentState(
                "updated tag not found in read-back",
            ))
    }

    pub fn delete_tag(&self, id: TagId) -> CatalogResult<()> {
        Ok(self.repo.delete_tag(id)?)
    }

    pub fn list_products(&self) -> RepoResult<Vec<ProductRecord>> {
        self.repo.list_products()
    }

    pub fn get_product(&self, id: ProductId) -> RepoResult<Option<ProductRecord>> {
        self.repo.get_product(id)
    }

    /// Creates a product with its initial tag set.
    pub fn create_product(
        &mut self,
        product: &NewProduct,
        tag_ids: &[TagId],
    ) -> CatalogResult<ProductRecord> {
        let id = self.repo.create_product(product, tag_ids)?;
        self.repo
            .get_product(id)?
            .ok_or(CatalogServiceError::InconsistentState(
                "created product not found in read-back",
            ))
    }

    /// Updates product fields, then reconciles its tags when `tag_ids` is
    /// present.
    ///
    /// The field update commits before the reconcile starts. A failed
    /// reconcile returns its error with the new field values already
    /// stored and the previous tags left in place.
    pub fn update_product(
        &mut self,
        id: ProductId,
        changes: &ProductChanges,
        tag_ids: Option<&[TagId]>,
    ) -> CatalogResult<ProductRecord> {
        self.update_product_until(id, changes, tag_ids, None)
    }

    /// Same as [`Self::update_product`]; the tag reconciliation commits
    /// nothing once `deadline` has passed.
    pub fn update_product_until(
        &mut self,
        id: ProductId,
        changes: &ProductChanges,
        tag_ids: Option<&[TagId]>,
        deadline: Option<Instant>,
    ) -> CatalogResult<ProductRecord> {
        self.repo.update_product(id, changes)?;
        self.repo.reconcile_product_tags(id, tag_ids, deadline)?;
        self.repo
            .get_product(id)?
            .ok_or(CatalogServiceError::InconsistentState(
                "updated product not found in read-back",
            ))
    }

    /// Reconciles only the tag set of an existing product.
    pub fn set_product_tags(
        &mut self,
        id: ProductId,
        tag_ids: Option<&[TagId]>,
    ) -> CatalogResult<ReconcileOutcome<TagId>> {
        self.set_product_tags_until(id, tag_ids, None)
    }

    /// Same as [`Self::set_product_tags`]; commits nothing once `deadline`
    /// has passed.
    pub fn set_product_tags_until(
        &mut self,
        id: ProductId,
        tag_ids: Option<&[TagId]>,
        deadline: Option<Instant>,
    ) -> CatalogResult<ReconcileOutcome<TagId>> {
        if self.repo.get_product(id)?.is_none() {
            return Err(CatalogServiceError::NotFound {
                kind: EntityKind::Product,
                id,
            });
        }
        Ok(self.repo.reconcile_product_tags(id, tag_ids, deadline)?)
    }

    pub fn delete_product(&self, id: ProductId) -> CatalogResult<()> {
        Ok(self.repo.delete_product(id)?)
    }
}
