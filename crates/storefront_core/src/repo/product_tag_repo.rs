//! SQLite association store for the `product_tags` join table.
//!
//! # Responsibility
//! - Serve the relation reconciler: read one product's join rows, delete
//!   rows by id, bulk insert `(product_id, tag_id)` rows.
//! - Classify SQLite failures into the reconcile error taxonomy.
//!
//! # Invariants
//! - Writes, and the read they are planned from, run inside
//!   `BEGIN IMMEDIATE`. At most one writer holds the database at a time;
//!   others wait for the busy timeout, then conflict.
//! - `UNIQUE(product_id, tag_id)` violations surface as `Conflict`, never
//!   as silently ignored rows.
//! - Foreign-key violations (unknown product or tag) surface as
//!   `Persistence`.

use crate::model::product::ProductId;
use crate::model::product_tag::{ProductTag, ProductTagId};
use crate::model::tag::TagId;
use crate::reconcile::{
    Association, AssociationStore, AssociationWriter, ReconcileError, ReconcileResult,
};
use crate::repo::catalog_repo::RepoResult;
use crate::repo::schema::ensure_tables;
use log::warn;
use rusqlite::{ffi, params_from_iter, Connection, ErrorCode, TransactionBehavior};

/// Rows per multi-value statement; keeps bind counts well under SQLite limits.
const WRITE_CHUNK_ROWS: usize = 400;

pub(crate) const PRODUCT_TAGS_SHAPE: (&str, &[&str]) =
    ("product_tags", &["id", "product_id", "tag_id"]);

/// SQLite-backed [`AssociationStore`] over `product_tags`.
pub struct SqliteProductTagStore<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteProductTagStore<'conn> {
    /// Constructs a store from a migrated/ready connection.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        ensure_tables(conn, &[PRODUCT_TAGS_SHAPE])?;
        Ok(Self { conn })
    }

    /// Wraps a connection the caller already verified.
    pub(crate) fn from_ready(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }
}

impl AssociationStore for SqliteProductTagStore<'_> {
    type OwnerId = ProductId;
    type TargetId = TagId;
    type LinkId = ProductTagId;

    fn find_associations(&self, owner_id: ProductId) -> ReconcileResult<Vec<ProductTag>> {
        load_product_tags(self.conn, owner_id).map_err(classify_statement_error)
    }

    fn run_in_transaction<R, F>(&mut self, work: F) -> ReconcileResult<R>
    where
        F: FnOnce(&mut dyn AssociationWriter<ProductId, TagId, ProductTagId>) -> ReconcileResult<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify_transaction_error)?;

        let result = {
            let mut writer = SqliteProductTagWriter { conn: &tx };
            work(&mut writer)
        };

        match result {
            Ok(value) => {
                tx.commit().map_err(classify_transaction_error)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        "event=product_tags_rollback module=repo status=error cause_kind={} error={}",
                        err.kind(),
                        rollback_err
                    );
                    return Err(ReconcileError::Transaction(Box::new(rollback_err)));
                }
                Err(err)
            }
        }
    }
}

struct SqliteProductTagWriter<'a> {
    conn: &'a Connection,
}

impl AssociationWriter<ProductId, TagId, ProductTagId> for SqliteProductTagWriter<'_> {
    fn find_associations(&mut self, owner_id: ProductId) -> ReconcileResult<Vec<ProductTag>> {
        load_product_tags(self.conn, owner_id).map_err(classify_statement_error)
    }

    fn bulk_delete(&mut self, ids: &[ProductTagId]) -> ReconcileResult<usize> {
        delete_product_tags(self.conn, ids).map_err(classify_statement_error)
    }

    fn bulk_insert(&mut self, rows: &[(ProductId, TagId)]) -> ReconcileResult<usize> {
        insert_product_tags(self.conn, rows).map_err(classify_statement_error)
    }
}

/// Reads all join rows of one product ordered by row id.
pub(crate) fn load_product_tags(
    conn: &Connection,
    product_id: ProductId,
) -> rusqlite::Result<Vec<ProductTag>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, product_id, tag_id
         FROM product_tags
         WHERE product_id = ?1
         ORDER BY id ASC;",
    )?;
    let rows = stmt.query_map([product_id], |row| {
        Ok(Association {
            id: row.get("id")?,
            owner_id: row.get("product_id")?,
            target_id: row.get("tag_id")?,
        })
    })?;
    rows.collect()
}

/// Inserts join rows with multi-value statements; returns inserted count.
pub(crate) fn insert_product_tags(
    conn: &Connection,
    rows: &[(ProductId, TagId)],
) -> rusqlite::Result<usize> {
    let mut inserted = 0;
    for chunk in rows.chunks(WRITE_CHUNK_ROWS) {
        let placeholders = vec!["(?, ?)"; chunk.len()].join(", ");
        let sql = format!("INSERT INTO product_tags (product_id, tag_id) VALUES {placeholders};");
        let values = chunk
            .iter()
            .flat_map(|(product_id, tag_id)| [*product_id, *tag_id]);
        inserted += conn.execute(&sql, params_from_iter(values))?;
    }
    Ok(inserted)
}

/// Deletes join rows by id; returns how many rows actually existed.
pub(crate) fn delete_product_tags(
    conn: &Connection,
    ids: &[ProductTagId],
) -> rusqlite::Result<usize> {
    let mut removed = 0;
    for chunk in ids.chunks(WRITE_CHUNK_ROWS) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("DELETE FROM product_tags WHERE id IN ({placeholders});");
        removed += conn.execute(&sql, params_from_iter(chunk.iter()))?;
    }
    Ok(removed)
}

fn classify_statement_error(err: rusqlite::Error) -> ReconcileError {
    let conflict = matches!(
        &err,
        rusqlite::Error::SqliteFailure(failure, _)
            if is_unique_violation(failure) || is_lock_contention(failure)
    );
    if conflict {
        ReconcileError::Conflict(err.to_string())
    } else {
        ReconcileError::Persistence(Box::new(err))
    }
}

fn classify_transaction_error(err: rusqlite::Error) -> ReconcileError {
    let conflict = matches!(
        &err,
        rusqlite::Error::SqliteFailure(failure, _) if is_lock_contention(failure)
    );
    if conflict {
        ReconcileError::Conflict(err.to_string())
    } else {
        ReconcileError::Transaction(Box::new(err))
    }
}

fn is_unique_violation(failure: &ffi::Error) -> bool {
    failure.code == ErrorCode::ConstraintViolation
        && matches!(
            failure.extended_code,
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
}

fn is_lock_contention(failure: &ffi::Error) -> bool {
    matches!(
        failure.code,
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
    )
}
