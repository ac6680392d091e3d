//! Catalog repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD APIs over `categories`, `products` and `tags`.
//! - Resolve read models (product with category + tags, category/tag with
//!   products).
//! - Route product tag-set updates through the relation reconciler.
//!
//! # Invariants
//! - Listings are ordered by `id ASC`.
//! - A product and its initial tags are created in one transaction.
//! - Update/delete of a missing row returns `NotFound` instead of a silent
//!   zero-row success.

use crate::db::DbError;
use crate::model::category::{Category, CategoryId, CategoryRecord, NewCategory};
use crate::model::product::{NewProduct, Product, ProductChanges, ProductId, ProductRecord};
use crate::model::tag::{NewTag, Tag, TagId, TagRecord};
use crate::reconcile::{ReconcileOutcome, ReconcileResult, RelationReconciler};
use crate::repo::product_tag_repo::{insert_product_tags, SqliteProductTagStore, PRODUCT_TAGS_SHAPE};
use crate::repo::schema::ensure_tables;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

const PRODUCT_SELECT_SQL: &str = "SELECT
    p.id,
    p.product_name,
    p.price,
    p.stock,
    p.category_id
FROM products p";

pub type RepoResult<T> = Result<T, RepoError>;

/// Catalog entity kinds, used to label `NotFound` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Category,
    Product,
    Tag,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Category => "category",
            Self::Product => "product",
            Self::Tag => "tag",
        };
        f.write_str(label)
    }
}

/// Generic repository error for catalog persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target row does not exist.
    NotFound { kind: EntityKind, id: i64 },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "catalog repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "catalog repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "catalog repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound { .. } => None,
            Self::UninitializedConnection { .. } => None,
            Self::MissingRequiredTable(_) => None,
            Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for catalog operations.
pub trait CatalogRepository {
    fn create_category(&self, category: &NewCategory) -> RepoResult<CategoryId>;
    fn get_category(&self, id: CategoryId) -> RepoResult<Option<CategoryRecord>>;
    fn list_categories(&self) -> RepoResult<Vec<CategoryRecord>>;
    fn update_category(&self, id: CategoryId, category: &NewCategory) -> RepoResult<()>;
    /// Deletes a category; its products keep existing with no category.
    fn delete_category(&self, id: CategoryId) -> RepoResult<()>;

    fn create_tag(&self, tag: &NewTag) -> RepoResult<TagId>;
    fn get_tag(&self, id: TagId) -> RepoResult<Option<TagRecord>>;
    fn list_tags(&self) -> RepoResult<Vec<TagRecord>>;
    fn update_tag(&self, id: TagId, tag: &NewTag) -> RepoResult<()>;
    /// Deletes a tag together with its join rows.
    fn delete_tag(&self, id: TagId) -> RepoResult<()>;

    /// Creates a product and links `tag_ids` in one transaction.
    fn create_product(&mut self, product: &NewProduct, tag_ids: &[TagId])
        -> RepoResult<ProductId>;
    fn get_product(&self, id: ProductId) -> RepoResult<Option<ProductRecord>>;
    fn list_products(&self) -> RepoResult<Vec<ProductRecord>>;
    fn update_product(&self, id: ProductId, changes: &ProductChanges) -> RepoResult<()>;
    /// Deletes a product together with its join rows.
    fn delete_product(&self, id: ProductId) -> RepoResult<()>;

    /// Reconciles the product's tag set against `desired`.
    ///
    /// `None` leaves tags untouched; `Some(&[])` removes all of them.
    fn reconcile_product_tags(
        &mut self,
        id: ProductId,
        desired: Option<&[TagId]>,
        deadline: Option<Instant>,
    ) -> ReconcileResult<ReconcileOutcome<TagId>>;
}

/// SQLite-backed catalog repository.
pub struct SqliteCatalogRepository<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteCatalogRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        ensure_tables(
            conn,
            &[
                ("categories", &["id", "category_name"]),
                (
                    "products",
                    &["id", "product_name", "price", "stock", "category_id"],
                ),
                ("tags", &["id", "tag_name"]),
                PRODUCT_TAGS_SHAPE,
            ],
        )?;
        Ok(Self { conn })
    }
}

impl CatalogRepository for SqliteCatalogRepository<'_> {
    fn create_category(&self, category: &NewCategory) -> RepoResult<CategoryId> {
        self.conn.execute(
            "INSERT INTO categories (category_name) VALUES (?1);",
            [category.category_name.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_category(&self, id: CategoryId) -> RepoResult<Option<CategoryRecord>> {
        let category = self
            .conn
            .query_row(
                "SELECT id, category_name FROM categories WHERE id = ?1;",
                [id],
                parse_category_row,
            )
            .optional()?;

        match category {
            Some(category) => Ok(Some(category_record(self.conn, category)?)),
            None => Ok(None),
        }
    }

    fn list_categories(&self) -> RepoResult<Vec<CategoryRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, category_name FROM categories ORDER BY id ASC;")?;
        let categories = stmt
            .query_map([], parse_category_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        categories
            .into_iter()
            .map(|category| category_record(self.conn, category))
            .collect()
    }

    fn update_category(&self, id: CategoryId, category: &NewCategory) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE categories SET category_name = ?1 WHERE id = ?2;",
            params![category.category_name.as_str(), id],
        )?;
        require_changed(changed, EntityKind::Category, id)
    }

    fn delete_category(&self, id: CategoryId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM categories WHERE id = ?1;", [id])?;
        require_changed(changed, EntityKind::Category, id)
    }

    fn create_tag(&self, tag: &NewTag) -> RepoResult<TagId> {
        self.conn.execute(
            "INSERT INTO tags (tag_name) VALUES (?1);",
            [tag.tag_name.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_tag(&self, id: TagId) -> RepoResult<Option<TagRecord>> {
        let tag = self
            .conn
            .query_row(
                "SELECT id, tag_name FROM tags WHERE id = ?1;",
                [id],
                parse_tag_row,
            )
            .optional()?;

        match tag {
            Some(tag) => Ok(Some(tag_record(self.conn, tag)?)),
            None => Ok(None),
        }
    }

    fn list_tags(&self) -> RepoResult<Vec<TagRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, tag_name FROM tags ORDER BY id ASC;")?;
        let tags = stmt
            .query_map([], parse_tag_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        tags.into_iter()
            .map(|tag| tag_record(self.conn, tag))
            .collect()
    }

    fn update_tag(&self, id: TagId, tag: &NewTag) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE tags SET tag_name = ?1 WHERE id = ?2;",
            params![tag.tag_name.as_str(), id],
        )?;
        require_changed(changed, EntityKind::Tag, id)
    }

    fn delete_tag(&self, id: TagId) -> RepoResult<()> {
        let changed = self.conn.execute("DELETE FROM tags WHERE id = ?1;", [id])?;
        require_changed(changed, EntityKind::Tag, id)
    }

    fn create_product(
        &mut self,
        product: &NewProduct,
        tag_ids: &[TagId],
    ) -> RepoResult<ProductId> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO products (product_name, price, stock, category_id)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                product.product_name.as_str(),
                product.price,
                product.stock,
                product.category_id,
            ],
        )?;
        let product_id = tx.last_insert_rowid();

        let rows = tag_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|tag_id| (product_id, tag_id))
            .collect::<Vec<_>>();
        insert_product_tags(&tx, &rows)?;

        tx.commit()?;
        Ok(product_id)
    }

    fn get_product(&self, id: ProductId) -> RepoResult<Option<ProductRecord>> {
        let product = self
            .conn
            .query_row(
                &format!("{PRODUCT_SELECT_SQL} WHERE p.id = ?1;"),
                [id],
                parse_product_row,
            )
            .optional()?;

        match product {
            Some(product) => Ok(Some(product_record(self.conn, product)?)),
            None => Ok(None),
        }
    }

    fn list_products(&self) -> RepoResult<Vec<ProductRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PRODUCT_SELECT_SQL} ORDER BY p.id ASC;"))?;
        let products = stmt
            .query_map([], parse_product_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        products
            .into_iter()
            .map(|product| product_record(self.conn, product))
            .collect()
    }

    fn update_product(&self, id: ProductId, changes: &ProductChanges) -> RepoResult<()> {
        if changes.is_empty() {
            let exists: i64 = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM products WHERE id = ?1);",
                [id],
                |row| row.get(0),
            )?;
            return require_changed(exists as usize, EntityKind::Product, id);
        }

        let mut assignments = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();
        if let Some(name) = changes.product_name.as_ref() {
            assignments.push("product_name = ?");
            bind_values.push(Value::Text(name.clone()));
        }
        if let Some(price) = changes.price {
            assignments.push("price = ?");
            bind_values.push(Value::Real(price));
        }
        if let Some(stock) = changes.stock {
            assignments.push("stock = ?");
            bind_values.push(Value::Integer(stock));
        }
        if let Some(category_id) = changes.category_id {
            assignments.push("category_id = ?");
            bind_values.push(Value::Integer(category_id));
        }
        bind_values.push(Value::Integer(id));

        let sql = format!(
            "UPDATE products SET {} WHERE id = ?;",
            assignments.join(", ")
        );
        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        require_changed(changed, EntityKind::Product, id)
    }

    fn delete_product(&self, id: ProductId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM products WHERE id = ?1;", [id])?;
        require_changed(changed, EntityKind::Product, id)
    }

    fn reconcile_product_tags(
        &mut self,
        id: ProductId,
        desired: Option<&[TagId]>,
        deadline: Option<Instant>,
    ) -> ReconcileResult<ReconcileOutcome<TagId>> {
        let mut reconciler = RelationReconciler::new(SqliteProductTagStore::from_ready(self.conn));
        match deadline {
            Some(deadline) => reconciler.reconcile_with_deadline(id, desired, deadline),
            None => reconciler.reconcile(id, desired),
        }
    }
}

fn require_changed(changed: usize, kind: EntityKind, id: i64) -> RepoResult<()> {
    if changed == 0 {
        return Err(RepoError::NotFound { kind, id });
    }
    Ok(())
}

fn category_record(conn: &Connection, category: Category) -> RepoResult<CategoryRecord> {
    let mut stmt = conn.prepare_cached(&format!(
        "{PRODUCT_SELECT_SQL} WHERE p.category_id = ?1 ORDER BY p.id ASC;"
    ))?;
    let products = stmt
        .query_map([category.id], parse_product_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(CategoryRecord { category, products })
}

fn tag_record(conn: &Connection, tag: Tag) -> RepoResult<TagRecord> {
    let mut stmt = conn.prepare_cached(&format!(
        "{PRODUCT_SELECT_SQL}
         INNER JOIN product_tags pt ON pt.product_id = p.id
         WHERE pt.tag_id = ?1
         ORDER BY p.id ASC;"
    ))?;
    let products = stmt
        .query_map([tag.id], parse_product_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(TagRecord { tag, products })
}

fn product_record(conn: &Connection, product: Product) -> RepoResult<ProductRecord> {
    let category = match product.category_id {
        Some(category_id) => conn
            .query_row(
                "SELECT id, category_name FROM categories WHERE id = ?1;",
                [category_id],
                parse_category_row,
            )
            .optional()?,
        None => None,
    };

    let mut stmt = conn.prepare_cached(
        "SELECT t.id, t.tag_name
         FROM product_tags pt
         INNER JOIN tags t ON t.id = pt.tag_id
         WHERE pt.product_id = ?1
         ORDER BY t.id ASC;",
    )?;
    let tags = stmt
        .query_map([product.id], parse_tag_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(ProductRecord {
        product,
        category,
        tags,
    })
}

fn parse_category_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get("id")?,
        category_name: row.get("category_name")?,
    })
}

fn parse_tag_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get("id")?,
        tag_name: row.get("tag_name")?,
    })
}

fn parse_product_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get("id")?,
        product_name: row.get("product_name")?,
        price: row.get("price")?,
        stock: row.get("stock")?,
        category_id: row.get("category_id")?,
    })
}
