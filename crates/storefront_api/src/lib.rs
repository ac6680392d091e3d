//! Request-handler API over the catalog use-cases.
//!
//! # Responsibility
//! - Accept JSON request bodies, run one catalog use-case per call and
//!   relay the outcome in a uniform [`ApiResponse`] envelope.
//! - Supply the desired tag set to the reconciler: `tagIds` absent keeps
//!   the product's tags, `tagIds: []` removes all of them.
//!
//! # Invariants
//! - Handlers never panic; every failure becomes `ok=false` with a stable
//!   `error_kind`.
//! - Each call opens its own connection; no state is shared between calls.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use storefront_core::db::open_db;
use storefront_core::{
    core_version as core_version_inner, default_log_level, init_logging as init_logging_inner,
    ping as ping_inner,
    CatalogResult, CatalogService, CatalogServiceError, CategoryId, EntityKind, NewCategory,
    NewProduct, NewTag, ProductChanges, ProductId, ReconcileOutcome, RepoError,
    SqliteCatalogRepository, TagId,
};

const DB_PATH_ENV: &str = "STOREFRONT_DB_PATH";
const DB_FILE_NAME: &str = "storefront.sqlite3";
static DEFAULT_DB_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Minimal health-check API.
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Core crate version.
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes core logging once per process.
///
/// A blank `level` picks the build default (`debug` or `info`). Returns an
/// empty string on success and the error message otherwise.
pub fn init_logging(level: String, log_dir: String) -> String {
    let level = match level.trim() {
        "" => default_log_level(),
        explicit => explicit,
    };
    match init_logging_inner(level, log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// Response envelope shared by every handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    /// Whether the use-case succeeded.
    pub ok: bool,
    /// Stable failure label: `not_found`, `bad_request`, `conflict`,
    /// `persistence`, `transaction`, `cancelled` or `internal`.
    pub error_kind: Option<String>,
    /// Human-readable message for diagnostics.
    pub message: String,
    /// JSON payload on success.
    pub body: Option<Value>,
}

impl ApiResponse {
    fn success(message: impl Into<String>, body: Value) -> Self {
        Self {
            ok: true,
            error_kind: None,
            message: message.into(),
            body: Some(body),
        }
    }

    fn failure(error_kind: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_kind: Some(error_kind.to_string()),
            message: message.into(),
            body: None,
        }
    }
}

/// Body of `create_product`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductBody {
    #[serde(flatten)]
    pub product: NewProduct,
    #[serde(rename = "tagIds", default)]
    pub tag_ids: Vec<TagId>,
}

/// Body of `update_product`. Omitted fields keep their stored value.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProductBody {
    #[serde(flatten)]
    pub changes: ProductChanges,
    #[serde(rename = "tagIds", default)]
    pub tag_ids: Option<Vec<TagId>>,
}

/// Body of `set_product_tags`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductTagsBody {
    #[serde(rename = "tagIds", default)]
    pub tag_ids: Option<Vec<TagId>>,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Database(String),
    Service(CatalogServiceError),
    Encode(serde_json::Error),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Database(_) => "persistence",
            Self::Service(CatalogServiceError::NotFound { .. }) => "not_found",
            Self::Service(CatalogServiceError::Repo(RepoError::NotFound { .. })) => "not_found",
            Self::Service(CatalogServiceError::Repo(_)) => "persistence",
            Self::Service(CatalogServiceError::Reconcile(err)) => err.kind(),
            Self::Service(CatalogServiceError::InconsistentState(_)) | Self::Encode(_) => {
                "internal"
            }
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(details) => write!(f, "invalid request: {details}"),
            Self::Database(details) => write!(f, "{details}"),
            Self::Service(err) => write!(f, "{err}"),
            Self::Encode(err) => write!(f, "response encoding failed: {err}"),
        }
    }
}

impl From<CatalogServiceError> for ApiError {
    fn from(value: CatalogServiceError) -> Self {
        Self::Service(value)
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Catalog request handler bound to one database file.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    db_path: PathBuf,
    reconcile_timeout: Option<Duration>,
}

impl RequestHandler {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            reconcile_timeout: None,
        }
    }

    /// Handler for `STOREFRONT_DB_PATH`, or `<tmp>/storefront.sqlite3` when
    /// the variable is unset or blank.
    pub fn from_env() -> Self {
        Self::new(resolve_db_path())
    }

    /// Cancels product tag updates that have not committed within `timeout`.
    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = Some(timeout);
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn list_categories(&self) -> ApiResponse {
        let result = self.with_service(|service| Ok(service.list_categories()?));
        respond("list_categories", "Categories listed.", result)
    }

    pub fn get_category(&self, id: CategoryId) -> ApiResponse {
        let result = self.with_service(|service| {
            service.get_category(id)?.ok_or_else(|| not_found_category(id))
        });
        respond("get_category", "Category loaded.", result)
    }

    pub fn create_category(&self, body: &str) -> ApiResponse {
        let result = parse_category(body)
            .and_then(|input| self.with_service(|service| service.create_category(&input)));
        respond("create_category", "Category created.", result)
    }

    pub fn update_category(&self, id: CategoryId, body: &str) -> ApiResponse {
        let result = parse_category(body)
            .and_then(|input| self.with_service(|service| service.update_category(id, &input)));
        respond("update_category", "Category updated.", result)
    }

    pub fn delete_category(&self, id: CategoryId) -> ApiResponse {
        let result = self
            .with_service(|service| service.delete_category(id))
            .map(|()| json!({ "id": id }));
        respond("delete_category", "Category deleted.", result)
    }

    pub fn list_tags(&self) -> ApiResponse {
        let result = self.with_service(|service| Ok(service.list_tags()?));
        respond("list_tags", "Tags listed.", result)
    }

    pub fn get_tag(&self, id: TagId) -> ApiResponse {
        let result = self
            .with_service(|service| service.get_tag(id)?.ok_or_else(|| not_found_tag(id)));
        respond("get_tag", "Tag loaded.", result)
    }

    pub fn create_tag(&self, body: &str) -> ApiResponse {
        let result = parse_tag(body)
            .and_then(|input| self.with_service(|service| service.create_tag(&input)));
        respond("create_tag", "Tag created.", result)
    }

    pub fn update_tag(&self, id: TagId, body: &str) -> ApiResponse {
        let result = parse_tag(body)
            .and_then(|input| self.with_service(|service| service.update_tag(id, &input)));
        respond("update_tag", "Tag updated.", result)
    }

    pub fn delete_tag(&self, id: TagId) -> ApiResponse {
        let result = self
            .with_service(|service| service.delete_tag(id))
            .map(|()| json!({ "id": id }));
        respond("delete_tag", "Tag deleted.", result)
    }

    pub fn list_products(&self) -> ApiResponse {
        let result = self.with_service(|service| Ok(service.list_products()?));
        respond("list_products", "Products listed.", result)
    }

    pub fn get_product(&self, id: ProductId) -> ApiResponse {
        let result = self.with_service(|service| {
            service.get_product(id)?.ok_or_else(|| not_found_product(id))
        });
        respond("get_product", "Product loaded.", result)
    }

    pub fn create_product(&self, body: &str) -> ApiResponse {
        let result = parse_body::<CreateProductBody>(body)
            .and_then(|input| {
                validate_name("product_name", &input.product.product_name)?;
                validate_price(input.product.price)?;
                validate_stock(input.product.stock)?;
                Ok(input)
            })
            .and_then(|input| {
                self.with_service(|service| service.create_product(&input.product, &input.tag_ids))
            });
        respond("create_product", "Product created.", result)
    }

    /// Updates product fields, then reconciles tags when `tagIds` is present.
    pub fn update_product(&self, id: ProductId, body: &str) -> ApiResponse {
        let deadline = self.deadline();
        let result = parse_body::<UpdateProductBody>(body)
            .and_then(|input| {
                validate_changes(&input.changes)?;
                Ok(input)
            })
            .and_then(|input| {
                self.with_service(|service| {
                    service.update_product_until(
                        id,
                        &input.changes,
                        input.tag_ids.as_deref(),
                        deadline,
                    )
                })
            });
        respond("update_product", "Product updated.", result)
    }

    /// Reconciles only the tag set and reports what changed.
    pub fn set_product_tags(&self, id: ProductId, body: &str) -> ApiResponse {
        let deadline = self.deadline();
        let result = parse_body::<ProductTagsBody>(body)
            .and_then(|input| {
                self.with_service(|service| {
                    service.set_product_tags_until(id, input.tag_ids.as_deref(), deadline)
                })
            })
            .map(outcome_body);
        respond("set_product_tags", "Product tags reconciled.", result)
    }

    pub fn delete_product(&self, id: ProductId) -> ApiResponse {
        let result = self
            .with_service(|service| service.delete_product(id))
            .map(|()| json!({ "id": id }));
        respond("delete_product", "Product deleted.", result)
    }

    /// A timeout too large to represent as an instant means no deadline.
    fn deadline(&self) -> Option<Instant> {
        self.reconcile_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout))
    }

    fn with_service<T>(
        &self,
        f: impl FnOnce(&mut CatalogService<SqliteCatalogRepository<'_>>) -> CatalogResult<T>,
    ) -> ApiResult<T> {
        let mut conn = open_db(&self.db_path)
            .map_err(|err| ApiError::Database(format!("catalog DB open failed: {err}")))?;
        let repo = SqliteCatalogRepository::try_new(&mut conn)
            .map_err(|err| ApiError::Database(format!("catalog repo init failed: {err}")))?;
        let mut service = CatalogService::new(repo);
        Ok(f(&mut service)?)
    }
}

fn respond<T: Serialize>(op: &'static str, message: &str, result: ApiResult<T>) -> ApiResponse {
    let encoded = result.and_then(|value| serde_json::to_value(value).map_err(ApiError::Encode));
    match encoded {
        Ok(body) => {
            debug!("event=api_request module=api status=ok op={op}");
            ApiResponse::success(message, body)
        }
        Err(err) => {
            warn!(
                "event=api_request module=api status=error op={} error_kind={}",
                op,
                err.kind()
            );
            ApiResponse::failure(err.kind(), format!("{op} failed: {err}"))
        }
    }
}

fn outcome_body(outcome: ReconcileOutcome<TagId>) -> Value {
    match outcome {
        ReconcileOutcome::Skipped => json!({ "status": "skipped" }),
        ReconcileOutcome::Unchanged => json!({ "status": "unchanged" }),
        ReconcileOutcome::Applied { added, removed } => json!({
            "status": "applied",
            "added": added,
            "removed": removed,
        }),
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> ApiResult<T> {
    serde_json::from_str(body).map_err(|err| ApiError::BadRequest(err.to_string()))
}

fn parse_category(body: &str) -> ApiResult<NewCategory> {
    let input = parse_body::<NewCategory>(body)?;
    validate_name("category_name", &input.category_name)?;
    Ok(NewCategory::new(input.category_name.trim()))
}

fn parse_tag(body: &str) -> ApiResult<NewTag> {
    let input = parse_body::<NewTag>(body)?;
    validate_name("tag_name", &input.tag_name)?;
    Ok(NewTag::new(input.tag_name.trim()))
}

fn validate_name(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn validate_price(price: f64) -> ApiResult<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(ApiError::BadRequest(
            "price must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}

fn validate_stock(stock: i64) -> ApiResult<()> {
    if stock < 0 {
        return Err(ApiError::BadRequest("stock cannot be negative".to_string()));
    }
    Ok(())
}

fn validate_changes(changes: &ProductChanges) -> ApiResult<()> {
    if let Some(name) = &changes.product_name {
        validate_name("product_name", name)?;
    }
    if let Some(price) = changes.price {
        validate_price(price)?;
    }
    if let Some(stock) = changes.stock {
        validate_stock(stock)?;
    }
    Ok(())
}

fn not_found_category(id: CategoryId) -> CatalogServiceError {
    CatalogServiceError::NotFound {
        kind: EntityKind::Category,
        id,
    }
}

fn not_found_tag(id: TagId) -> CatalogServiceError {
    CatalogServiceError::NotFound {
        kind: EntityKind::Tag,
        id,
    }
}

fn not_found_product(id: ProductId) -> CatalogServiceError {
    CatalogServiceError::NotFound {
        kind: EntityKind::Product,
        id,
    }
}

fn resolve_db_path() -> PathBuf {
    DEFAULT_DB_PATH
        .get_or_init(|| {
            if let Ok(raw) = std::env::var(DB_PATH_ENV) {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return PathBuf::from(trimmed);
                }
            }
            std::env::temp_dir().join(DB_FILE_NAME)
        })
        .clone()
}
