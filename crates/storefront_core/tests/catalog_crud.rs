use rusqlite::Connection;
use storefront_core::db::open_db_in_memory;
use storefront_core::{
    CatalogRepository, CatalogService, CatalogServiceError, EntityKind, NewCategory, NewProduct,
    NewTag, ProductChanges, RepoError, SqliteCatalogRepository, DEFAULT_STOCK,
};

fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[test]
fn category_create_get_update_and_list() {
    let mut conn = open_db_in_memory().unwrap();
    let repo = SqliteCatalogRepository::try_new(&mut conn).unwrap();
    let service = CatalogService::new(repo);

    let shirts = service.create_category(&NewCategory::new("Shirts")).unwrap();
    let shorts = service.create_category(&NewCategory::new("Shorts")).unwrap();
    assert_eq!(shirts.category.category_name, "Shirts");
    assert!(shirts.products.is_empty());

    let renamed = service
        .update_category(shorts.category.id, &NewCategory::new("Board Shorts"))
        .unwrap();
    assert_eq!(renamed.category.category_name, "Board Shorts");

    let listed = service.list_categories().unwrap();
    let names = listed
        .iter()
        .map(|record| record.category.category_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Shirts", "Board Shorts"]);
}

#[test]
fn missing_rows_return_not_found() {
    let mut conn = open_db_in_memory().unwrap();
    let repo = SqliteCatalogRepository::try_new(&mut conn).unwrap();
    let mut service = CatalogService::new(repo);

    let err = service
        .update_category(404, &NewCategory::new("Hats"))
        .unwrap_err();
    assert!(matches!(
        err,
        CatalogServiceError::NotFound {
            kind: EntityKind::Category,
            id: 404
        }
    ));

    let err = service.delete_tag(404).unwrap_err();
    assert!(matches!(
        err,
        CatalogServiceError::NotFound {
            kind: EntityKind::Tag,
            ..
        }
    ));

    let err = service
        .update_product(404, &ProductChanges::default(), Some(&[1]))
        .unwrap_err();
    assert!(matches!(
        err,
        CatalogServiceError::NotFound {
            kind: EntityKind::Product,
            ..
        }
    ));

    assert!(service.get_product(404).unwrap().is_none());
}

#[test]
fn create_product_links_deduplicated_tags_and_resolves_category() {
    let mut conn = open_db_in_memory().unwrap();
    let repo = SqliteCatalogRepository::try_new(&mut conn).unwrap();
    let mut service = CatalogService::new(repo);

    let shirts = service.create_category(&NewCategory::new("Shirts")).unwrap();
    let pop = service.create_tag(&NewTag::new("pop music")).unwrap();
    let blue = service.create_tag(&NewTag::new("blue")).unwrap();

    let mut new_product = NewProduct::new("Plain T-Shirt", 14.99);
    new_product.category_id = Some(shirts.category.id);
    let created = service
        .create_product(&new_product, &[blue.tag.id, pop.tag.id, blue.tag.id])
        .unwrap();

    assert_eq!(created.product.stock, DEFAULT_STOCK);
    assert_eq!(
        created.category.as_ref().map(|c| c.category_name.as_str()),
        Some("Shirts")
    );
    assert_eq!(created.tag_ids(), vec![pop.tag.id, blue.tag.id]);

    let tag_record = service.get_tag(pop.tag.id).unwrap().unwrap();
    assert_eq!(tag_record.products.len(), 1);
    assert_eq!(tag_record.products[0].id, created.product.id);

    let category_record = service.get_category(shirts.category.id).unwrap().unwrap();
    assert_eq!(category_record.products.len(), 1);
}

#[test]
fn create_product_with_unknown_tag_rolls_back_product_row() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let repo = SqliteCatalogRepository::try_new(&mut conn).unwrap();
        let mut service = CatalogService::new(repo);

        let err = service
            .create_product(&NewProduct::new("Ghost", 1.0), &[999])
            .unwrap_err();
        assert!(matches!(err, CatalogServiceError::Repo(RepoError::Db(_))));
    }

    assert_eq!(count_rows(&conn, "products"), 0);
    assert_eq!(count_rows(&conn, "product_tags"), 0);
}

#[test]
fn update_product_fields_without_tag_ids_leaves_tags_untouched() {
    let mut conn = open_db_in_memory().unwrap();
    let repo = SqliteCatalogRepository::try_new(&mut conn).unwrap();
    let mut service = CatalogService::new(repo);

    let tag = service.create_tag(&NewTag::new("gold")).unwrap();
    let created = service
        .create_product(&NewProduct::new("Top Hat", 22.99), &[tag.tag.id])
        .unwrap();

    let changes = ProductChanges {
        price: Some(19.5),
        stock: Some(3),
        ..ProductChanges::default()
    };
    let updated = service
        .update_product(created.product.id, &changes, None)
        .unwrap();

    assert_eq!(updated.product.product_name, "Top Hat");
    assert_eq!(updated.product.price, 19.5);
    assert_eq!(updated.product.stock, 3);
    assert_eq!(updated.tag_ids(), vec![tag.tag.id]);
}

#[test]
fn deleting_category_detaches_products() {
    let mut conn = open_db_in_memory().unwrap();
    let repo = SqliteCatalogRepository::try_new(&mut conn).unwrap();
    let mut service = CatalogService::new(repo);

    let hats = service.create_category(&NewCategory::new("Hats")).unwrap();
    let mut new_product = NewProduct::new("Beanie", 9.0);
    new_product.category_id = Some(hats.category.id);
    let created = service.create_product(&new_product, &[]).unwrap();

    service.delete_category(hats.category.id).unwrap();

    let product = service.get_product(created.product.id).unwrap().unwrap();
    assert_eq!(product.product.category_id, None);
    assert!(product.category.is_none());
}

#[test]
fn deleting_tag_or_product_cascades_join_rows() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let repo = SqliteCatalogRepository::try_new(&mut conn).unwrap();
        let mut service = CatalogService::new(repo);

        let red = service.create_tag(&NewTag::new("red")).unwrap();
        let green = service.create_tag(&NewTag::new("green")).unwrap();
        let first = service
            .create_product(&NewProduct::new("Sneakers", 90.0), &[red.tag.id, green.tag.id])
            .unwrap();
        let second = service
            .create_product(&NewProduct::new("Sandals", 20.0), &[red.tag.id])
            .unwrap();

        service.delete_tag(red.tag.id).unwrap();
        let first = service.get_product(first.product.id).unwrap().unwrap();
        assert_eq!(first.tag_ids(), vec![green.tag.id]);

        service.delete_product(second.product.id).unwrap();
        assert_eq!(service.list_products().unwrap().len(), 1);
    }

    assert_eq!(count_rows(&conn, "product_tags"), 1);
}

#[test]
fn repository_reconcile_skips_when_desired_set_is_absent() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteCatalogRepository::try_new(&mut conn).unwrap();

    let tag_id = repo.create_tag(&NewTag::new("vintage")).unwrap();
    let product_id = repo
        .create_product(&NewProduct::new("Cardigan", 45.0), &[tag_id])
        .unwrap();

    let outcome = repo.reconcile_product_tags(product_id, None, None).unwrap();
    assert_eq!(outcome.write_count(), 0);

    let record = repo.get_product(product_id).unwrap().unwrap();
    assert_eq!(record.tag_ids(), vec![tag_id]);
}

#[test]
fn failed_tag_reconcile_keeps_committed_field_changes() {
    let mut conn = open_db_in_memory().unwrap();
    let repo = SqliteCatalogRepository::try_new(&mut conn).unwrap();
    let mut service = CatalogService::new(repo);

    let tag = service.create_tag(&NewTag::new("denim")).unwrap();
    let created = service
        .create_product(&NewProduct::new("Old Jacket", 80.0), &[tag.tag.id])
        .unwrap();

    let changes = ProductChanges {
        product_name: Some("New Jacket".to_string()),
        ..ProductChanges::default()
    };
    let err = service
        .update_product(created.product.id, &changes, Some(&[404]))
        .unwrap_err();
    assert!(matches!(err, CatalogServiceError::Reconcile(_)));

    let stored = service.get_product(created.product.id).unwrap().unwrap();
    assert_eq!(stored.product.product_name, "New Jacket");
    assert_eq!(stored.tag_ids(), vec![tag.tag.id]);
}
