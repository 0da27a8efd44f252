use super::*;
use crate::db::models::ProductProjection;
use crate::error::StockError;

async fn raw_stores() -> (PrimaryStore, SecondaryStore, Reconciler) {
    init_logging();
    let primary = PrimaryStore::open_in_memory().await.unwrap();
    let secondary = SecondaryStore::open_memory().await.unwrap();
    let reconciler = Reconciler::new(primary.clone(), secondary.clone());
    (primary, secondary, reconciler)
}

fn product(id: i64, stock: i64) -> Product {
    Product {
        id,
        name: format!("Product {id}"),
        category: "general".into(),
        price: 9.99,
        stock,
        updated_at: now_millis(),
    }
}

#[tokio::test]
async fn drift_is_corrected_from_primary() {
    let (primary, secondary, reconciler) = raw_stores().await;
    let p = product(1, 50);
    primary.insert_product(&p).await.unwrap();

    // Projection went stale at 47.
    let mut projection = ProductProjection::from(&p);
    projection.stock = 47;
    secondary.upsert_product(&projection).await.unwrap();

    let report = reconciler.verify(1).await.unwrap();
    assert!(!report.consistent);
    // Pre-correction values, for observability.
    assert_eq!(report.primary_stock, 50);
    assert_eq!(report.secondary_stock, Some(47));

    // Secondary healed from primary; primary untouched.
    assert_eq!(secondary.get_stock(1).await.unwrap(), Some(50));
    assert_eq!(primary.get_product(1).await.unwrap().unwrap().stock, 50);

    let again = reconciler.verify(1).await.unwrap();
    assert!(again.consistent);
}

#[tokio::test]
async fn missing_projection_is_created() {
    let (primary, secondary, reconciler) = raw_stores().await;
    primary.insert_product(&product(2, 30)).await.unwrap();

    let report = reconciler.verify(2).await.unwrap();
    assert!(!report.consistent);
    assert_eq!(report.secondary_stock, None);

    let projection = secondary.get_projection(2).await.unwrap().unwrap();
    assert_eq!(projection.stock, 30);
    assert_eq!(projection.name, "Product 2");
    assert_eq!(projection.category, "general");
}

#[tokio::test]
async fn verify_unknown_product_fails() {
    let (_, _, reconciler) = raw_stores().await;
    let err = reconciler.verify(404).await.unwrap_err();
    assert!(matches!(err, StockError::ProductNotFound { product_id: 404 }));
}

#[tokio::test]
async fn mirrored_product_verifies_clean() {
    // Going through the engine mirrors the projection on every mutation.
    let (engine, _) = create_test_engine().await;
    seed_product(&engine, 1, 25).await;
    engine
        .apply_delta(NewMovement::new(1, -5, MovementType::Sale))
        .await
        .unwrap();

    let report = engine.verify(1).await.unwrap();
    assert!(report.consistent);
    assert_eq!(report.primary_stock, 20);
    assert_eq!(report.secondary_stock, Some(20));
}

#[tokio::test]
async fn verify_all_counts_and_heals_every_product() {
    let (primary, secondary, reconciler) = raw_stores().await;

    // One consistent, one drifted, one never mirrored.
    let consistent = product(1, 10);
    primary.insert_product(&consistent).await.unwrap();
    secondary
        .upsert_product(&ProductProjection::from(&consistent))
        .await
        .unwrap();

    let drifted = product(2, 20);
    primary.insert_product(&drifted).await.unwrap();
    let mut stale = ProductProjection::from(&drifted);
    stale.stock = 19;
    secondary.upsert_product(&stale).await.unwrap();

    primary.insert_product(&product(3, 30)).await.unwrap();

    let summary = reconciler.verify_all().await.unwrap();
    assert_eq!(summary.checked, 3);
    assert_eq!(summary.drifted, 2);
    assert_eq!(summary.failed, 0);

    // Everything healed; a second sweep finds no drift.
    let summary = reconciler.verify_all().await.unwrap();
    assert_eq!(summary.checked, 3);
    assert_eq!(summary.drifted, 0);
    for id in [1, 2, 3] {
        assert_eq!(secondary.get_stock(id).await.unwrap(), Some(id * 10));
    }
}
