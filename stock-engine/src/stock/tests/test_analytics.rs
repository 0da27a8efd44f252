use super::*;
use crate::stock::analytics::{Analytics, Urgency};
use tokio::time::Duration;

/// Timestamps must differ for deterministic window ordering.
async fn step() {
    tokio::time::sleep(Duration::from_millis(2)).await;
}

#[tokio::test]
async fn movements_by_type_sums_quantity_and_value() {
    let (engine, _) = create_test_engine().await;
    seed_product(&engine, 1, 100).await;

    engine
        .apply_delta(NewMovement::new(1, -3, MovementType::Sale).with_cost(2.0))
        .await
        .unwrap();
    engine
        .apply_delta(NewMovement::new(1, -2, MovementType::Sale).with_cost(2.0))
        .await
        .unwrap();
    engine
        .apply_delta(NewMovement::new(1, 10, MovementType::Purchase).with_cost(1.5))
        .await
        .unwrap();

    let by_type = engine.movements_by_type(Period::OneWeek).await.unwrap();

    let sales = &by_type[&MovementType::Sale];
    assert_eq!(sales.count, 2);
    assert_eq!(sales.total_quantity, 5);
    assert_eq!(sales.total_value, 10.0);

    let purchases = &by_type[&MovementType::Purchase];
    assert_eq!(purchases.count, 1);
    assert_eq!(purchases.total_quantity, 10);
    assert_eq!(purchases.total_value, 15.0);

    // The uncosted opening balance aggregates with zero value.
    let initial = &by_type[&MovementType::Initial];
    assert_eq!(initial.count, 1);
    assert_eq!(initial.total_quantity, 100);
    assert_eq!(initial.total_value, 0.0);
}

#[tokio::test]
async fn top_movers_rank_by_absolute_quantity_moved() {
    let (engine, _) = create_test_engine().await;
    seed_product(&engine, 1, 50).await;
    seed_product(&engine, 2, 50).await;

    engine
        .apply_delta(NewMovement::new(1, -5, MovementType::Sale))
        .await
        .unwrap();
    engine
        .apply_delta(NewMovement::new(2, -20, MovementType::Sale))
        .await
        .unwrap();
    engine
        .apply_delta(NewMovement::new(2, 10, MovementType::Purchase))
        .await
        .unwrap();

    let movers = engine.top_movers(Period::OneWeek, 10).await.unwrap();
    assert_eq!(movers.len(), 2);

    // Product 2 moved 50 + 20 + 10 = 80, product 1 moved 55.
    assert_eq!(movers[0].product_id, 2);
    assert_eq!(movers[0].total_quantity, 80);
    assert_eq!(movers[0].movement_count, 3);
    assert_eq!(movers[0].current_stock, 40);
    assert_eq!(movers[1].product_id, 1);
    assert_eq!(movers[1].total_quantity, 55);
    assert_eq!(movers[1].current_stock, 45);

    // The limit truncates after ranking.
    let top_one = engine.top_movers(Period::OneWeek, 1).await.unwrap();
    assert_eq!(top_one.len(), 1);
    assert_eq!(top_one[0].product_id, 2);
}

#[tokio::test]
async fn low_stock_report_splits_critical_and_warning() {
    let (engine, _) = create_test_engine().await;
    seed_product(&engine, 1, 3).await;
    seed_product(&engine, 2, 9).await;
    seed_product(&engine, 3, 50).await;

    engine
        .apply_delta(NewMovement::new(2, -1, MovementType::Sale))
        .await
        .unwrap();

    // None uses the configured threshold (10 in tests).
    let reports = engine.low_stock_with_context(None).await.unwrap();
    assert_eq!(reports.len(), 2);

    // Ordered by stock ascending.
    let critical = &reports[0];
    assert_eq!(critical.product_id, 1);
    assert_eq!(critical.urgency, Urgency::Critical);
    assert_eq!(critical.days_since_last_sale, None);
    assert!(critical.recommendation.contains("Restock or delist"));
    assert!(!critical.recent_movements.is_empty());

    let warning = &reports[1];
    assert_eq!(warning.product_id, 2);
    assert_eq!(warning.current_stock, 8);
    assert_eq!(warning.urgency, Urgency::Warning);
    assert_eq!(warning.days_since_last_sale, Some(0));
    assert!(warning.recommendation.contains("Plan a restock"));
    // Newest first.
    assert_eq!(
        warning.recent_movements[0].movement_type,
        MovementType::Sale
    );
}

#[tokio::test]
async fn evolution_reads_the_replica_oldest_first() {
    let (engine, _) = create_test_engine().await;
    seed_product(&engine, 1, 100).await;
    step().await;
    engine
        .apply_delta(NewMovement::new(1, -5, MovementType::Sale).with_reason("checkout"))
        .await
        .unwrap();
    step().await;
    engine
        .apply_delta(NewMovement::new(1, 20, MovementType::Purchase))
        .await
        .unwrap();

    let points = engine
        .evolution_for_product(1, Period::OneWeek)
        .await
        .unwrap();
    assert_eq!(points.len(), 3);
    let stocks: Vec<i64> = points.iter().map(|p| p.stock).collect();
    assert_eq!(stocks, vec![100, 95, 115]);
    assert_eq!(points[1].change, -5);
    assert_eq!(points[1].movement_type, MovementType::Sale);
    assert_eq!(points[1].reason, "checkout");
    // `YYYY-MM-DD HH:MM:SS`
    assert_eq!(points[0].date.len(), 19);
}

#[tokio::test]
async fn empty_replica_falls_back_to_primary() {
    let (engine, _) = create_test_engine().await;
    seed_product(&engine, 1, 100).await;
    step().await;
    engine
        .apply_delta(NewMovement::new(1, -5, MovementType::Sale).with_cost(2.0))
        .await
        .unwrap();

    // Same primary, fresh (unmirrored) replica.
    let empty = SecondaryStore::open_memory().await.unwrap();
    let analytics = Analytics::new(engine.primary().clone(), empty);

    let points = analytics
        .evolution_for_product(1, Period::OneWeek)
        .await
        .unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points.last().unwrap().stock, 95);

    let by_type = analytics.movements_by_type(Period::OneWeek).await.unwrap();
    assert_eq!(by_type[&MovementType::Sale].total_value, 10.0);

    let movers = analytics.top_movers(Period::OneWeek, 5).await.unwrap();
    assert_eq!(movers.len(), 1);
    assert_eq!(movers[0].total_quantity, 105);
    assert_eq!(movers[0].current_stock, 95);
}

#[tokio::test]
async fn unreachable_replica_still_yields_daily_points() {
    let (engine, _) = create_test_engine().await;
    seed_product(&engine, 1, 100).await;

    // Unconnected handle: every replica read errors and the primary serves.
    let analytics = Analytics::new(
        engine.primary().clone(),
        SecondaryStore::new(surrealdb::Surreal::init()),
    );

    let evolution = analytics.global_evolution(Period::OneWeek).await.unwrap();
    assert!(!evolution.degraded);
    assert_eq!(evolution.points.last().unwrap().total_stock, 100);
    assert_eq!(evolution.points.last().unwrap().movement_count, 1);
}

#[tokio::test]
async fn global_evolution_chains_daily_totals_to_the_live_aggregate() {
    let (engine, _) = create_test_engine().await;
    seed_product(&engine, 1, 100).await;
    seed_product(&engine, 2, 50).await;
    step().await;
    engine
        .apply_delta(NewMovement::new(1, -10, MovementType::Sale))
        .await
        .unwrap();

    let evolution = engine.global_evolution(Period::OneWeek).await.unwrap();
    assert!(!evolution.degraded);
    // Seven full days plus today.
    assert_eq!(evolution.points.len(), 8);

    // Today closes at the live aggregate with all three movements counted.
    let today = evolution.points.last().unwrap();
    assert_eq!(today.total_stock, 140);
    assert_eq!(today.movement_count, 3);

    // Before any registration, the aggregate derives back to zero.
    let first = &evolution.points[0];
    assert_eq!(first.total_stock, 0);
    assert_eq!(first.movement_count, 0);
}
