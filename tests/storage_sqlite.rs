//! SQLite storage integration tests.
//!
//! Run with: cargo test --test storage_sqlite --features sqlite
//!
//! Uses in-memory databases, no external dependencies required.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use chaika_reports::config::{Config, StorageType};
use chaika_reports::storage::{
    init_storage, Batch, ItemKey, OperationRow, Session, SqliteSession, Statement, StorageError,
    TripPartition,
};
use chaika_reports::{
    Cart, CartId, CarriageReport, Item, OperationType, RepositoryError, SalesRepository, TripId,
};

fn trip_id() -> TripId {
    TripId::new("R-100", Utc.with_ymd_and_hms(2023, 1, 15, 10, 0, 0).unwrap())
}

fn op_time(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 15, 12, 30, 0).unwrap() + Duration::minutes(minutes)
}

fn cart(employee: &str, minutes: i64, products: &[i32]) -> Cart {
    Cart {
        cart_id: CartId::new(employee, op_time(minutes)),
        operation_type: OperationType::SALE,
        items: products
            .iter()
            .map(|&product_id| Item {
                product_id,
                quantity: 2,
                price: 150,
            })
            .collect(),
    }
}

fn report(carriage_id: i8, carts: Vec<Cart>) -> CarriageReport {
    CarriageReport {
        trip_id: trip_id(),
        end_time: Utc.with_ymd_and_hms(2023, 1, 15, 18, 0, 0).unwrap(),
        carriage_id,
        carts,
    }
}

async fn connect() -> (Arc<SqliteSession>, SalesRepository) {
    let session = Arc::new(
        SqliteSession::connect(":memory:")
            .await
            .expect("Failed to open in-memory SQLite"),
    );
    let repo = SalesRepository::new(session.clone());
    (session, repo)
}

fn partition() -> TripPartition {
    let trip = trip_id();
    TripPartition {
        route_id: trip.route_id.clone(),
        year: trip.year(),
        start_time: trip.start_time,
    }
}

async fn count_operations(session: &SqliteSession) -> usize {
    let mut cursor = session
        .query(Statement::SelectTripOperations(partition()))
        .await
        .unwrap();
    let mut rows = 0;
    while cursor.next_row().await.is_some() {
        rows += 1;
    }
    cursor.close().await.unwrap();
    rows
}

#[tokio::test]
async fn test_sqlite_roundtrip_through_repository() {
    let (_, repo) = connect().await;
    let cancel = CancellationToken::new();

    repo.insert_data(
        &report(3, vec![cart("67890", 0, &[1, 2]), cart("67890", 1, &[3])]),
        &cancel,
    )
    .await
    .unwrap();
    repo.insert_data(&report(4, vec![cart("11111", 0, &[1])]), &cancel)
        .await
        .unwrap();

    let trip = repo.get_trip(&trip_id(), &cancel).await.unwrap();
    assert_eq!(trip.carriages.len(), 2);

    let carts = repo
        .get_employee_carts_in_trip(&trip_id(), "67890", &cancel)
        .await
        .unwrap();
    assert_eq!(carts.len(), 2);
    let first = carts.iter().find(|c| c.cart_id.operation_time == op_time(0)).unwrap();
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].price, 150);

    let ids = repo.get_employee_ids_by_trip(&trip_id(), &cancel).await.unwrap();
    assert_eq!(ids, vec!["11111".to_string(), "67890".to_string()]);

    let trips = repo
        .get_employee_trips("67890", "2023", &cancel)
        .await
        .unwrap();
    assert_eq!(trips.len(), 1);
    assert_eq!(trips[0].trip_id, trip_id());

    assert_eq!(repo.get_route_ids(&cancel).await.unwrap(), vec!["R-100"]);
}

#[tokio::test]
async fn test_sqlite_timestamps_keep_microseconds() {
    let (_, repo) = connect().await;
    let cancel = CancellationToken::new();

    let mut c = cart("e", 0, &[1]);
    c.cart_id.operation_time += Duration::microseconds(654_321);
    repo.insert_data(&report(1, vec![c.clone()]), &cancel)
        .await
        .unwrap();

    let carts = repo
        .get_employee_carts_in_trip(&trip_id(), "e", &cancel)
        .await
        .unwrap();
    assert_eq!(carts[0].cart_id, c.cart_id);
}

#[tokio::test]
async fn test_sqlite_paging_newest_first() {
    let (_, repo) = connect().await;
    let cancel = CancellationToken::new();
    let carts = (0..5).map(|m| cart("e", m, &[1, 2])).collect();
    repo.insert_data(&report(1, carts), &cancel).await.unwrap();

    let mut seen = Vec::new();
    let mut cursor = String::new();
    loop {
        let (page, next) = repo
            .get_employee_carts_paged(&trip_id(), "e", 2, &cursor, &cancel)
            .await
            .unwrap();
        assert!(page.len() <= 2);
        seen.extend(page.into_iter().map(|c| c.cart_id.operation_time));
        if next.is_empty() {
            break;
        }
        cursor = next;
    }
    assert_eq!(seen, (0..5).rev().map(op_time).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_sqlite_batch_with_conditional_statement_writes_nothing() {
    let (session, _) = connect().await;
    let key = ItemKey {
        partition: partition(),
        employee_id: "e".to_string(),
        operation_time: op_time(0),
        product_id: 1,
    };
    let mut batch = Batch::new();
    batch.add(Statement::InsertOperation(OperationRow {
        key: key.clone(),
        end_time: op_time(60),
        carriage_id: 1,
        operation_type: 1,
        quantity: 1,
        price: 10,
    }));
    batch.add(Statement::DeleteItem(key));

    let err = session.execute_batch(batch).await.unwrap_err();
    assert!(matches!(err, StorageError::UnsupportedStatement { .. }));
    assert_eq!(count_operations(&session).await, 0);
}

#[tokio::test]
async fn test_sqlite_conditional_writes() {
    let (session, repo) = connect().await;
    let cancel = CancellationToken::new();
    repo.insert_data(&report(1, vec![cart("e", 0, &[1, 2])]), &cancel)
        .await
        .unwrap();
    let cart_id = CartId::new("e", op_time(0));

    repo.update_item_quantity(&trip_id(), &cart_id, 1, 9, &cancel)
        .await
        .unwrap();
    let err = repo
        .update_item_quantity(&trip_id(), &cart_id, 77, 9, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::ItemNotFound));
    assert_eq!(count_operations(&session).await, 2);

    repo.delete_item_from_cart(&trip_id(), &cart_id, 2, &cancel)
        .await
        .unwrap();
    assert_eq!(count_operations(&session).await, 1);

    let carts = repo
        .get_employee_carts_in_trip(&trip_id(), "e", &cancel)
        .await
        .unwrap();
    assert_eq!(carts[0].items[0].quantity, 9);

    assert_eq!(repo.get_unsynced_trips(&cancel).await.unwrap().len(), 1);
    repo.delete_synced_trip(&trip_id(), &cancel).await.unwrap();
    assert!(matches!(
        repo.delete_synced_trip(&trip_id(), &cancel).await,
        Err(RepositoryError::TripNotFound)
    ));
}

#[tokio::test]
async fn test_init_storage_opens_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("chaika.db");

    let mut config = Config::for_test();
    config.storage.storage_type = StorageType::Sqlite;
    config.storage.sqlite.path = path.to_string_lossy().into_owned();

    let session = init_storage(&config.storage).await.unwrap();
    let repo = SalesRepository::new(session);
    repo.insert_data(&report(1, vec![cart("e", 0, &[1])]), &CancellationToken::new())
        .await
        .unwrap();

    assert!(path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sqlite_cancelled_insert_is_all_or_nothing() {
    let (session, repo) = connect().await;
    let products: Vec<i32> = (1..=50).collect();
    let carts: Vec<Cart> = (0..400).map(|m| cart("e", m, &products)).collect();
    let total = carts.len() * products.len();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let outcome = repo.insert_data(&report(1, carts), &cancel).await;

    let stored = count_operations(&session).await;
    assert!(stored == 0 || stored == total, "partial batch: {stored} of {total}");
    if outcome.is_ok() {
        assert_eq!(stored, total);
    }

    // The connection came back without a dangling transaction
    let fresh = CancellationToken::new();
    repo.insert_data(&report(2, vec![cart("f", 0, &[1])]), &fresh)
        .await
        .unwrap();
    assert_eq!(count_operations(&session).await, stored + 1);
}

#[tokio::test]
async fn test_sqlite_abandoned_cursor_releases_connection() {
    let (session, repo) = connect().await;
    let cancel = CancellationToken::new();
    let carts = (0..300).map(|m| cart("e", m, &[1, 2])).collect();
    repo.insert_data(&report(1, carts), &cancel).await.unwrap();

    let mut cursor = session
        .query(Statement::SelectTripOperations(partition()))
        .await
        .unwrap();
    for _ in 0..3 {
        assert!(cursor.next_row().await.is_some());
    }
    cursor.close().await.unwrap();
    assert_eq!(count_operations(&session).await, 600);

    let mut dropped = session
        .query(Statement::SelectTripOperations(partition()))
        .await
        .unwrap();
    assert!(dropped.next_row().await.is_some());
    drop(dropped);
    assert_eq!(count_operations(&session).await, 600);

    let (page, next) = repo
        .get_employee_carts_paged(&trip_id(), "e", 1, "", &cancel)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert!(!next.is_empty());
    repo.update_item_quantity(&trip_id(), &page[0].cart_id, 1, 5, &cancel)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sqlite_trip_employees_are_distinct() {
    let (session, repo) = connect().await;
    let cancel = CancellationToken::new();
    let mut carts = Vec::new();
    for employee in ["b", "a", "c"] {
        for m in 0..4 {
            carts.push(cart(employee, m, &[1, 2, 3]));
        }
    }
    repo.insert_data(&report(1, carts), &cancel).await.unwrap();

    let mut cursor = session
        .query(Statement::SelectTripEmployees(partition()))
        .await
        .unwrap();
    let mut ids = Vec::new();
    while let Some(row) = cursor.next_row().await {
        ids.push(row.get::<String>(0).unwrap());
    }
    cursor.close().await.unwrap();
    assert_eq!(ids, vec!["a", "b", "c"]);

    assert_eq!(
        repo.get_employee_ids_by_trip(&trip_id(), &cancel).await.unwrap(),
        vec!["a", "b", "c"]
    );
}
