//! Keyset pagination over the in-memory store.
//!
//! Walking every page must yield each cart exactly once, newest first, no
//! matter the page size, how many items each cart holds, or which other
//! employees share the trip.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use chaika_reports::storage::MockSession;
use chaika_reports::{Cart, CartId, CarriageReport, Item, OperationType, SalesRepository, TripId};

fn trip_id() -> TripId {
    TripId::new("R-200", Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap())
}

fn op_time(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + Duration::seconds(seconds)
}

/// Carts with a varying number of items so page boundaries fall between
/// runs of different lengths. Cart `n` sits at `n * 7 + offset` seconds.
fn carts_for(employee: &str, count: i64, offset: i64) -> Vec<Cart> {
    (0..count)
        .map(|n| Cart {
            cart_id: CartId::new(employee, op_time(n * 7 + offset)),
            operation_type: if n % 3 == 0 {
                OperationType::REFUND
            } else {
                OperationType::SALE
            },
            items: (0..(n % 4 + 1) as i32)
                .map(|p| Item {
                    product_id: 100 + p,
                    quantity: 1,
                    price: 99,
                })
                .collect(),
        })
        .collect()
}

/// Seeds `employee` with `carts` carts, flanked by neighbours "d" and "f"
/// in the same trip. "d" shares the same operation times, "f" falls
/// between them.
async fn seeded(employee: &str, carts: i64) -> SalesRepository {
    let repo = SalesRepository::new(Arc::new(MockSession::new()));
    let mut all = carts_for(employee, carts, 0);
    all.extend(carts_for("d", carts + 5, 0));
    all.extend(carts_for("f", carts / 2 + 1, 3));
    let report = CarriageReport {
        trip_id: trip_id(),
        end_time: op_time(100_000),
        carriage_id: 2,
        carts: all,
    };
    repo.insert_data(&report, &CancellationToken::new())
        .await
        .unwrap();
    repo
}

async fn walk(repo: &SalesRepository, employee: &str, limit: i64) -> (Vec<Cart>, usize) {
    let cancel = CancellationToken::new();
    let mut carts = Vec::new();
    let mut cursor = String::new();
    let mut pages = 0;
    loop {
        let (page, next) = repo
            .get_employee_carts_paged(&trip_id(), employee, limit, &cursor, &cancel)
            .await
            .unwrap();
        pages += 1;
        if limit > 0 {
            assert!(page.len() as i64 <= limit);
        }
        carts.extend(page);
        if next.is_empty() {
            break;
        }
        cursor = next;
    }
    (carts, pages)
}

#[tokio::test]
async fn test_every_cart_exactly_once_for_any_page_size() {
    let total = 23;
    let repo = seeded("e", total).await;
    let expected: Vec<DateTime<Utc>> = (0..total).rev().map(|n| op_time(n * 7)).collect();

    for limit in [1, 2, 3, 5, 7, 22, 23, 24, 100] {
        let (carts, pages) = walk(&repo, "e", limit).await;
        let times: Vec<DateTime<Utc>> = carts.iter().map(|c| c.cart_id.operation_time).collect();
        assert_eq!(times, expected, "limit {limit}");
        assert_eq!(pages as i64, (total + limit - 1) / limit, "limit {limit}");
    }
}

#[tokio::test]
async fn test_pages_keep_whole_carts() {
    let repo = seeded("e", 12).await;
    let (carts, _) = walk(&repo, "e", 5).await;

    for cart in &carts {
        let n = (cart.cart_id.operation_time - op_time(0)).num_seconds() / 7;
        assert_eq!(cart.items.len() as i64, n % 4 + 1);
        let expected = if n % 3 == 0 {
            OperationType::REFUND
        } else {
            OperationType::SALE
        };
        assert_eq!(cart.operation_type, expected);
    }
}

#[tokio::test]
async fn test_unbounded_limit_is_single_page() {
    let repo = seeded("e", 40).await;
    let (carts, pages) = walk(&repo, "e", 0).await;
    assert_eq!(carts.len(), 40);
    assert_eq!(pages, 1);
}

#[tokio::test]
async fn test_paged_matches_unpaged() {
    let repo = seeded("e", 17).await;
    let cancel = CancellationToken::new();

    let mut all = repo
        .get_employee_carts_in_trip(&trip_id(), "e", &cancel)
        .await
        .unwrap();
    let (mut paged, _) = walk(&repo, "e", 4).await;

    all.sort_by_key(|c| c.cart_id.operation_time);
    paged.sort_by_key(|c| c.cart_id.operation_time);
    for cart in all.iter_mut().chain(paged.iter_mut()) {
        cart.items.sort_by_key(|i| i.product_id);
    }
    assert_eq!(all, paged);
}

#[tokio::test]
async fn test_neighbouring_employees_do_not_leak_into_pages() {
    let total = 11;
    let repo = seeded("e", total).await;

    let neighbourhood = [("e", total, 0), ("d", total + 5, 0), ("f", total / 2 + 1, 3)];
    for limit in [1, 3, 4, 0] {
        for (employee, count, offset) in neighbourhood {
            let (carts, _) = walk(&repo, employee, limit).await;
            assert!(carts.iter().all(|c| c.cart_id.employee_id == employee));
            let times: Vec<DateTime<Utc>> =
                carts.iter().map(|c| c.cart_id.operation_time).collect();
            let expected: Vec<DateTime<Utc>> =
                (0..count).rev().map(|n| op_time(n * 7 + offset)).collect();
            assert_eq!(times, expected, "{employee} limit {limit}");
        }
    }
}
