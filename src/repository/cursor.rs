//! Keyset pagination over one employee's carts within a trip.
//!
//! Rows arrive newest first, so all rows of one cart are contiguous. A page
//! ends at a cart boundary; its cursor names the operation time of the last
//! returned cart and the next page selects strictly older rows.
//!
//! Cursors are opaque to callers: URL-safe base64 (no padding) over
//! `{"v":1,"last_op_time":"<RFC 3339>"}`. An empty cursor means "first page"
//! on input and "no more pages" on output.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregate::CartRow;
use super::error::{RepositoryError, Result};
use super::validation::is_whole_micros;
use crate::models::{Cart, CartId};

const CURSOR_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    v: u8,
    last_op_time: DateTime<Utc>,
}

/// Encode the position after a cart with the given operation time.
pub fn encode_cursor(last_op_time: DateTime<Utc>) -> String {
    let payload = CursorPayload {
        v: CURSOR_VERSION,
        last_op_time,
    };
    // Serializing a struct of a number and a timestamp cannot fail.
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a non-empty cursor into the exclusive upper bound for the next page.
pub fn decode_cursor(token: &str) -> Result<DateTime<Utc>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| RepositoryError::InvalidCursor(format!("not base64: {e}")))?;
    let payload: CursorPayload = serde_json::from_slice(&bytes)
        .map_err(|e| RepositoryError::InvalidCursor(format!("malformed payload: {e}")))?;
    if payload.v != CURSOR_VERSION {
        return Err(RepositoryError::InvalidCursor(format!(
            "unsupported version {}",
            payload.v
        )));
    }
    if !is_whole_micros(&payload.last_op_time) {
        return Err(RepositoryError::InvalidCursor(
            "timestamp finer than a microsecond".to_string(),
        ));
    }
    Ok(payload.last_op_time)
}

/// Builds one page of carts from rows in clustering order.
#[derive(Debug)]
pub(crate) struct CartPager {
    employee_id: String,
    limit: Option<usize>,
    carts: Vec<Cart>,
    current: Option<Cart>,
}

impl CartPager {
    /// A non-positive `cart_limit` means the page is unbounded.
    pub fn new(employee_id: &str, cart_limit: i64) -> Self {
        let limit = usize::try_from(cart_limit).ok().filter(|&n| n > 0);
        Self {
            employee_id: employee_id.to_string(),
            limit,
            carts: Vec::new(),
            current: None,
        }
    }

    /// Add one row. Returns true once the page is full; the row that
    /// revealed this belongs to the next page and is dropped.
    pub fn push(&mut self, row: CartRow) -> bool {
        if let Some(cart) = &mut self.current {
            if cart.cart_id.operation_time == row.operation_time {
                cart.items.push(row.item);
                return false;
            }
        }

        if let Some(done) = self.current.take() {
            self.carts.push(done);
        }
        if self.is_full() {
            return true;
        }
        self.current = Some(Cart {
            cart_id: CartId::new(&self.employee_id, row.operation_time),
            operation_type: row.operation_type,
            items: vec![row.item],
        });
        false
    }

    fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.carts.len() >= limit)
    }

    /// Page cut at a cart boundary; more rows may follow.
    pub fn into_page(self) -> (Vec<Cart>, String) {
        let cursor = self
            .carts
            .last()
            .map(|cart| encode_cursor(cart.cart_id.operation_time))
            .unwrap_or_default();
        (self.carts, cursor)
    }

    /// Rows ran out; flush the open cart and signal the end.
    pub fn into_last_page(mut self) -> (Vec<Cart>, String) {
        if let Some(done) = self.current.take() {
            self.carts.push(done);
        }
        (self.carts, String::new())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::models::{Item, OperationType};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 15, 12, 30, 0).unwrap() + Duration::minutes(minutes)
    }

    fn row(minutes: i64, product: i32) -> CartRow {
        CartRow {
            operation_time: at(minutes),
            operation_type: OperationType::SALE,
            item: Item {
                product_id: product,
                quantity: 1,
                price: 10,
            },
        }
    }

    #[test]
    fn test_cursor_roundtrip_preserves_time() {
        let t = at(0) + Duration::microseconds(123_456);
        assert_eq!(decode_cursor(&encode_cursor(t)).unwrap(), t);
    }

    #[test]
    fn test_cursor_is_url_safe() {
        let token = encode_cursor(at(0));
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_garbage_cursor_is_rejected() {
        assert!(matches!(
            decode_cursor("!!not-base64!!"),
            Err(RepositoryError::InvalidCursor(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            decode_cursor(&not_json),
            Err(RepositoryError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let token = URL_SAFE_NO_PAD.encode(br#"{"v":2,"last_op_time":"2023-01-15T12:30:00Z"}"#);
        let err = decode_cursor(&token).unwrap_err();
        assert!(err.to_string().contains("unsupported version 2"));
    }

    #[test]
    fn test_sub_microsecond_cursor_is_rejected() {
        let token = URL_SAFE_NO_PAD
            .encode(br#"{"v":1,"last_op_time":"2023-01-15T12:30:00.000000500Z"}"#);
        assert!(matches!(
            decode_cursor(&token),
            Err(RepositoryError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_page_stops_at_cart_boundary() {
        let mut pager = CartPager::new("e", 2);
        assert!(!pager.push(row(3, 1)));
        assert!(!pager.push(row(3, 2)));
        assert!(!pager.push(row(2, 1)));
        assert!(pager.push(row(1, 1)));

        let (carts, cursor) = pager.into_page();
        assert_eq!(carts.len(), 2);
        assert_eq!(carts[0].items.len(), 2);
        assert_eq!(decode_cursor(&cursor).unwrap(), at(2));
    }

    #[test]
    fn test_exhaustion_flushes_and_ends() {
        let mut pager = CartPager::new("e", 5);
        pager.push(row(3, 1));
        pager.push(row(2, 1));

        let (carts, cursor) = pager.into_last_page();
        assert_eq!(carts.len(), 2);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_non_positive_limit_is_unbounded() {
        for limit in [0, -1] {
            let mut pager = CartPager::new("e", limit);
            for minute in 0..50 {
                assert!(!pager.push(row(100 - minute, 1)));
            }
            let (carts, cursor) = pager.into_last_page();
            assert_eq!(carts.len(), 50);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_empty_page() {
        let (carts, cursor) = CartPager::new("e", 3).into_last_page();
        assert!(carts.is_empty());
        assert!(cursor.is_empty());
    }
}
