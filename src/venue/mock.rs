use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{Market, OrderBook, OrderBookEntry, Side};

use super::{OpenOrder, OrderSide, VenueClient, VenueError};

/// In-memory venue stub for tests: returns a scripted order book and
/// always fills limit orders at the requested price, recording each
/// placement for assertions.
pub struct MockVenueClient {
    book: Mutex<OrderBook>,
    pub fills: Mutex<Vec<(String, OrderSide, Decimal, Decimal)>>,
    pub reject_next: Mutex<bool>,
}

impl MockVenueClient {
    pub fn new(book: OrderBook) -> Self {
        Self {
            book: Mutex::new(book),
            fills: Mutex::new(Vec::new()),
            reject_next: Mutex::new(false),
        }
    }

    pub fn set_book(&self, book: OrderBook) {
        *self.book.lock().unwrap() = book;
    }

    pub fn reject_next_order(&self) {
        *self.reject_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl VenueClient for MockVenueClient {
    async fn list_15min_markets(&self, _asset: &str) -> Result<Vec<Market>, VenueError> {
        Ok(Vec::new())
    }

    async fn get_market_order_book(&self, _market: &Market) -> Result<OrderBook, VenueError> {
        Ok(self.book.lock().unwrap().clone())
    }

    /// The scripted book has no notion of which token id belongs to which
    /// side, so this always hands back the YES leg's bids; fine for tests,
    /// which exercise the single-leg call path rather than its content.
    async fn get_order_book(&self, _token_id: &str) -> Result<Vec<OrderBookEntry>, VenueError> {
        Ok(self.book.lock().unwrap().yes_bids.clone())
    }

    async fn place_limit_order(
        &self,
        token_id: &str,
        _side: Side,
        order_side: OrderSide,
        price: Decimal,
        size: Decimal,
        _post_only: bool,
    ) -> Result<Option<String>, VenueError> {
        let mut reject = self.reject_next.lock().unwrap();
        if *reject {
            *reject = false;
            return Ok(None);
        }
        drop(reject);

        self.fills
            .lock()
            .unwrap()
            .push((token_id.to_string(), order_side, price, size));
        Ok(Some(format!("mock-order-{}", self.fills.lock().unwrap().len())))
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<bool, VenueError> {
        Ok(true)
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, VenueError> {
        Ok(Vec::new())
    }
}
