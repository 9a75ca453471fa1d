pub mod mock;
pub mod polymarket;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Market, OrderBook, OrderBookEntry, Side};

pub use mock::MockVenueClient;
pub use polymarket::PolymarketVenueClient;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("venue call timed out")]
    Timeout,
    #[error("venue rejected order: {0}")]
    Rejected(String),
    #[error("venue transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
}

/// Decouples the core engine from Polymarket's specific wire format and
/// order signing, which stay out of scope entirely: implementations of
/// this trait own HTTP transport, auth headers, and retry/timeout
/// policy; callers only ever see typed domain values.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Active 15-minute markets for `asset` (e.g. "BTC", "ETH"), used by
    /// market selection. Not part of the core per-tick contract.
    async fn list_15min_markets(&self, asset: &str) -> Result<Vec<Market>, VenueError>;

    async fn get_market_order_book(&self, market: &Market) -> Result<OrderBook, VenueError>;

    /// Single-leg convenience: the resting bids for one token, sorted
    /// best-first. Used where only one side of one market is needed.
    async fn get_order_book(&self, token_id: &str) -> Result<Vec<OrderBookEntry>, VenueError>;

    async fn place_limit_order(
        &self,
        token_id: &str,
        side: Side,
        order_side: OrderSide,
        price: Decimal,
        size: Decimal,
        post_only: bool,
    ) -> Result<Option<String>, VenueError>;

    async fn cancel_order(&self, order_id: &str) -> Result<bool, VenueError>;

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, VenueError>;
}
