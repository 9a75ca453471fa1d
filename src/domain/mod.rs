pub mod market;
pub mod order_book;
pub mod position;
pub mod trade;

pub use market::Market;
pub use order_book::{BidOrAsk, OrderBook, OrderBookEntry};
pub use position::{Position, Side};
pub use trade::{RiskLevel, RiskMetrics, Trade};
