use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidOrAsk {
    Bid,
    Ask,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub price: Decimal,
    pub size: Decimal,
}

/// Four-sided order book for a single binary market (YES/NO x bid/ask).
///
/// Bids are sorted descending by price (best first), asks ascending,
/// matching the venue's own sort order so `first()` is always best.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub yes_bids: Vec<OrderBookEntry>,
    pub yes_asks: Vec<OrderBookEntry>,
    pub no_bids: Vec<OrderBookEntry>,
    pub no_asks: Vec<OrderBookEntry>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    pub fn best_ask(&self, side: Side) -> Option<Decimal> {
        self.asks(side).first().map(|e| e.price)
    }

    pub fn best_bid(&self, side: Side) -> Option<Decimal> {
        self.bids(side).first().map(|e| e.price)
    }

    fn asks(&self, side: Side) -> &[OrderBookEntry] {
        match side {
            Side::Yes => &self.yes_asks,
            Side::No => &self.no_asks,
        }
    }

    fn bids(&self, side: Side) -> &[OrderBookEntry] {
        match side {
            Side::Yes => &self.yes_bids,
            Side::No => &self.no_bids,
        }
    }

    /// Total size across the top `max_levels` entries of `side`'s book.
    pub fn depth(&self, side: Side, bid_or_ask: BidOrAsk, max_levels: usize) -> Decimal {
        let entries = match bid_or_ask {
            BidOrAsk::Bid => self.bids(side),
            BidOrAsk::Ask => self.asks(side),
        };
        entries
            .iter()
            .take(max_levels)
            .map(|e| e.size)
            .sum::<Decimal>()
    }

    /// The book is usable once both sides have at least one ask quoted.
    pub fn is_complete(&self) -> bool {
        !self.yes_asks.is_empty() && !self.no_asks.is_empty()
    }

    pub fn mid_price(side_bids: &[OrderBookEntry], side_asks: &[OrderBookEntry]) -> Option<Decimal> {
        let best_bid = side_bids.first()?.price;
        let best_ask = side_asks.first()?.price;
        Some((best_bid + best_ask) / rust_decimal_macros::dec!(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book() -> OrderBook {
        OrderBook {
            yes_bids: vec![
                OrderBookEntry { price: dec!(0.40), size: dec!(100) },
                OrderBookEntry { price: dec!(0.39), size: dec!(50) },
            ],
            yes_asks: vec![OrderBookEntry { price: dec!(0.41), size: dec!(80) }],
            no_bids: vec![OrderBookEntry { price: dec!(0.55), size: dec!(60) }],
            no_asks: vec![OrderBookEntry { price: dec!(0.56), size: dec!(40) }],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn best_prices_are_first_entry() {
        let b = book();
        assert_eq!(b.best_bid(Side::Yes), Some(dec!(0.40)));
        assert_eq!(b.best_ask(Side::Yes), Some(dec!(0.41)));
    }

    #[test]
    fn depth_sums_top_n_levels() {
        let b = book();
        assert_eq!(b.depth(Side::Yes, BidOrAsk::Bid, 5), dec!(150));
        assert_eq!(b.depth(Side::Yes, BidOrAsk::Bid, 1), dec!(100));
    }

    #[test]
    fn incomplete_book_missing_an_ask_side() {
        let mut b = book();
        b.no_asks.clear();
        assert!(!b.is_complete());
    }
}
