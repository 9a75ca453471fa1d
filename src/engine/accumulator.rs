use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::{BidOrAsk, Market, OrderBook, Position, Side, Trade};
use crate::store::StateStore;
use crate::venue::{OrderSide, VenueClient};

use super::{Opportunity, RunFlag};

/// Top-of-book levels inspected when checking whether the opposite side
/// has enough resting liquidity to accept a hedge later.
const LIQUIDITY_DEPTH_LEVELS: usize = 5;

/// Scans the order book once per tick for a YES or NO ask whose cost,
/// combined with the position's current average on the other side,
/// would bring the pair cost under the profit target, and buys it.
pub struct Accumulator {
    store: Arc<StateStore>,
    venue: Arc<dyn VenueClient>,
    config: AppConfig,
}

impl Accumulator {
    pub fn new(store: Arc<StateStore>, venue: Arc<dyn VenueClient>, config: AppConfig) -> Self {
        Self {
            store,
            venue,
            config,
        }
    }

    /// Long-lived loop: halted → idle 1s; within the settlement buffer →
    /// stop entirely; otherwise scan-and-execute once per
    /// `scan_interval_ms`. Errors are logged and treated as a missed
    /// tick, never propagated — the next tick retries naturally.
    pub async fn run(&self, market: &Market, run_flag: RunFlag) {
        while run_flag.is_running() {
            if self.store.is_halted().await.unwrap_or(true) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            if market.is_within_settlement_buffer(self.config.settlement_buffer_seconds) {
                info!("accumulator stopping: within settlement buffer");
                break;
            }

            if let Err(e) = self.scan_and_execute(market).await {
                warn!(error = %e, "accumulator tick failed, retrying next cycle");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            tokio::time::sleep(self.config.scan_interval()).await;
        }
    }

    /// Fetches the current order book from the venue. Exposed so the
    /// Equalizer can share the same venue handle without holding its
    /// own reference to it.
    pub async fn fetch_order_book(&self, market: &Market) -> anyhow::Result<OrderBook> {
        Ok(self.venue.get_market_order_book(market).await?)
    }

    pub fn scan_opportunities(&self, position: &Position, order_book: &OrderBook) -> Vec<Opportunity> {
        let target = self.config.profit_target();
        let mut out = Vec::new();

        if let Some(ask_yes) = order_book.best_ask(Side::Yes) {
            let expected = ask_yes + position.avg_no;
            if expected < target {
                out.push(Opportunity {
                    side: Side::Yes,
                    ask_price: ask_yes,
                    expected_pair_cost: expected,
                });
            }
        }

        if let Some(ask_no) = order_book.best_ask(Side::No) {
            let expected = ask_no + position.avg_yes;
            if expected < target {
                out.push(Opportunity {
                    side: Side::No,
                    ask_price: ask_no,
                    expected_pair_cost: expected,
                });
            }
        }

        out
    }

    pub async fn scan_and_execute(&self, market: &Market) -> anyhow::Result<Option<Trade>> {
        let position = self.store.get_position().await?;
        let order_book = self.venue.get_market_order_book(market).await?;

        if !order_book.is_complete() {
            debug!("order book incomplete, skipping tick");
            return Ok(None);
        }

        let opportunities = self.scan_opportunities(&position, &order_book);

        // Ties are broken in favor of YES: fold with `<=` so an equal
        // expected pair cost keeps whichever candidate is already YES.
        let mut chosen: Option<Opportunity> = None;
        for candidate in opportunities {
            chosen = match chosen {
                None => Some(candidate),
                Some(current) => {
                    if current.side == Side::Yes {
                        if candidate.expected_pair_cost < current.expected_pair_cost {
                            Some(candidate)
                        } else {
                            Some(current)
                        }
                    } else if candidate.expected_pair_cost <= current.expected_pair_cost {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        let Some(opportunity) = chosen else {
            return Ok(None);
        };

        self.execute_opportunity(market, &position, &order_book, opportunity)
            .await
    }

    async fn execute_opportunity(
        &self,
        market: &Market,
        position: &Position,
        order_book: &OrderBook,
        opportunity: Opportunity,
    ) -> anyhow::Result<Option<Trade>> {
        if !self.check_constraints(opportunity.side, position, order_book) {
            debug!(side = %opportunity.side, "opportunity rejected by constraints");
            return Ok(None);
        }

        self.execute_trade(
            market,
            opportunity.side,
            opportunity.ask_price,
            self.config.trade_size,
        )
        .await
    }

    /// Delta-cap and opposite-side liquidity constraints, checked before
    /// ever placing an order.
    pub fn check_constraints(&self, side: Side, position: &Position, order_book: &OrderBook) -> bool {
        let prospective_delta = match side {
            Side::Yes => (position.qty_yes + self.config.trade_size) - position.qty_no,
            Side::No => position.qty_yes - (position.qty_no + self.config.trade_size),
        };
        if prospective_delta.abs() > self.config.max_unhedged_delta {
            return false;
        }

        let opposite_depth = order_book.depth(side.opposite(), BidOrAsk::Ask, LIQUIDITY_DEPTH_LEVELS);
        let required = self.config.trade_size * self.config.min_liquidity_multiplier;
        if opposite_depth < required {
            return false;
        }

        true
    }

    /// Places a post-only limit order, then atomically commits the fill
    /// to the State Store and appends a trade record. Shared by the
    /// Equalizer, which calls this directly rather than duplicating the
    /// order-placement path.
    pub async fn execute_trade(
        &self,
        market: &Market,
        side: Side,
        price: Decimal,
        qty: Decimal,
    ) -> anyhow::Result<Option<Trade>> {
        let token_id = match side {
            Side::Yes => &market.token_id_yes,
            Side::No => &market.token_id_no,
        };

        let order_id = self
            .venue
            .place_limit_order(token_id, side, OrderSide::Buy, price, qty, true)
            .await?;

        let Some(order_id) = order_id else {
            warn!(%side, "order placement returned no order id, aborting fill");
            return Ok(None);
        };

        let cost = price * qty;
        let updated = self
            .store
            .update_position_atomic(side, qty, cost)
            .await?;

        let trade = Trade {
            trade_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            side,
            price,
            qty,
            resulting_pair_cost: updated.pair_cost,
            resulting_delta: updated.delta,
            order_id: Some(order_id),
            market_id: market.market_id.clone(),
        };
        self.store.add_trade(&trade).await?;

        info!(%side, %price, %qty, pair_cost = %updated.pair_cost, "executed accumulator trade");
        Ok(Some(trade))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderBookEntry;
    use crate::venue::MockVenueClient;
    use rust_decimal_macros::dec;
    use tempfile::NamedTempFile;

    fn market() -> Market {
        Market {
            market_id: "m1".into(),
            token_id_yes: "yes-token".into(),
            token_id_no: "no-token".into(),
            expiration: chrono::Utc::now() + chrono::Duration::minutes(15),
            ..Market::default()
        }
    }

    fn book(ask_yes: Decimal, ask_no: Decimal, depth: Decimal) -> OrderBook {
        OrderBook {
            yes_bids: vec![],
            yes_asks: vec![OrderBookEntry { price: ask_yes, size: depth }],
            no_bids: vec![],
            no_asks: vec![OrderBookEntry { price: ask_no, size: depth }],
            timestamp: chrono::Utc::now(),
        }
    }

    fn accumulator(venue: Arc<MockVenueClient>) -> (Accumulator, Arc<StateStore>) {
        let file = NamedTempFile::new().unwrap();
        let store = Arc::new(StateStore::new(file.path().to_str().unwrap()).unwrap());
        let mut config = AppConfig::from_env().unwrap();
        config.trade_size = dec!(10);
        config.profit_margin = dec!(0.02);
        config.max_unhedged_delta = dec!(50);
        config.min_liquidity_multiplier = dec!(3.0);
        (Accumulator::new(store.clone(), venue, config), store)
    }

    #[tokio::test]
    async fn executes_yes_when_below_profit_target() {
        let venue = Arc::new(MockVenueClient::new(book(dec!(0.40), dec!(0.70), dec!(100))));
        let (acc, store) = accumulator(venue);
        let trade = acc.scan_and_execute(&market()).await.unwrap();
        assert!(trade.is_some());
        let pos = store.get_position().await.unwrap();
        assert_eq!(pos.qty_yes, dec!(10));
    }

    #[tokio::test]
    async fn skips_when_no_opportunity_under_target() {
        let venue = Arc::new(MockVenueClient::new(book(dec!(0.60), dec!(0.60), dec!(100))));
        let (acc, _store) = accumulator(venue);
        let trade = acc.scan_and_execute(&market()).await.unwrap();
        assert!(trade.is_none());
    }

    #[tokio::test]
    async fn ties_are_broken_in_favor_of_yes() {
        // Equal cost on both sides: 0.40 + 0.00 == 0.40 + 0.00
        let venue = Arc::new(MockVenueClient::new(book(dec!(0.40), dec!(0.40), dec!(100))));
        let (acc, store) = accumulator(venue);
        acc.scan_and_execute(&market()).await.unwrap();
        let pos = store.get_position().await.unwrap();
        assert_eq!(pos.qty_yes, dec!(10));
        assert_eq!(pos.qty_no, dec!(0));
    }

    #[tokio::test]
    async fn rejects_opportunity_when_liquidity_too_thin() {
        let venue = Arc::new(MockVenueClient::new(book(dec!(0.40), dec!(0.70), dec!(5))));
        let (acc, store) = accumulator(venue);
        let trade = acc.scan_and_execute(&market()).await.unwrap();
        assert!(trade.is_none());
        let pos = store.get_position().await.unwrap();
        assert_eq!(pos.qty_yes, dec!(0));
    }
}
