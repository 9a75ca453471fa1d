use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::domain::{BidOrAsk, Market, OrderBook, Position, RiskLevel, RiskMetrics, Side};
use crate::store::StateStore;
use crate::venue::{OrderSide, VenueClient};

use super::RunFlag;

/// Ask-depth levels inspected when deciding whether a position could
/// actually be unwound at current liquidity.
const LIQUIDITY_CHECK_LEVELS: usize = 10;

/// Standing watchdog: checks delta, liquidity, P&L-based stop-loss, and
/// settlement proximity on a slow cadence, escalating to a halt or a
/// full emergency liquidation when a hard limit is breached.
pub struct RiskEngine {
    store: Arc<StateStore>,
    venue: Arc<dyn VenueClient>,
    config: AppConfig,
    risk_level: RwLock<RiskLevel>,
}

impl RiskEngine {
    pub fn new(store: Arc<StateStore>, venue: Arc<dyn VenueClient>, config: AppConfig) -> Self {
        Self {
            store,
            venue,
            config,
            risk_level: RwLock::new(RiskLevel::Low),
        }
    }

    pub fn current_risk_level(&self) -> RiskLevel {
        *self.risk_level.read()
    }

    pub async fn run(&self, market: &Market, run_flag: RunFlag) {
        while run_flag.is_running() {
            if let Err(e) = self.run_risk_checks(market).await {
                error!(error = %e, "risk engine check failed");
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    pub async fn run_risk_checks(&self, market: &Market) -> anyhow::Result<()> {
        let position = self.store.get_position().await?;
        let order_book = self.venue.get_market_order_book(market).await?;

        let delta_ok = self.check_max_delta(&position);
        let liquidity_ok = self.check_liquidity_depth(&position, &order_book);
        let stop_loss_triggered = self.check_bailout_stop_loss(&position, &order_book);
        let settlement_risk = market.is_within_settlement_buffer(self.config.settlement_buffer_seconds);

        let risk_level = Self::classify_risk_level(delta_ok, liquidity_ok, stop_loss_triggered, settlement_risk);
        *self.risk_level.write() = risk_level;
        let metrics = self.risk_metrics(&position, &order_book, market, risk_level);
        self.store.update_metrics(&metrics).await?;

        if stop_loss_triggered {
            error!(critical = true, "bailout stop-loss triggered, liquidating");
            self.emergency_liquidation(market, &position, &order_book).await?;
        } else if settlement_risk {
            info!("within settlement buffer, halting new accumulation");
            self.store.set_halt_flag(true).await?;
        }

        Ok(())
    }

    pub fn check_max_delta(&self, position: &Position) -> bool {
        position.delta.abs() <= self.config.max_unhedged_delta
    }

    pub fn check_liquidity_depth(&self, position: &Position, order_book: &OrderBook) -> bool {
        let depth_yes = order_book.depth(Side::Yes, BidOrAsk::Ask, LIQUIDITY_CHECK_LEVELS);
        let depth_no = order_book.depth(Side::No, BidOrAsk::Ask, LIQUIDITY_CHECK_LEVELS);
        depth_yes >= position.qty_yes && depth_no >= position.qty_no
    }

    /// Compares unrealized P&L against the *gross* cost basis
    /// (`cost_yes + cost_no`), not the net pair-cost-weighted basis —
    /// preserved deliberately from the original: a looser threshold than
    /// netting the locked profit in, but that is the behavior being
    /// ported, not a bug.
    pub fn check_bailout_stop_loss(&self, position: &Position, order_book: &OrderBook) -> bool {
        let Some(mid_yes) = OrderBook::mid_price(&order_book.yes_bids, &order_book.yes_asks) else {
            return false;
        };
        let Some(mid_no) = OrderBook::mid_price(&order_book.no_bids, &order_book.no_asks) else {
            return false;
        };

        let position_value = position.qty_yes * mid_yes + position.qty_no * mid_no;
        let position_cost = position.cost_yes + position.cost_no;
        if position_cost <= Decimal::ZERO {
            return false;
        }

        let unrealized_pnl = position_value - position_cost;
        let loss_threshold =
            position_cost * (self.config.bailout_stop_loss_percent / rust_decimal_macros::dec!(100));

        unrealized_pnl < -loss_threshold
    }

    pub fn check_settlement_buffer(&self, market: &Market) -> bool {
        market.is_within_settlement_buffer(self.config.settlement_buffer_seconds)
    }

    fn classify_risk_level(
        delta_ok: bool,
        liquidity_ok: bool,
        stop_loss_triggered: bool,
        settlement_risk: bool,
    ) -> RiskLevel {
        if stop_loss_triggered {
            RiskLevel::Critical
        } else if !delta_ok || !liquidity_ok {
            RiskLevel::High
        } else if settlement_risk {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    fn risk_metrics(
        &self,
        position: &Position,
        order_book: &OrderBook,
        market: &Market,
        risk_level: RiskLevel,
    ) -> RiskMetrics {
        let unrealized_pnl = match (
            OrderBook::mid_price(&order_book.yes_bids, &order_book.yes_asks),
            OrderBook::mid_price(&order_book.no_bids, &order_book.no_asks),
        ) {
            (Some(mid_yes), Some(mid_no)) => {
                (position.qty_yes * mid_yes + position.qty_no * mid_no)
                    - (position.cost_yes + position.cost_no)
            }
            _ => Decimal::ZERO,
        };

        RiskMetrics {
            current_delta: position.delta,
            max_delta: self.config.max_unhedged_delta,
            pair_cost: position.pair_cost,
            locked_profit: position.locked_profit,
            unrealized_pnl,
            // Realized P&L requires replaying the full trade history and
            // isn't tracked incrementally anywhere yet; left at zero
            // rather than faked.
            realized_pnl: Decimal::ZERO,
            time_to_settlement_seconds: market.time_to_expiration().num_seconds(),
            liquidity_depth_yes: order_book.depth(Side::Yes, BidOrAsk::Ask, LIQUIDITY_CHECK_LEVELS),
            liquidity_depth_no: order_book.depth(Side::No, BidOrAsk::Ask, LIQUIDITY_CHECK_LEVELS),
            risk_level,
        }
    }

    /// Cancels every open order, sells down each nonzero leg at the best
    /// resting bid (taker, not post-only — the one place in this system
    /// a taker order is allowed), and halts. Logs but does not retry on
    /// failure: by the time this runs, staying flat matters more than
    /// completing the unwind.
    pub async fn emergency_liquidation(
        &self,
        market: &Market,
        position: &Position,
        order_book: &OrderBook,
    ) -> anyhow::Result<()> {
        if let Err(e) = self.cancel_all_orders().await {
            error!(error = %e, "failed to cancel open orders during emergency liquidation");
        }

        if position.qty_yes > Decimal::ZERO {
            self.market_sell(market, Side::Yes, position.qty_yes, order_book)
                .await?;
        }
        if position.qty_no > Decimal::ZERO {
            self.market_sell(market, Side::No, position.qty_no, order_book)
                .await?;
        }

        self.store.set_halt_flag(true).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self) -> anyhow::Result<()> {
        let open_orders = self.venue.get_open_orders().await?;
        for order in open_orders {
            if let Err(e) = self.venue.cancel_order(&order.order_id).await {
                warn!(order_id = %order.order_id, error = %e, "failed to cancel order");
            }
        }
        Ok(())
    }

    async fn market_sell(
        &self,
        market: &Market,
        side: Side,
        qty: Decimal,
        order_book: &OrderBook,
    ) -> anyhow::Result<()> {
        let best_bid = order_book.best_bid(side).unwrap_or(rust_decimal_macros::dec!(0.01));
        let token_id = match side {
            Side::Yes => &market.token_id_yes,
            Side::No => &market.token_id_no,
        };

        let order_id = self
            .venue
            .place_limit_order(token_id, side, OrderSide::Sell, best_bid, qty, false)
            .await?;

        if order_id.is_some() {
            self.store
                .update_position_atomic(side, -qty, -(best_bid * qty))
                .await?;
        }
        Ok(())
    }

    pub async fn force_halt(&self) -> anyhow::Result<()> {
        self.store.set_halt_flag(true).await?;
        Ok(())
    }

    pub async fn resume_trading(&self) -> anyhow::Result<()> {
        self.store.set_halt_flag(false).await?;
        Ok(())
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

    fn engine(book: OrderBook) -> (RiskEngine, Arc<StateStore>) {
        let file = NamedTempFile::new().unwrap();
        let store = Arc::new(StateStore::new(file.path().to_str().unwrap()).unwrap());
        let venue = Arc::new(MockVenueClient::new(book));
        let config = AppConfig::from_env().unwrap();
        (RiskEngine::new(store.clone(), venue, config), store)
    }

    fn thin_book() -> OrderBook {
        OrderBook {
            yes_bids: vec![OrderBookEntry { price: dec!(0.40), size: dec!(100) }],
            yes_asks: vec![OrderBookEntry { price: dec!(0.41), size: dec!(100) }],
            no_bids: vec![OrderBookEntry { price: dec!(0.55), size: dec!(100) }],
            no_asks: vec![OrderBookEntry { price: dec!(0.56), size: dec!(100) }],
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn max_delta_within_bound_passes() {
        let (engine, _store) = engine(thin_book());
        let position = Position::default().apply(Side::Yes, dec!(10), dec!(4.0));
        assert!(engine.check_max_delta(&position));
    }

    #[test]
    fn stop_loss_triggers_on_large_unrealized_loss() {
        let (engine, _store) = engine(thin_book());
        // Bought YES far above current mid: heavy unrealized loss.
        let position = Position::default().apply(Side::Yes, dec!(100), dec!(90.0));
        assert!(engine.check_bailout_stop_loss(&position, &thin_book()));
    }

    #[test]
    fn stop_loss_does_not_trigger_on_small_move() {
        let (engine, _store) = engine(thin_book());
        let position = Position::default().apply(Side::Yes, dec!(10), dec!(4.05));
        assert!(!engine.check_bailout_stop_loss(&position, &thin_book()));
    }

    #[tokio::test]
    async fn emergency_liquidation_flattens_and_halts() {
        let (engine, store) = engine(thin_book());
        store
            .update_position_atomic(Side::Yes, dec!(10), dec!(4.0))
            .await
            .unwrap();
        let position = store.get_position().await.unwrap();
        engine
            .emergency_liquidation(&market(), &position, &thin_book())
            .await
            .unwrap();

        let after = store.get_position().await.unwrap();
        assert_eq!(after.qty_yes, Decimal::ZERO);
        assert!(store.is_halted().await.unwrap());
    }
}
