use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

use crate::domain::{Market, Position, Side};
use crate::store::StateStore;

use super::{Accumulator, RunFlag};

/// The highest price the Equalizer will ever bid to rebalance: once the
/// opposite side's average plus this price would clear 0.99, there is no
/// room left to hedge profitably.
const MAX_COMBINED_COST: Decimal = dec!(0.99);

/// Rebalances the lagging side back toward delta-neutral by bidding the
/// minimum of (best ask, the highest price that still leaves room under
/// 0.99 combined with the other side's average) on the side with fewer
/// shares, shared through the Accumulator's own `execute_trade` path.
pub struct Equalizer {
    store: Arc<StateStore>,
    accumulator: Arc<Accumulator>,
    trade_size: Decimal,
}

impl Equalizer {
    pub fn new(store: Arc<StateStore>, accumulator: Arc<Accumulator>, trade_size: Decimal) -> Self {
        Self {
            store,
            accumulator,
            trade_size,
        }
    }

    pub async fn run(&self, market: &Market, run_flag: RunFlag) {
        while run_flag.is_running() {
            if self.store.is_halted().await.unwrap_or(true) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            if let Err(e) = self.check_and_rebalance(market, &run_flag).await {
                error!(error = %e, "equalizer tick failed");
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    pub async fn check_and_rebalance(
        &self,
        market: &Market,
        run_flag: &RunFlag,
    ) -> anyhow::Result<()> {
        let position = self.store.get_position().await?;
        if position.delta.abs() < Decimal::ONE {
            return Ok(());
        }

        let lagging_side = if position.delta > Decimal::ZERO {
            Side::No
        } else {
            Side::Yes
        };
        let target_qty = position.delta.abs();

        self.rebalance_position(market, lagging_side, target_qty, &position, run_flag)
            .await
    }

    async fn rebalance_position(
        &self,
        market: &Market,
        lagging_side: Side,
        target_qty: Decimal,
        position: &Position,
        run_flag: &RunFlag,
    ) -> anyhow::Result<()> {
        let book = self.accumulator.fetch_order_book(market).await?;

        let Some(best_ask) = book.best_ask(lagging_side) else {
            warn!(%lagging_side, "no ask available on lagging side, cannot rebalance");
            return Ok(());
        };

        let opposite_avg = position.avg_for(lagging_side.opposite());
        let max_price = MAX_COMBINED_COST - opposite_avg;
        if max_price <= Decimal::ZERO {
            error!(%opposite_avg, "cannot rebalance: no room left under 0.99 combined cost");
            return Ok(());
        }

        let bid_price = best_ask.min(max_price);
        let chunk_size = target_qty.min(self.trade_size);
        let mut remaining = target_qty;

        while remaining > Decimal::ZERO && run_flag.is_running() {
            let trade_qty = remaining.min(chunk_size);
            match self
                .accumulator
                .execute_trade(market, lagging_side, bid_price, trade_qty)
                .await
            {
                Ok(Some(_)) => {
                    remaining -= trade_qty;
                    info!(%lagging_side, remaining = %remaining, "equalizer chunk filled");
                }
                Ok(None) => {
                    warn!(%lagging_side, "equalizer chunk unfilled, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(e) => {
                    error!(error = %e, "equalizer chunk errored, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }

        Ok(())
    }

    /// Read-only preview of what a rebalance would currently cost,
    /// exposed for the dashboard; never executes anything.
    pub async fn calculate_rebalance_cost(
        &self,
        market: &Market,
    ) -> anyhow::Result<Option<(Side, Decimal, Decimal)>> {
        let position = self.store.get_position().await?;
        if position.delta.abs() < Decimal::ONE {
            return Ok(None);
        }
        let lagging_side = if position.delta > Decimal::ZERO {
            Side::No
        } else {
            Side::Yes
        };
        let book = self.accumulator.fetch_order_book(market).await?;
        let Some(best_ask) = book.best_ask(lagging_side) else {
            return Ok(None);
        };
        let qty = position.delta.abs();
        Ok(Some((lagging_side, best_ask, best_ask * qty)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::domain::{OrderBookEntry, OrderBook};
    use crate::venue::MockVenueClient;
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

    async fn setup(book: OrderBook) -> (Equalizer, Arc<StateStore>) {
        let file = NamedTempFile::new().unwrap();
        let store = Arc::new(StateStore::new(file.path().to_str().unwrap()).unwrap());
        let venue = Arc::new(MockVenueClient::new(book));
        let mut config = AppConfig::from_env().unwrap();
        config.trade_size = dec!(10);
        let accumulator = Arc::new(Accumulator::new(store.clone(), venue, config));
        (Equalizer::new(store.clone(), accumulator, dec!(10)), store)
    }

    #[tokio::test]
    async fn no_op_when_delta_under_one() {
        let book = OrderBook {
            yes_asks: vec![OrderBookEntry { price: dec!(0.40), size: dec!(100) }],
            no_asks: vec![OrderBookEntry { price: dec!(0.60), size: dec!(100) }],
            ..Default::default()
        };
        let (eq, store) = setup(book).await;
        let run_flag = RunFlag::new();
        eq.check_and_rebalance(&market(), &run_flag).await.unwrap();
        let pos = store.get_position().await.unwrap();
        assert_eq!(pos.qty_yes, Decimal::ZERO);
        assert_eq!(pos.qty_no, Decimal::ZERO);
    }

    #[tokio::test]
    async fn rebalances_lagging_no_side_toward_delta_neutral() {
        let book = OrderBook {
            yes_asks: vec![OrderBookEntry { price: dec!(0.40), size: dec!(100) }],
            no_asks: vec![OrderBookEntry { price: dec!(0.50), size: dec!(100) }],
            ..Default::default()
        };
        let (eq, store) = setup(book).await;
        store
            .update_position_atomic(Side::Yes, dec!(10), dec!(4.0))
            .await
            .unwrap();

        let run_flag = RunFlag::new();
        eq.check_and_rebalance(&market(), &run_flag).await.unwrap();

        let pos = store.get_position().await.unwrap();
        assert_eq!(pos.qty_no, dec!(10));
        assert_eq!(pos.delta, Decimal::ZERO);
    }

    #[tokio::test]
    async fn refuses_to_rebalance_when_no_room_under_cap() {
        let book = OrderBook {
            yes_asks: vec![OrderBookEntry { price: dec!(0.95), size: dec!(100) }],
            no_asks: vec![OrderBookEntry { price: dec!(0.95), size: dec!(100) }],
            ..Default::default()
        };
        let (eq, store) = setup(book).await;
        store
            .update_position_atomic(Side::Yes, dec!(10), dec!(6.0))
            .await
            .unwrap();

        let run_flag = RunFlag::new();
        eq.check_and_rebalance(&market(), &run_flag).await.unwrap();

        let pos = store.get_position().await.unwrap();
        assert_eq!(pos.qty_no, Decimal::ZERO);
    }
}
