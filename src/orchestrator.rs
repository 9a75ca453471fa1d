use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::domain::{Market, OrderBook, Position, RiskLevel};
use crate::engine::{Accumulator, Equalizer, RiskEngine, RunFlag};
use crate::store::StateStore;
use crate::venue::VenueClient;

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub halted: bool,
    pub market: Option<Market>,
    pub position: Position,
    pub total_trades: i64,
    pub risk_level: RiskLevel,
}

/// Restarts `handle` only if it finished by panicking; a clean return
/// (the Accumulator stopping at the settlement buffer, or any task
/// observing a stopped run flag) is left alone. Distinguishing the two
/// is the point: `JoinHandle::is_finished()` alone can't tell a crash
/// from an intentional stop.
async fn reap_or_restart<Fut>(handle: &mut JoinHandle<()>, label: &'static str, restart: impl FnOnce() -> Fut)
where
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    if !handle.is_finished() {
        return;
    }

    let finished = std::mem::replace(handle, tokio::spawn(std::future::pending()));
    match finished.await {
        Ok(()) => info!(task = label, "task completed, leaving it stopped"),
        Err(e) => {
            warn!(task = label, error = %e, "task panicked, restarting");
            *handle = tokio::spawn(restart());
        }
    }
}

struct Supervised {
    accumulator: Arc<Accumulator>,
    equalizer: Arc<Equalizer>,
    risk_engine: Arc<RiskEngine>,
    market: Market,
    run_flag: RunFlag,
    accumulator_task: JoinHandle<()>,
    equalizer_task: JoinHandle<()>,
    risk_task: JoinHandle<()>,
}

/// Owns market selection, spawns and supervises the three background
/// components, and exposes the control surface the dashboard API calls
/// through. Unlike the Accumulator/Equalizer/Risk Engine, which only
/// ever read their own inputs, the Orchestrator holds the one piece of
/// mutable cross-cutting state: which market is currently selected and
/// whether the bot is running at all.
pub struct Orchestrator {
    store: Arc<StateStore>,
    venue: Arc<dyn VenueClient>,
    config: AppConfig,
    supervised: Mutex<Option<Supervised>>,
}

impl Orchestrator {
    pub fn new(store: Arc<StateStore>, venue: Arc<dyn VenueClient>, config: AppConfig) -> Self {
        Self {
            store,
            venue,
            config,
            supervised: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.supervised.try_lock().map(|g| g.is_some()).unwrap_or(true)
    }

    pub fn store_handle(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Fetches the order book for `market` straight from the venue. Used
    /// by the dashboard API, which has no supervised `Accumulator` to
    /// borrow from when nothing is running.
    pub async fn fetch_order_book(&self, market: &Market) -> anyhow::Result<OrderBook> {
        Ok(self.venue.get_market_order_book(market).await?)
    }

    /// Selects a market, spawns the three components, and starts the
    /// 5-second supervision loop. Returns once components are spawned;
    /// the supervision loop itself runs detached.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        {
            let guard = self.supervised.lock().await;
            if guard.is_some() {
                anyhow::bail!("orchestrator already running");
            }
        }

        let market = self
            .select_market()
            .await?
            .ok_or_else(|| anyhow::anyhow!("no suitable market found"))?;
        self.store.save_market(&market).await?;

        let accumulator = Arc::new(Accumulator::new(
            self.store.clone(),
            self.venue.clone(),
            self.config.clone(),
        ));
        let equalizer = Arc::new(Equalizer::new(
            self.store.clone(),
            accumulator.clone(),
            self.config.trade_size,
        ));
        let risk_engine = Arc::new(RiskEngine::new(
            self.store.clone(),
            self.venue.clone(),
            self.config.clone(),
        ));

        let run_flag = RunFlag::new();

        let accumulator_task = {
            let accumulator = accumulator.clone();
            let market = market.clone();
            let run_flag = run_flag.clone();
            tokio::spawn(async move { accumulator.run(&market, run_flag).await })
        };
        let equalizer_task = {
            let equalizer = equalizer.clone();
            let market = market.clone();
            let run_flag = run_flag.clone();
            tokio::spawn(async move { equalizer.run(&market, run_flag).await })
        };
        let risk_task = {
            let risk_engine = risk_engine.clone();
            let market = market.clone();
            let run_flag = run_flag.clone();
            tokio::spawn(async move { risk_engine.run(&market, run_flag).await })
        };

        info!(question = %market.question, "trading service started");

        *self.supervised.lock().await = Some(Supervised {
            accumulator,
            equalizer,
            risk_engine,
            market,
            run_flag,
            accumulator_task,
            equalizer_task,
            risk_task,
        });

        let this = self.clone();
        tokio::spawn(async move { this.monitor_tasks().await });

        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        let mut guard = self.supervised.lock().await;
        if let Some(s) = guard.take() {
            s.run_flag.stop();
            s.accumulator_task.abort();
            s.equalizer_task.abort();
            s.risk_task.abort();
            info!("trading service stopped");
        }
        Ok(())
    }

    /// Prefer a 15-minute BTC or ETH market, soonest-to-expire within a
    /// 10–15 minute window; fall back to the first available market for
    /// the asset if nothing in that window exists.
    pub async fn select_market(&self) -> anyhow::Result<Option<Market>> {
        for asset in ["BTC", "ETH"] {
            let mut markets = self.venue.list_15min_markets(asset).await?;
            if markets.is_empty() {
                continue;
            }
            markets.sort_by_key(|m| m.expiration);

            if let Some(ideal) = markets
                .iter()
                .find(|m| (10.0..=15.0).contains(&m.minutes_to_expiration()))
            {
                info!(question = %ideal.question, "selected market within ideal expiry window");
                return Ok(Some(ideal.clone()));
            }

            let fallback = markets.into_iter().next().unwrap();
            warn!(question = %fallback.question, "no ideal-window market, using fallback");
            return Ok(Some(fallback));
        }

        warn!("no suitable markets found for any configured asset");
        Ok(None)
    }

    async fn monitor_tasks(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;

            let mut guard = self.supervised.lock().await;
            let Some(s) = guard.as_mut() else {
                return;
            };

            {
                let run_flag = s.run_flag.clone();
                let accumulator = s.accumulator.clone();
                let market = s.market.clone();
                reap_or_restart(&mut s.accumulator_task, "accumulator", move || async move {
                    accumulator.run(&market, run_flag).await
                })
                .await;
            }
            {
                let run_flag = s.run_flag.clone();
                let equalizer = s.equalizer.clone();
                let market = s.market.clone();
                reap_or_restart(&mut s.equalizer_task, "equalizer", move || async move {
                    equalizer.run(&market, run_flag).await
                })
                .await;
            }
            {
                let run_flag = s.run_flag.clone();
                let risk_engine = s.risk_engine.clone();
                let market = s.market.clone();
                reap_or_restart(&mut s.risk_task, "risk_engine", move || async move {
                    risk_engine.run(&market, run_flag).await
                })
                .await;
            }
        }
    }

    pub async fn get_status(&self) -> anyhow::Result<StatusSnapshot> {
        let position = self.store.get_position().await?;
        let market = self.store.get_market().await?;
        let halted = self.store.is_halted().await?;
        let total_trades = self.store.get_trade_count().await?;
        let risk_level = match self.supervised.lock().await.as_ref() {
            Some(s) => s.risk_engine.current_risk_level(),
            None => RiskLevel::Low,
        };

        Ok(StatusSnapshot {
            running: self.is_running(),
            halted,
            market,
            position,
            total_trades,
            risk_level,
        })
    }

    pub async fn get_metrics(&self) -> anyhow::Result<std::collections::HashMap<String, String>> {
        self.store.get_metrics().await
    }

    pub async fn panic_close(&self) -> anyhow::Result<()> {
        error!(critical = true, "panic close requested via control surface");
        let guard = self.supervised.lock().await;
        let Some(s) = guard.as_ref() else {
            anyhow::bail!("trading service not running");
        };
        let position = self.store.get_position().await?;
        let book = s.accumulator.fetch_order_book(&s.market).await?;
        s.risk_engine
            .emergency_liquidation(&s.market, &position, &book)
            .await
    }

    pub async fn halt_trading(&self) -> anyhow::Result<()> {
        self.store.set_halt_flag(true).await?;
        warn!("trading halted via control surface");
        Ok(())
    }

    pub async fn resume_trading(&self) -> anyhow::Result<()> {
        self.store.set_halt_flag(false).await?;
        info!("trading resumed via control surface");
        Ok(())
    }
}
