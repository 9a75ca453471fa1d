use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::{Market, Position, RiskMetrics, Side, Trade};

/// Trades beyond this count are pruned oldest-first on every insert,
/// matching the original's `zadd` + `zremrangebyrank(..., 0, -1001)`.
const MAX_RETAINED_TRADES: i64 = 1000;

const BUSY_RETRY_ATTEMPTS: u32 = 5;
const BUSY_RETRY_BASE_MS: u64 = 20;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    #[error("state store busy after {0} retries")]
    Busy(u32),
}

/// Persistent position/trade/market/metrics/halt-flag store, backed by a
/// single SQLite connection guarded by one mutex. Position updates hold
/// the mutex across the whole read-modify-persist span, which is the
/// single-writer variant of the atomic update primitive: linearizability
/// falls out of mutual exclusion, no optimistic retry loop needed.
#[derive(Clone)]
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
}

impl StateStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open state store db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS position (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                qty_yes TEXT NOT NULL,
                cost_yes TEXT NOT NULL,
                qty_no TEXT NOT NULL,
                cost_no TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                qty TEXT NOT NULL,
                resulting_pair_cost TEXT NOT NULL,
                resulting_delta TEXT NOT NULL,
                order_id TEXT,
                market_id TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_ts ON trades(ts DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS market (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                json TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metrics (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS halt (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                halted INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO halt (id, halted) VALUES (1, 0)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn get_position(&self) -> Result<Position> {
        let conn = self.conn.lock().await;
        Self::read_position(&conn)
    }

    fn read_position(conn: &Connection) -> Result<Position> {
        let row = conn
            .query_row(
                "SELECT qty_yes, cost_yes, qty_no, cost_no FROM position WHERE id = 1",
                [],
                |row| {
                    let qty_yes: String = row.get(0)?;
                    let cost_yes: String = row.get(1)?;
                    let qty_no: String = row.get(2)?;
                    let cost_no: String = row.get(3)?;
                    Ok((qty_yes, cost_yes, qty_no, cost_no))
                },
            )
            .optional()?;

        match row {
            Some((qty_yes, cost_yes, qty_no, cost_no)) => Ok(Position::from_primaries(
                Decimal::from_str(&qty_yes)?,
                Decimal::from_str(&cost_yes)?,
                Decimal::from_str(&qty_no)?,
                Decimal::from_str(&cost_no)?,
            )),
            None => Ok(Position::default()),
        }
    }

    /// Applies a fill to the stored position and persists it, holding
    /// the connection mutex for the whole span so concurrent callers
    /// serialize rather than race.
    pub async fn update_position_atomic(
        &self,
        side: Side,
        qty_delta: Decimal,
        cost_delta: Decimal,
    ) -> Result<Position, StateStoreError> {
        let mut attempt = 0;
        loop {
            let conn = self.conn.lock().await;
            let current = Self::read_position(&conn)?;
            let updated = current.apply(side, qty_delta, cost_delta);

            let result = conn.execute(
                "INSERT INTO position (id, qty_yes, cost_yes, qty_no, cost_no, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    qty_yes = excluded.qty_yes,
                    cost_yes = excluded.cost_yes,
                    qty_no = excluded.qty_no,
                    cost_no = excluded.cost_no,
                    updated_at = excluded.updated_at",
                params![
                    updated.qty_yes.to_string(),
                    updated.cost_yes.to_string(),
                    updated.qty_no.to_string(),
                    updated.cost_no.to_string(),
                    Utc::now().timestamp(),
                ],
            );

            match result {
                Ok(_) => return Ok(updated),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::DatabaseBusy =>
                {
                    drop(conn);
                    if attempt >= BUSY_RETRY_ATTEMPTS {
                        return Err(StateStoreError::Busy(attempt));
                    }
                    attempt += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(
                        BUSY_RETRY_BASE_MS * 2u64.pow(attempt),
                    ))
                    .await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn add_trade(&self, trade: &Trade) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO trades
             (trade_id, ts, side, price, qty, resulting_pair_cost, resulting_delta, order_id, market_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                trade.trade_id,
                trade.timestamp.timestamp(),
                trade.side.as_str(),
                trade.price.to_string(),
                trade.qty.to_string(),
                trade.resulting_pair_cost.to_string(),
                trade.resulting_delta.to_string(),
                trade.order_id,
                trade.market_id,
            ],
        )?;

        // Evict everything past the most recent MAX_RETAINED_TRADES rows,
        // mirroring the original's zremrangebyrank on every add.
        conn.execute(
            "DELETE FROM trades WHERE trade_id NOT IN (
                SELECT trade_id FROM trades ORDER BY ts DESC LIMIT ?1
            )",
            params![MAX_RETAINED_TRADES],
        )?;

        Ok(())
    }

    pub async fn get_recent_trades(&self, limit: usize) -> Result<Vec<Trade>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT trade_id, ts, side, price, qty, resulting_pair_cost, resulting_delta, order_id, market_id
             FROM trades ORDER BY ts DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let ts: i64 = row.get(1)?;
            let side: String = row.get(2)?;
            Ok((
                row.get::<_, String>(0)?,
                ts,
                side,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut trades = Vec::new();
        for row in rows {
            let (trade_id, ts, side, price, qty, pair_cost, delta, order_id, market_id) = row?;
            trades.push(Trade {
                trade_id,
                timestamp: DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now),
                side: side.parse().map_err(|e: String| anyhow::anyhow!(e))?,
                price: Decimal::from_str(&price)?,
                qty: Decimal::from_str(&qty)?,
                resulting_pair_cost: Decimal::from_str(&pair_cost)?,
                resulting_delta: Decimal::from_str(&delta)?,
                order_id,
                market_id,
            });
        }
        Ok(trades)
    }

    /// Currently-retained trade count, i.e. the cardinality of the
    /// already-capped table — matches the original's Redis `zcard`, not
    /// a lifetime counter.
    pub async fn get_trade_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))?;
        Ok(count)
    }

    pub async fn save_market(&self, market: &Market) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(market)?;
        conn.execute(
            "INSERT INTO market (id, json) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET json = excluded.json",
            params![json],
        )?;
        Ok(())
    }

    pub async fn get_market(&self) -> Result<Option<Market>> {
        let conn = self.conn.lock().await;
        let json: Option<String> = conn
            .query_row("SELECT json FROM market WHERE id = 1", [], |r| r.get(0))
            .optional()?;
        Ok(match json {
            Some(j) => Some(serde_json::from_str(&j)?),
            None => None,
        })
    }

    pub async fn update_metrics(&self, metrics: &RiskMetrics) -> Result<()> {
        let conn = self.conn.lock().await;
        let entries: Vec<(&str, String)> = vec![
            ("current_delta", metrics.current_delta.to_string()),
            ("max_delta", metrics.max_delta.to_string()),
            ("pair_cost", metrics.pair_cost.to_string()),
            ("locked_profit", metrics.locked_profit.to_string()),
            ("unrealized_pnl", metrics.unrealized_pnl.to_string()),
            ("realized_pnl", metrics.realized_pnl.to_string()),
            (
                "time_to_settlement_seconds",
                metrics.time_to_settlement_seconds.to_string(),
            ),
            ("liquidity_depth_yes", metrics.liquidity_depth_yes.to_string()),
            ("liquidity_depth_no", metrics.liquidity_depth_no.to_string()),
            ("risk_level", metrics.risk_level.as_str().to_string()),
        ];
        for (key, value) in entries {
            conn.execute(
                "INSERT INTO metrics (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        Ok(())
    }

    pub async fn get_metrics(&self) -> Result<std::collections::HashMap<String, String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT key, value FROM metrics")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = std::collections::HashMap::new();
        for row in rows {
            let (k, v) = row?;
            out.insert(k, v);
        }
        Ok(out)
    }

    pub async fn set_halt_flag(&self, halted: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE halt SET halted = ?1 WHERE id = 1",
            params![halted as i64],
        )?;
        Ok(())
    }

    pub async fn is_halted(&self) -> Result<bool> {
        let conn = self.conn.lock().await;
        let halted: i64 = conn.query_row("SELECT halted FROM halt WHERE id = 1", [], |r| r.get(0))?;
        Ok(halted != 0)
    }

    pub async fn clear_all(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM position", [])?;
        conn.execute("DELETE FROM trades", [])?;
        conn.execute("DELETE FROM market", [])?;
        conn.execute("DELETE FROM metrics", [])?;
        conn.execute("UPDATE halt SET halted = 0 WHERE id = 1", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::NamedTempFile;

    fn temp_store() -> StateStore {
        let file = NamedTempFile::new().unwrap();
        StateStore::new(file.path().to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn fresh_store_has_zero_position() {
        let store = temp_store();
        let pos = store.get_position().await.unwrap();
        assert_eq!(pos.qty_yes, Decimal::ZERO);
    }

    #[tokio::test]
    async fn update_position_atomic_persists_across_reads() {
        let store = temp_store();
        store
            .update_position_atomic(Side::Yes, dec!(10), dec!(4.5))
            .await
            .unwrap();
        let pos = store.get_position().await.unwrap();
        assert_eq!(pos.qty_yes, dec!(10));
        assert_eq!(pos.avg_yes, dec!(0.45));
    }

    #[tokio::test]
    async fn trade_log_is_capped_and_newest_first() {
        let store = temp_store();
        for i in 0..5 {
            let trade = Trade {
                trade_id: format!("t{i}"),
                timestamp: Utc::now() + chrono::Duration::seconds(i),
                side: Side::Yes,
                price: dec!(0.45),
                qty: dec!(1),
                resulting_pair_cost: dec!(0.95),
                resulting_delta: dec!(1),
                order_id: None,
                market_id: "m1".to_string(),
            };
            store.add_trade(&trade).await.unwrap();
        }
        let recent = store.get_recent_trades(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].trade_id, "t4");
        assert_eq!(store.get_trade_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn halt_flag_round_trips() {
        let store = temp_store();
        assert!(!store.is_halted().await.unwrap());
        store.set_halt_flag(true).await.unwrap();
        assert!(store.is_halted().await.unwrap());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn deltas_strategy() -> impl Strategy<Value = Vec<(bool, i64, i64)>> {
        prop::collection::vec((any::<bool>(), 1i64..50, 1i64..100), 1..30)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]
        #[test]
        fn concurrent_updates_match_sequential_application(deltas in deltas_strategy()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let seq_file = tempfile::NamedTempFile::new().unwrap();
                let seq_store = StateStore::new(seq_file.path().to_str().unwrap()).unwrap();
                for (is_yes, qty, price_cents) in &deltas {
                    let side = if *is_yes { Side::Yes } else { Side::No };
                    let qty = Decimal::from(*qty);
                    let cost = Decimal::new(*price_cents, 2) * qty;
                    seq_store.update_position_atomic(side, qty, cost).await.unwrap();
                }
                let sequential = seq_store.get_position().await.unwrap();

                let conc_file = tempfile::NamedTempFile::new().unwrap();
                let conc_store = Arc::new(StateStore::new(conc_file.path().to_str().unwrap()).unwrap());
                let mut handles = Vec::new();
                for (is_yes, qty, price_cents) in deltas {
                    let store = conc_store.clone();
                    handles.push(tokio::spawn(async move {
                        let side = if is_yes { Side::Yes } else { Side::No };
                        let qty = Decimal::from(qty);
                        let cost = Decimal::new(price_cents, 2) * qty;
                        store.update_position_atomic(side, qty, cost).await.unwrap();
                    }));
                }
                for h in handles {
                    h.await.unwrap();
                }
                let concurrent = conc_store.get_position().await.unwrap();

                prop_assert_eq!(sequential.qty_yes, concurrent.qty_yes);
                prop_assert_eq!(sequential.qty_no, concurrent.qty_no);
                prop_assert_eq!(sequential.cost_yes, concurrent.cost_yes);
                prop_assert_eq!(sequential.cost_no, concurrent.cost_no);
                Ok(())
            })?;
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(5))]
        #[test]
        fn trade_log_never_exceeds_retention_cap(n in 0usize..1300) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let file = tempfile::NamedTempFile::new().unwrap();
                let store = StateStore::new(file.path().to_str().unwrap()).unwrap();
                for i in 0..n {
                    let trade = Trade {
                        trade_id: format!("t{i}"),
                        timestamp: Utc::now() + chrono::Duration::seconds(i as i64),
                        side: Side::Yes,
                        price: dec!(0.45),
                        qty: dec!(1),
                        resulting_pair_cost: dec!(0.95),
                        resulting_delta: dec!(1),
                        order_id: None,
                        market_id: "m1".to_string(),
                    };
                    store.add_trade(&trade).await.unwrap();
                }

                let count = store.get_trade_count().await.unwrap();
                prop_assert_eq!(count, n.min(MAX_RETAINED_TRADES as usize) as i64);
                if n > 0 {
                    let newest = store.get_recent_trades(1).await.unwrap();
                    prop_assert_eq!(newest[0].trade_id.clone(), format!("t{}", n - 1));
                }
                Ok(())
            })?;
        }
    }
}
