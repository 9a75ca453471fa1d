use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;

/// Application configuration, loaded once at startup from the process
/// environment. A malformed numeric override fails the whole load rather
/// than silently falling back to a default, since a wrong risk threshold
/// is worse than refusing to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub polymarket_api_key: Option<String>,
    pub polymarket_api_secret: Option<String>,
    pub polymarket_api_url: String,
    pub private_key: Option<String>,

    pub database_path: String,
    pub dashboard_port: u16,
    pub log_level: String,

    pub max_unhedged_delta: Decimal,
    pub profit_margin: Decimal,
    pub settlement_buffer_seconds: i64,
    pub min_liquidity_multiplier: Decimal,
    pub max_position_size: Decimal,
    pub bailout_stop_loss_percent: Decimal,
    pub trade_size: Decimal,
    pub scan_interval_ms: u64,

    /// Not part of the recognized configuration surface but preserved
    /// from the original implementation; unused unless a future profit
    /// target calculation wants it.
    pub target_roi: Decimal,
}

fn parse_env_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match std::env::var(key) {
        Ok(raw) => Decimal::from_str(raw.trim())
            .with_context(|| format!("invalid decimal for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn parse_env_int<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {raw:?} ({e})")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            polymarket_api_key: std::env::var("POLYMARKET_API_KEY").ok(),
            polymarket_api_secret: std::env::var("POLYMARKET_API_SECRET").ok(),
            polymarket_api_url: std::env::var("POLYMARKET_API_URL")
                .unwrap_or_else(|_| "https://clob.polymarket.com".to_string()),
            private_key: std::env::var("PRIVATE_KEY").ok(),

            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./gabagool.db".to_string()),
            dashboard_port: parse_env_int("DASHBOARD_PORT", 8000u16)?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),

            max_unhedged_delta: parse_env_decimal("MAX_UNHEDGED_DELTA", dec!(50))?,
            profit_margin: parse_env_decimal("PROFIT_MARGIN", dec!(0.02))?,
            settlement_buffer_seconds: parse_env_int("SETTLEMENT_BUFFER_SECONDS", 120i64)?,
            min_liquidity_multiplier: parse_env_decimal("MIN_LIQUIDITY_MULTIPLIER", dec!(3.0))?,
            max_position_size: parse_env_decimal("MAX_POSITION_SIZE", dec!(1000))?,
            bailout_stop_loss_percent: parse_env_decimal("BAILOUT_STOP_LOSS_PERCENT", dec!(2.0))?,
            trade_size: parse_env_decimal("TRADE_SIZE", dec!(10))?,
            scan_interval_ms: parse_env_int("SCAN_INTERVAL_MS", 100u64)?,
            target_roi: parse_env_decimal("TARGET_ROI", dec!(10.0))?,
        })
    }

    /// `1.00 - profit_margin`: the maximum pair cost at which an
    /// accumulator trade is still considered profitable.
    pub fn profit_target(&self) -> Decimal {
        dec!(1.00) - self.profit_margin
    }

    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scan_interval_ms)
    }

    /// Startup-time validation beyond "did it parse": positive-valued
    /// fields must actually be positive, matching the original's
    /// `validate_positive`/`validate_percentage` pydantic validators.
    pub fn validate(&self) -> Result<()> {
        if self.max_unhedged_delta <= Decimal::ZERO {
            anyhow::bail!("MAX_UNHEDGED_DELTA must be positive");
        }
        if self.max_position_size <= Decimal::ZERO {
            anyhow::bail!("MAX_POSITION_SIZE must be positive");
        }
        if self.trade_size <= Decimal::ZERO {
            anyhow::bail!("TRADE_SIZE must be positive");
        }
        if self.profit_margin <= Decimal::ZERO {
            anyhow::bail!("PROFIT_MARGIN must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profit_target_is_one_minus_margin() {
        let mut cfg = AppConfig::from_env().unwrap();
        cfg.profit_margin = dec!(0.03);
        assert_eq!(cfg.profit_target(), dec!(0.97));
    }

    #[test]
    fn validate_rejects_nonpositive_trade_size() {
        let mut cfg = AppConfig::from_env().unwrap();
        cfg.trade_size = dec!(0);
        assert!(cfg.validate().is_err());
    }
}
