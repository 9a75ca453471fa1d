use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub resulting_pair_cost: Decimal,
    pub resulting_delta: Decimal,
    pub order_id: Option<String>,
    pub market_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub current_delta: Decimal,
    pub max_delta: Decimal,
    pub pair_cost: Decimal,
    pub locked_profit: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub time_to_settlement_seconds: i64,
    pub liquidity_depth_yes: Decimal,
    pub liquidity_depth_no: Decimal,
    pub risk_level: RiskLevel,
}
