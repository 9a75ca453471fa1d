use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub market_id: String,
    pub condition_id: String,
    pub token_id_yes: String,
    pub token_id_no: String,
    pub question: String,
    pub description: String,
    pub strike_price: Option<Decimal>,
    pub expiration: DateTime<Utc>,
    pub active: bool,
    pub closed: bool,
    pub min_tick_size: Decimal,
    pub min_size: Decimal,
}

impl Market {
    /// Never negative: an already-expired market reports zero remaining
    /// time rather than a negative duration.
    pub fn time_to_expiration(&self) -> chrono::Duration {
        (self.expiration - Utc::now()).max(chrono::Duration::zero())
    }

    /// True once fewer than `buffer_seconds` remain before expiration.
    pub fn is_within_settlement_buffer(&self, buffer_seconds: i64) -> bool {
        self.time_to_expiration().num_seconds() <= buffer_seconds
    }

    pub fn minutes_to_expiration(&self) -> f64 {
        self.time_to_expiration().num_seconds() as f64 / 60.0
    }
}

impl Default for Market {
    fn default() -> Self {
        Self {
            market_id: String::new(),
            condition_id: String::new(),
            token_id_yes: String::new(),
            token_id_no: String::new(),
            question: String::new(),
            description: String::new(),
            strike_price: None,
            expiration: Utc::now(),
            active: false,
            closed: false,
            min_tick_size: dec!(0.01),
            min_size: dec!(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn settlement_buffer_trips_near_expiration() {
        let mut m = Market {
            expiration: Utc::now() + Duration::seconds(60),
            ..Market::default()
        };
        assert!(m.is_within_settlement_buffer(120));
        m.expiration = Utc::now() + Duration::seconds(600);
        assert!(!m.is_within_settlement_buffer(120));
    }

    #[test]
    fn expired_market_reports_zero_time_to_expiration() {
        let m = Market {
            expiration: Utc::now() - Duration::minutes(5),
            ..Market::default()
        };
        assert_eq!(m.time_to_expiration(), Duration::zero());
        assert!(m.is_within_settlement_buffer(120));
    }
}
