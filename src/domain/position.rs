use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Ok(Side::Yes),
            "NO" => Ok(Side::No),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// A paired YES/NO position in a single binary market.
///
/// `qty_*`/`cost_*` are the primaries; every other field is derived and
/// recomputed whenever a primary changes, never mutated directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub qty_yes: Decimal,
    pub cost_yes: Decimal,
    pub avg_yes: Decimal,
    pub qty_no: Decimal,
    pub cost_no: Decimal,
    pub avg_no: Decimal,
    pub pair_cost: Decimal,
    pub locked_profit: Decimal,
    pub delta: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl Default for Position {
    fn default() -> Self {
        Self::from_primaries(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
    }
}

impl Position {
    /// Builds a position, recomputing every derived field from the four
    /// primaries. Mirrors the pydantic `Position` model's `always=True`
    /// validators: derived fields are never trusted from storage, only
    /// the primaries are.
    pub fn from_primaries(
        qty_yes: Decimal,
        cost_yes: Decimal,
        qty_no: Decimal,
        cost_no: Decimal,
    ) -> Self {
        let avg_yes = if qty_yes > Decimal::ZERO {
            cost_yes / qty_yes
        } else {
            Decimal::ZERO
        };
        let avg_no = if qty_no > Decimal::ZERO {
            cost_no / qty_no
        } else {
            Decimal::ZERO
        };
        let pair_cost = avg_yes + avg_no;
        let paired_qty = qty_yes.min(qty_no);
        let locked_profit = paired_qty * (dec!(1.00) - pair_cost).max(Decimal::ZERO);
        let delta = qty_yes - qty_no;

        Self {
            qty_yes,
            cost_yes,
            avg_yes,
            qty_no,
            cost_no,
            avg_no,
            pair_cost,
            locked_profit,
            delta,
            last_updated: Utc::now(),
        }
    }

    /// Applies a fill on `side` of `qty_delta` shares at total cost
    /// `cost_delta`, returning a freshly recomputed position. Pure: does
    /// not touch storage.
    pub fn apply(&self, side: Side, qty_delta: Decimal, cost_delta: Decimal) -> Position {
        match side {
            Side::Yes => Position::from_primaries(
                self.qty_yes + qty_delta,
                self.cost_yes + cost_delta,
                self.qty_no,
                self.cost_no,
            ),
            Side::No => Position::from_primaries(
                self.qty_yes,
                self.cost_yes,
                self.qty_no + qty_delta,
                self.cost_no + cost_delta,
            ),
        }
    }

    pub fn paired_qty(&self) -> Decimal {
        self.qty_yes.min(self.qty_no)
    }

    pub fn avg_for(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.avg_yes,
            Side::No => self.avg_no,
        }
    }

    pub fn qty_for(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.qty_yes,
            Side::No => self.qty_no,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_position_is_all_zero() {
        let p = Position::default();
        assert_eq!(p.pair_cost, Decimal::ZERO);
        assert_eq!(p.delta, Decimal::ZERO);
        assert_eq!(p.locked_profit, Decimal::ZERO);
    }

    #[test]
    fn apply_recomputes_averages_and_pair_cost() {
        let p = Position::default();
        let p = p.apply(Side::Yes, dec!(10), dec!(4.50));
        assert_eq!(p.qty_yes, dec!(10));
        assert_eq!(p.avg_yes, dec!(0.45));
        assert_eq!(p.delta, dec!(10));

        let p = p.apply(Side::No, dec!(10), dec!(5.00));
        assert_eq!(p.avg_no, dec!(0.50));
        assert_eq!(p.pair_cost, dec!(0.95));
        assert_eq!(p.delta, dec!(0));
        assert_eq!(p.paired_qty(), dec!(10));
        assert_eq!(p.locked_profit, dec!(0.50));
    }

    #[test]
    fn unpaired_quantity_does_not_lock_profit() {
        let p = Position::default().apply(Side::Yes, dec!(5), dec!(2.00));
        assert_eq!(p.paired_qty(), Decimal::ZERO);
        assert_eq!(p.locked_profit, Decimal::ZERO);
    }

    #[test]
    fn locked_profit_clamps_to_zero_when_pair_cost_exceeds_one() {
        let p = Position::default().apply(Side::Yes, dec!(10), dec!(6.00));
        let p = p.apply(Side::No, dec!(10), dec!(6.00));
        assert_eq!(p.pair_cost, dec!(1.20));
        assert_eq!(p.locked_profit, Decimal::ZERO);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn applying_a_sequence_of_buys_conserves_the_closed_form(
            fills in prop::collection::vec((any::<bool>(), 1u32..500, 1u32..200), 0..50),
        ) {
            let mut position = Position::default();
            let mut qty_yes = Decimal::ZERO;
            let mut cost_yes = Decimal::ZERO;
            let mut qty_no = Decimal::ZERO;
            let mut cost_no = Decimal::ZERO;

            for (is_yes, qty, price_cents) in fills {
                let side = if is_yes { Side::Yes } else { Side::No };
                let qty = Decimal::from(qty);
                let price = Decimal::new(price_cents as i64, 2);
                let cost = price * qty;
                position = position.apply(side, qty, cost);
                match side {
                    Side::Yes => {
                        qty_yes += qty;
                        cost_yes += cost;
                    }
                    Side::No => {
                        qty_no += qty;
                        cost_no += cost;
                    }
                }
            }

            prop_assert_eq!(position.qty_yes, qty_yes);
            prop_assert_eq!(position.qty_no, qty_no);
            prop_assert_eq!(position.cost_yes, cost_yes);
            prop_assert_eq!(position.cost_no, cost_no);

            let expected_avg_yes = if qty_yes > Decimal::ZERO { cost_yes / qty_yes } else { Decimal::ZERO };
            let expected_avg_no = if qty_no > Decimal::ZERO { cost_no / qty_no } else { Decimal::ZERO };
            prop_assert_eq!(position.avg_yes, expected_avg_yes);
            prop_assert_eq!(position.avg_no, expected_avg_no);
            prop_assert_eq!(position.pair_cost, expected_avg_yes + expected_avg_no);
            prop_assert_eq!(position.delta, qty_yes - qty_no);

            let expected_locked = qty_yes.min(qty_no) * (Decimal::ONE - position.pair_cost).max(Decimal::ZERO);
            prop_assert_eq!(position.locked_profit, expected_locked);
        }
    }
}
