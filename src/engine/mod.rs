pub mod accumulator;
pub mod equalizer;
pub mod risk;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use accumulator::Accumulator;
pub use equalizer::Equalizer;
pub use risk::RiskEngine;

/// Cooperative run/stop flag shared between a component's background
/// task and its controller, polled once per loop iteration rather than
/// torn down via cancellation — matches the original's
/// `self.is_running` checks in each component's `start()` loop.
#[derive(Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// A candidate accumulator trade: buying `side` at `ask_price` would
/// bring the pair cost to `expected_pair_cost`, which the caller has
/// already established is below the profit target.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub side: crate::domain::Side,
    pub ask_price: rust_decimal::Decimal,
    pub expected_pair_cost: rust_decimal::Decimal,
}
