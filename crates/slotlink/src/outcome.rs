//! Outcome engine.
//!
//! Draws an integer multiplier uniformly from `[MIN_MULTIPLIER, MAX_MULTIPLIER]`
//! (hundredths of the wager) and scales the wager by it, so every result lies
//! in `[-wager, 2 * wager]`. Results are rounded to the cent with ties going
//! toward positive infinity: `0.005` becomes `0.01`, `-0.005` becomes `0.00`.

use std::ops::RangeInclusive;

use tracing::debug;

use crate::amount::Amount;
use crate::error::{Result, SlotError};

pub const MIN_MULTIPLIER: i32 = -100;
pub const MAX_MULTIPLIER: i32 = 200;

/// Randomness consumed by the engine.
pub trait EntropySource: Send {
    /// A value drawn uniformly from `range`.
    fn multiplier(&mut self, range: RangeInclusive<i32>) -> i32;
}

impl EntropySource for fastrand::Rng {
    fn multiplier(&mut self, range: RangeInclusive<i32>) -> i32 {
        self.i32(range)
    }
}

#[derive(Debug)]
pub struct OutcomeEngine<E = fastrand::Rng> {
    entropy: E,
    item: Option<(i64, String)>,
}

impl OutcomeEngine<fastrand::Rng> {
    pub fn seeded(seed: u64) -> Self {
        Self::new(fastrand::Rng::with_seed(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(fastrand::Rng::new())
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }
}

impl<E: EntropySource> OutcomeEngine<E> {
    pub fn new(entropy: E) -> Self {
        Self {
            entropy,
            item: None,
        }
    }

    /// Ties subsequent outcomes to an item, for log context only.
    pub fn bind(&mut self, id: i64, name: impl Into<String>) {
        self.item = Some((id, name.into()));
    }

    pub fn compute_outcome(&mut self, wager: Amount) -> Result<Amount> {
        if !wager.is_positive() {
            return Err(SlotError::invalid_wager(format!(
                "wager must be greater than zero, got {wager}"
            )));
        }

        let multiplier = self
            .entropy
            .multiplier(MIN_MULTIPLIER..=MAX_MULTIPLIER)
            .clamp(MIN_MULTIPLIER, MAX_MULTIPLIER);
        let outcome = scale(wager, multiplier);

        debug!(
            item = ?self.item.as_ref().map(|(id, _)| *id),
            %wager,
            multiplier,
            %outcome,
            "outcome drawn"
        );
        Ok(outcome)
    }
}

/// `wager * multiplier / 100`, rounded half up to the cent.
pub fn scale(wager: Amount, multiplier: i32) -> Amount {
    let hundredths = i128::from(wager.cents()) * i128::from(multiplier);
    let cents = (hundredths + 50).div_euclid(100);
    Amount::from_cents(i64::try_from(cents).unwrap_or(if cents < 0 { i64::MIN } else { i64::MAX }))
}
