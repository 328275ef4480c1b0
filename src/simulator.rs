//! Single-instrument price walk driven by a [`MovementBias`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bias::{BiasDelta, MovementBias};

/// Prices never fall below this.
pub const MIN_PRICE: f64 = 0.00001;

pub struct PriceSimulator<R: Rng = StdRng> {
    price: f64,
    bias: MovementBias,
    rng: R,
}

impl PriceSimulator<StdRng> {
    pub fn new(price: f64, bias: MovementBias) -> Self {
        Self::with_rng(price, bias, StdRng::from_entropy())
    }

    pub fn seeded(price: f64, bias: MovementBias, seed: u64) -> Self {
        Self::with_rng(price, bias, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> PriceSimulator<R> {
    pub fn with_rng(price: f64, bias: MovementBias, rng: R) -> Self {
        Self {
            price: floor_price(price),
            bias,
            rng,
        }
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn set_price(&mut self, price: f64) {
        self.price = floor_price(price);
    }

    /// Working copy of the bias, independent of any engine state.
    pub fn bias(&self) -> MovementBias {
        self.bias
    }

    pub fn update_bias(&mut self, partial: &BiasDelta) {
        self.bias.apply(partial);
    }

    /// Advance the price by one stochastic step and return it.
    pub fn step(&mut self) -> f64 {
        let eff = self.bias.effective();

        // uniform draw in [-1, 1], tilted by prospect
        let u: f64 = self.rng.gen_range(-1.0..=1.0);
        let base_movement = (u + eff.prospect * eff.prospect_volatility).clamp(-1.0, 1.0);
        let mut movement = base_movement * eff.volatility;

        let aligned = (movement > 0.0 && eff.prospect > 0.0) || (movement < 0.0 && eff.prospect < 0.0);
        if aligned {
            let h: f64 = self.rng.gen();
            if h < eff.hype {
                movement *= 2.0;
            }
        }

        movement *= self.price;
        self.price = floor_price(self.price + movement);
        self.price
    }
}

/// `max` rather than a comparison so NaN also lands on the floor.
fn floor_price(price: f64) -> f64 {
    price.max(MIN_PRICE)
}
