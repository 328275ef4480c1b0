//! Movement bias: the four parameters that steer the price walk.
//!
//! Values are stored unclamped. Bounds are applied only where the
//! simulator consumes them (see [`MovementBias::effective`]).

use serde::{Deserialize, Serialize};

pub const MIN_VOLATILITY: f64 = 0.00001;
pub const MAX_VOLATILITY: f64 = 1.0;
pub const MIN_PROSPECT_VOLATILITY: f64 = 0.00001;
pub const MAX_PROSPECT_VOLATILITY: f64 = 1.0;
pub const MIN_HYPE: f64 = 0.0;
pub const MAX_HYPE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasField {
    Volatility,
    Prospect,
    ProspectVolatility,
    Hype,
}

impl BiasField {
    pub const ALL: [BiasField; 4] = [
        BiasField::Volatility,
        BiasField::Prospect,
        BiasField::ProspectVolatility,
        BiasField::Hype,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BiasField::Volatility => "volatility",
            BiasField::Prospect => "prospect",
            BiasField::ProspectVolatility => "prospect_volatility",
            BiasField::Hype => "hype",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MovementBias {
    /// Size of a step relative to the current price (0.01 = 1%).
    pub volatility: f64,
    /// Signed tilt of the step direction.
    pub prospect: f64,
    /// How strongly prospect tilts the draw.
    pub prospect_volatility: f64,
    /// Chance that a step aligned with prospect is doubled.
    pub hype: f64,
}

impl MovementBias {
    pub fn new(volatility: f64, prospect: f64, prospect_volatility: f64, hype: f64) -> Self {
        Self {
            volatility,
            prospect,
            prospect_volatility,
            hype,
        }
    }

    pub fn get(&self, field: BiasField) -> f64 {
        match field {
            BiasField::Volatility => self.volatility,
            BiasField::Prospect => self.prospect,
            BiasField::ProspectVolatility => self.prospect_volatility,
            BiasField::Hype => self.hype,
        }
    }

    pub fn set(&mut self, field: BiasField, value: f64) {
        match field {
            BiasField::Volatility => self.volatility = value,
            BiasField::Prospect => self.prospect = value,
            BiasField::ProspectVolatility => self.prospect_volatility = value,
            BiasField::Hype => self.hype = value,
        }
    }

    /// Field-level merge: present fields overwrite, absent fields are kept.
    pub fn apply(&mut self, delta: &BiasDelta) {
        for field in BiasField::ALL {
            if let Some(value) = delta.get(field) {
                self.set(field, value);
            }
        }
    }

    /// Bounded view used at the point of use. Prospect is never clamped.
    pub fn effective(&self) -> MovementBias {
        MovementBias {
            volatility: clamp(self.volatility, MIN_VOLATILITY, MAX_VOLATILITY),
            prospect: self.prospect,
            prospect_volatility: clamp(
                self.prospect_volatility,
                MIN_PROSPECT_VOLATILITY,
                MAX_PROSPECT_VOLATILITY,
            ),
            hype: clamp(self.hype, MIN_HYPE, MAX_HYPE),
        }
    }
}

impl From<MovementBias> for BiasDelta {
    fn from(bias: MovementBias) -> Self {
        BiasDelta {
            volatility: Some(bias.volatility),
            prospect: Some(bias.prospect),
            prospect_volatility: Some(bias.prospect_volatility),
            hype: Some(bias.hype),
        }
    }
}

/// Optional per-field adjustment. `None` means "not mentioned", which is
/// distinct from an explicit zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BiasDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prospect: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prospect_volatility: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hype: Option<f64>,
}

impl BiasDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: BiasField, value: f64) -> Self {
        match field {
            BiasField::Volatility => self.volatility = Some(value),
            BiasField::Prospect => self.prospect = Some(value),
            BiasField::ProspectVolatility => self.prospect_volatility = Some(value),
            BiasField::Hype => self.hype = Some(value),
        }
        self
    }

    pub fn get(&self, field: BiasField) -> Option<f64> {
        match field {
            BiasField::Volatility => self.volatility,
            BiasField::Prospect => self.prospect,
            BiasField::ProspectVolatility => self.prospect_volatility,
            BiasField::Hype => self.hype,
        }
    }

    pub fn is_empty(&self) -> bool {
        BiasField::ALL.iter().all(|f| self.get(*f).is_none())
    }
}

/// `f64::clamp` that maps NaN to the lower bound instead of propagating it.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_only_overwrites_present_fields() {
        let mut bias = MovementBias::new(0.01, 0.1, 0.5, 0.3);
        bias.apply(&BiasDelta::new().with(BiasField::Prospect, -0.4));
        assert_eq!(bias, MovementBias::new(0.01, -0.4, 0.5, 0.3));
    }

    #[test]
    fn explicit_zero_is_not_absent() {
        let mut bias = MovementBias::new(0.01, 0.1, 0.5, 0.3);
        bias.apply(&BiasDelta::new().with(BiasField::Hype, 0.0));
        assert_eq!(bias.hype, 0.0);
        assert_eq!(bias.volatility, 0.01);
    }

    #[test]
    fn effective_clamps_everything_but_prospect() {
        let raw = MovementBias::new(5.0, -3.0, -1.0, 1.5);
        let eff = raw.effective();
        assert_eq!(eff.volatility, MAX_VOLATILITY);
        assert_eq!(eff.prospect, -3.0);
        assert_eq!(eff.prospect_volatility, MIN_PROSPECT_VOLATILITY);
        assert_eq!(eff.hype, MAX_HYPE);
        // stored value untouched
        assert_eq!(raw.volatility, 5.0);
    }

    #[test]
    fn clamp_maps_nan_to_lower_bound() {
        assert_eq!(clamp(f64::NAN, 0.0, 1.0), 0.0);
        assert_eq!(clamp(0.5, 0.0, 1.0), 0.5);
    }

    #[test]
    fn empty_delta() {
        assert!(BiasDelta::new().is_empty());
        assert!(!BiasDelta::new().with(BiasField::Hype, 0.0).is_empty());
        assert!(!BiasDelta::from(MovementBias::default()).is_empty());
    }
}
