//! Modifier engine: time-limited effects layered over a base bias.
//!
//! The engine never mutates its base. Every call to [`ModifierEngine::bias`]
//! rebuilds the aggregate from the base and the currently active effects:
//!
//! 1. Absolute effects are summed per field; any field mentioned by at least
//!    one absolute effect has its baseline replaced by that sum.
//! 2. Every active effect (absolute ones included) then contributes per field:
//!    flat effects add their raw delta, percent and absolute effects add the
//!    delta as a signed fraction of the baseline from step 1.
//!
//! Absolute effects therefore count twice: once as the override and once as
//! a scaled contribution.

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::bias::{BiasDelta, BiasField, MovementBias};

pub const HOUR_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    Flat,
    Percent,
    Absolute,
}

impl EffectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectKind::Flat => "flat",
            EffectKind::Percent => "percent",
            EffectKind::Absolute => "absolute",
        }
    }
}

/// Produces the flavor text attached to an effect when it activates.
///
/// The rng is handed in by the engine so a seeded engine yields the same
/// descriptions run after run.
pub trait MessageGenerator: Send + Sync {
    fn generate(&self, rng: &mut dyn RngCore) -> String;
}

impl<F> MessageGenerator for F
where
    F: Fn(&mut dyn RngCore) -> String + Send + Sync,
{
    fn generate(&self, rng: &mut dyn RngCore) -> String {
        self(rng)
    }
}

/// Always returns the same text.
#[derive(Debug, Clone)]
pub struct FixedMessage(pub String);

impl MessageGenerator for FixedMessage {
    fn generate(&self, _rng: &mut dyn RngCore) -> String {
        self.0.clone()
    }
}

/// Catalog entry from which active effects are created.
#[derive(Clone)]
pub struct EffectTemplate {
    pub name: String,
    pub description: String,
    pub duration_hours: u64,
    pub kind: EffectKind,
    pub deltas: BiasDelta,
    pub stack_limit: usize,
    pub opposing: Vec<String>,
    pub message: Arc<dyn MessageGenerator>,
}

impl EffectTemplate {
    pub fn new(name: &str, kind: EffectKind, duration_hours: u64) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            duration_hours,
            kind,
            deltas: BiasDelta::new(),
            stack_limit: 1,
            opposing: Vec::new(),
            message: Arc::new(FixedMessage(name.to_string())),
        }
    }

    /// Catalog label, reported with every injection of this template. Also
    /// becomes the fixed message unless `message` is set afterwards.
    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self.message = Arc::new(FixedMessage(description.to_string()));
        self
    }

    pub fn delta(mut self, field: BiasField, value: f64) -> Self {
        self.deltas = self.deltas.with(field, value);
        self
    }

    pub fn stack_limit(mut self, limit: usize) -> Self {
        self.stack_limit = limit;
        self
    }

    pub fn opposes(mut self, name: &str) -> Self {
        self.opposing.push(name.to_string());
        self
    }

    pub fn message<G: MessageGenerator + 'static>(mut self, generator: G) -> Self {
        self.message = Arc::new(generator);
        self
    }
}

impl fmt::Debug for EffectTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectTemplate")
            .field("name", &self.name)
            .field("duration_hours", &self.duration_hours)
            .field("kind", &self.kind)
            .field("deltas", &self.deltas)
            .field("stack_limit", &self.stack_limit)
            .field("opposing", &self.opposing)
            .finish_non_exhaustive()
    }
}

/// An active effect. Created only by a successful activation and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Effect {
    pub name: String,
    pub description: String,
    pub activated_at: u64,
    /// Absolute epoch milliseconds; the effect is gone at `now >= expiry`.
    pub expiry: u64,
    pub kind: EffectKind,
    pub deltas: BiasDelta,
    pub stack_limit: usize,
    pub opposing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    StackLimit { name: String, limit: usize },
    Opposed { name: String, by: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::StackLimit { name, limit } => {
                write!(f, "{} already active {} time(s)", name, limit)
            }
            Rejection::Opposed { name, by } => write!(f, "{} blocked by active {}", name, by),
        }
    }
}

pub struct ModifierEngine {
    base: MovementBias,
    effects: Vec<Effect>,
    flavor_rng: StdRng,
}

impl ModifierEngine {
    pub fn new(base: MovementBias) -> Self {
        Self {
            base,
            effects: Vec::new(),
            flavor_rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(base: MovementBias, seed: u64) -> Self {
        Self {
            base,
            effects: Vec::new(),
            flavor_rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn base(&self) -> MovementBias {
        self.base
    }

    /// Active effects in activation order.
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn active_count(&self, name: &str) -> usize {
        self.effects.iter().filter(|e| e.name == name).count()
    }

    /// Aggregate bias from the base and every active effect.
    pub fn bias(&self) -> MovementBias {
        let mut overrides = BiasDelta::new();
        for effect in self.effects.iter().filter(|e| e.kind == EffectKind::Absolute) {
            for field in BiasField::ALL {
                if let Some(value) = effect.deltas.get(field) {
                    let total = overrides.get(field).unwrap_or(0.0) + value;
                    overrides = overrides.with(field, total);
                }
            }
        }
        let mut baseline = self.base;
        baseline.apply(&overrides);

        let mut bias = baseline;
        for effect in &self.effects {
            for field in BiasField::ALL {
                let delta = effect.deltas.get(field).unwrap_or(0.0);
                let contribution = match effect.kind {
                    EffectKind::Flat => delta,
                    EffectKind::Percent | EffectKind::Absolute => {
                        scaled_contribution(delta, baseline.get(field))
                    }
                };
                bias.set(field, bias.get(field) + contribution);
            }
        }
        bias
    }

    /// Stack and opposition checks, then activation. A rejection leaves the
    /// engine untouched.
    pub fn try_activate(&mut self, template: &EffectTemplate, now: u64) -> Result<&Effect, Rejection> {
        if self.active_count(&template.name) >= template.stack_limit {
            return Err(Rejection::StackLimit {
                name: template.name.clone(),
                limit: template.stack_limit,
            });
        }
        if let Some(active) = self
            .effects
            .iter()
            .find(|e| template.opposing.iter().any(|o| *o == e.name))
        {
            return Err(Rejection::Opposed {
                name: template.name.clone(),
                by: active.name.clone(),
            });
        }

        let description = template.message.generate(&mut self.flavor_rng);
        let expiry = now.saturating_add(template.duration_hours.saturating_mul(HOUR_MS));
        self.effects.push(Effect {
            name: template.name.clone(),
            description,
            activated_at: now,
            expiry,
            kind: template.kind,
            deltas: template.deltas,
            stack_limit: template.stack_limit,
            opposing: template.opposing.clone(),
        });
        let idx = self.effects.len() - 1;
        Ok(&self.effects[idx])
    }

    /// Activate `template` at `now` and return the resulting bias. A rejected
    /// activation returns the unchanged bias.
    pub fn add_effect(&mut self, template: &EffectTemplate, now: u64) -> MovementBias {
        let _ = self.try_activate(template, now);
        self.bias()
    }

    /// Remove every effect with `expiry <= now`, returning the removed ones.
    pub fn expire(&mut self, now: u64) -> Vec<Effect> {
        let (expired, active): (Vec<Effect>, Vec<Effect>) = std::mem::take(&mut self.effects)
            .into_iter()
            .partition(|e| e.expiry <= now);
        self.effects = active;
        expired
    }

    pub fn tick(&mut self, now: u64) -> MovementBias {
        self.expire(now);
        self.bias()
    }
}

/// Delta read as a signed fraction of `baseline`. A zero or missing delta
/// contributes nothing.
fn scaled_contribution(delta: f64, baseline: f64) -> f64 {
    let direction = if delta > 0.0 { 1.0 } else { -1.0 };
    direction * baseline * delta.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: u64 = 1_700_000_000_000;

    fn base() -> MovementBias {
        MovementBias::new(0.01, 0.1, 0.5, 0.3)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn no_effects_returns_base() {
        let engine = ModifierEngine::with_seed(base(), 1);
        assert_eq!(engine.bias(), base());
    }

    #[test]
    fn flat_adds_raw_delta() {
        let mut engine = ModifierEngine::with_seed(base(), 1);
        let boom = EffectTemplate::new("Boom", EffectKind::Flat, 24)
            .delta(BiasField::Prospect, 0.2)
            .delta(BiasField::Hype, -0.1);
        let bias = engine.add_effect(&boom, T0);
        assert!(close(bias.prospect, 0.1 + 0.2));
        assert!(close(bias.hype, 0.3 - 0.1));
        assert_eq!(bias.volatility, 0.01);
        assert_eq!(bias.prospect_volatility, 0.5);
    }

    #[test]
    fn percent_scales_baseline() {
        let mut engine = ModifierEngine::with_seed(base(), 1);
        let ceo = EffectTemplate::new("CEO", EffectKind::Percent, 24)
            .delta(BiasField::Volatility, 0.5)
            .delta(BiasField::Prospect, -0.5);
        let bias = engine.add_effect(&ceo, T0);
        assert!(close(bias.volatility, 0.015));
        assert!(close(bias.prospect, 0.05));
        assert_eq!(bias.hype, 0.3);
    }

    #[test]
    fn absolute_overrides_then_contributes() {
        let crash = EffectTemplate::new("Crash", EffectKind::Absolute, 24)
            .delta(BiasField::Prospect, -0.5);
        let mut a = ModifierEngine::with_seed(base(), 1);
        let mut b = ModifierEngine::with_seed(MovementBias::new(0.01, 0.9, 0.5, 0.3), 1);
        let bias_a = a.add_effect(&crash, T0);
        let bias_b = b.add_effect(&crash, T0);

        // override to -0.5, then -0.5 scaled by its own magnitude: -0.5 + 0.25
        assert!(close(bias_a.prospect, -0.25));
        // base prospect has no influence once overridden
        assert_eq!(bias_a.prospect, bias_b.prospect);
        // untouched fields stay at base
        assert_eq!(bias_a.volatility, 0.01);
        assert_eq!(bias_a.hype, 0.3);
    }

    #[test]
    fn absolute_effects_sum_before_override() {
        let mut engine = ModifierEngine::with_seed(base(), 1);
        let a = EffectTemplate::new("A", EffectKind::Absolute, 24).delta(BiasField::Prospect, -0.5);
        let b = EffectTemplate::new("B", EffectKind::Absolute, 24).delta(BiasField::Prospect, 0.2);
        engine.add_effect(&a, T0);
        let bias = engine.add_effect(&b, T0);
        // baseline -0.3; contributions +0.15 and -0.06
        assert!(close(bias.prospect, -0.3 + 0.15 - 0.06));
    }

    #[test]
    fn absolute_baseline_feeds_percent_effects() {
        let mut engine = ModifierEngine::with_seed(base(), 1);
        let abs = EffectTemplate::new("Abs", EffectKind::Absolute, 24).delta(BiasField::Hype, 0.8);
        let pct = EffectTemplate::new("Pct", EffectKind::Percent, 24).delta(BiasField::Hype, 0.5);
        engine.add_effect(&abs, T0);
        let bias = engine.add_effect(&pct, T0);
        assert!(close(bias.hype, 0.8 + 0.8 * 0.8 + 0.8 * 0.5));
    }

    #[test]
    fn bias_is_idempotent_and_base_untouched() {
        let mut engine = ModifierEngine::with_seed(base(), 1);
        engine.add_effect(
            &EffectTemplate::new("P", EffectKind::Percent, 24).delta(BiasField::Prospect, 0.15),
            T0,
        );
        let first = engine.bias();
        let second = engine.bias();
        assert_eq!(first.prospect.to_bits(), second.prospect.to_bits());
        assert_eq!(first, second);
        assert_eq!(engine.base(), base());
    }

    #[test]
    fn stack_limit_rejects_without_eviction() {
        let mut engine = ModifierEngine::with_seed(base(), 1);
        let project = EffectTemplate::new("Project", EffectKind::Percent, 24)
            .delta(BiasField::Prospect, 0.15)
            .stack_limit(2);
        engine.add_effect(&project, T0);
        engine.add_effect(&project, T0 + 1);
        let before = engine.bias();
        let err = engine.try_activate(&project, T0 + 2).unwrap_err();
        assert_eq!(
            err,
            Rejection::StackLimit {
                name: "Project".into(),
                limit: 2
            }
        );
        assert_eq!(engine.active_count("Project"), 2);
        assert_eq!(engine.effects()[0].activated_at, T0);
        assert_eq!(engine.bias(), before);
    }

    #[test]
    fn zero_stack_limit_never_activates() {
        let mut engine = ModifierEngine::with_seed(base(), 1);
        let never = EffectTemplate::new("Never", EffectKind::Flat, 1).stack_limit(0);
        assert!(engine.try_activate(&never, T0).is_err());
        assert!(engine.effects().is_empty());
    }

    #[test]
    fn opposition_blocks_activation() {
        let mut engine = ModifierEngine::with_seed(base(), 1);
        let crash = EffectTemplate::new("Crash", EffectKind::Absolute, 240)
            .delta(BiasField::Prospect, -0.5)
            .opposes("Boom");
        let boom = EffectTemplate::new("Boom", EffectKind::Flat, 120)
            .delta(BiasField::Prospect, 0.2)
            .opposes("Crash");
        let after_crash = engine.add_effect(&crash, T0);
        let returned = engine.add_effect(&boom, T0);
        assert_eq!(returned, after_crash);
        assert_eq!(engine.active_count("Boom"), 0);
        assert_eq!(
            engine.try_activate(&boom, T0).unwrap_err(),
            Rejection::Opposed {
                name: "Boom".into(),
                by: "Crash".into()
            }
        );
    }

    #[test]
    fn expiry_is_fixed_at_activation() {
        let mut engine = ModifierEngine::with_seed(base(), 1);
        let x = EffectTemplate::new("X", EffectKind::Flat, 24).delta(BiasField::Prospect, 0.2);
        let effect = engine.try_activate(&x, T0).unwrap().clone();
        assert_eq!(effect.expiry, T0 + 24 * 3_600_000);

        engine.tick(T0 + 24 * HOUR_MS - 1);
        assert_eq!(engine.effects().len(), 1);
        assert_eq!(engine.effects()[0].expiry, effect.expiry);

        let bias = engine.tick(T0 + 24 * HOUR_MS);
        assert!(engine.effects().is_empty());
        assert_eq!(bias, base());
    }

    #[test]
    fn simultaneous_expiry_removes_all_adjacent() {
        let mut engine = ModifierEngine::with_seed(base(), 1);
        let short = EffectTemplate::new("Short", EffectKind::Flat, 1)
            .delta(BiasField::Hype, 0.1)
            .stack_limit(3);
        let long = EffectTemplate::new("Long", EffectKind::Flat, 48).delta(BiasField::Hype, 0.1);
        engine.add_effect(&short, T0);
        engine.add_effect(&short, T0);
        engine.add_effect(&long, T0);
        engine.add_effect(&short, T0);

        let expired = engine.expire(T0 + HOUR_MS);
        assert_eq!(expired.len(), 3);
        assert_eq!(engine.effects().len(), 1);
        assert_eq!(engine.effects()[0].name, "Long");
    }

    #[test]
    fn describe_is_label_and_default_message() {
        let plain = EffectTemplate::new("Plain", EffectKind::Flat, 1).describe("Nothing happened.");
        let flavored = plain.clone().message(FixedMessage("Something happened!".into()));
        assert_eq!(flavored.description, "Nothing happened.");

        let mut engine = ModifierEngine::with_seed(base(), 1);
        engine.add_effect(&plain, T0);
        engine.add_effect(&flavored.stack_limit(2), T0);
        assert_eq!(engine.effects()[0].description, "Nothing happened.");
        assert_eq!(engine.effects()[1].description, "Something happened!");
    }

    #[test]
    fn message_generated_once_per_activation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let tmpl = EffectTemplate::new("Count", EffectKind::Flat, 1)
            .stack_limit(1)
            .message(move |_rng: &mut dyn RngCore| {
                counter.fetch_add(1, Ordering::SeqCst);
                "counted".to_string()
            });
        let mut engine = ModifierEngine::with_seed(base(), 1);
        engine.add_effect(&tmpl, T0);
        engine.add_effect(&tmpl, T0); // rejected, no message
        engine.bias();
        engine.tick(T0 + 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.effects()[0].description, "counted");
    }

    #[test]
    fn seeded_engines_generate_identical_descriptions() {
        use rand::Rng;
        let tmpl = EffectTemplate::new("Roll", EffectKind::Flat, 1)
            .stack_limit(10)
            .message(|rng: &mut dyn RngCore| format!("roll {}", rng.gen_range(0..1_000_000)));
        let mut a = ModifierEngine::with_seed(base(), 99);
        let mut b = ModifierEngine::with_seed(base(), 99);
        for i in 0..5 {
            a.add_effect(&tmpl, T0 + i);
            b.add_effect(&tmpl, T0 + i);
        }
        let da: Vec<_> = a.effects().iter().map(|e| e.description.clone()).collect();
        let db: Vec<_> = b.effects().iter().map(|e| e.description.clone()).collect();
        assert_eq!(da, db);
    }

    #[test]
    fn zero_delta_contributes_nothing() {
        assert_eq!(scaled_contribution(0.0, 0.4) + 0.4, 0.4);
        assert!(close(scaled_contribution(-0.5, 0.4), -0.2));
        assert!(close(scaled_contribution(0.5, -0.4), -0.2));
    }
}
