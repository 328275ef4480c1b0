//! Drives one instrument: a modifier engine feeding a price simulator, on two
//! periodic triggers (price tick, effect injection).
//!
//! All mutable state lives in [`Simulation`], owned by the single task that
//! runs [`run`]. Telemetry leaves through a [`SinkWriter`] and never gates the
//! next tick.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use crate::bias::{BiasDelta, MovementBias};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::logging::{
    self, log_effect_activated, log_effect_rejected, log_effects_expired, log_price_recovered,
    log_price_step, log_session_summary, log_sink_failure, log_startup, v_str,
    ProfileScope, SessionSummary,
};
use crate::modifier::{Effect, EffectTemplate, ModifierEngine, Rejection};
use crate::simulator::PriceSimulator;
use crate::telemetry::writer::{Point, SinkWriter, WriterConfig, WriterStats};
use crate::telemetry::{price_fields, Tags, TelemetrySink, VALUE_COLUMN};

/// Wall clock driving live effects, in epoch milliseconds.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[derive(Debug, Clone)]
pub struct Injection {
    pub template: String,
    /// Catalog label of the template, e.g. "The market is booming!".
    pub label: String,
    pub outcome: Result<Effect, Rejection>,
    pub bias: MovementBias,
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub price: f64,
    pub bias: MovementBias,
    pub expired: Vec<Effect>,
}

pub struct Simulation {
    engine: ModifierEngine,
    simulator: PriceSimulator,
    catalog: Catalog,
    picker: StdRng,
    series: String,
    measurement: String,
    summary: SessionSummary,
}

impl Simulation {
    pub fn new(cfg: &Config, catalog: Catalog) -> Self {
        let seed = cfg.seed.unwrap_or_else(|| rand::thread_rng().gen());
        Self::seeded(cfg.bias, cfg.initial_price, catalog, seed)
            .with_series(&cfg.series_tag, &cfg.measurement)
    }

    /// Fully reproducible: the engine, the walk and the catalog picks each get
    /// their own stream derived from `seed`.
    pub fn seeded(base: MovementBias, price: f64, catalog: Catalog, seed: u64) -> Self {
        let mut master = StdRng::seed_from_u64(seed);
        let engine = ModifierEngine::with_seed(base, master.gen());
        let simulator = PriceSimulator::seeded(price, engine.bias(), master.gen());
        let picker = StdRng::seed_from_u64(master.gen());
        Self {
            summary: SessionSummary {
                last_price: simulator.price(),
                ..SessionSummary::default()
            },
            engine,
            simulator,
            catalog,
            picker,
            series: "BNN".to_string(),
            measurement: "stock".to_string(),
        }
    }

    pub fn with_series(mut self, series: &str, measurement: &str) -> Self {
        self.series = series.to_string();
        self.measurement = measurement.to_string();
        self
    }

    pub fn engine(&self) -> &ModifierEngine {
        &self.engine
    }

    pub fn simulator(&self) -> &PriceSimulator {
        &self.simulator
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn price(&self) -> f64 {
        self.simulator.price()
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Replace the starting price, e.g. with the last one a sink remembers.
    pub fn restore_price(&mut self, price: f64) {
        self.simulator.set_price(price);
        self.summary.last_price = self.simulator.price();
    }

    /// Injection trigger: draw a template from the catalog and try it.
    /// `None` when the catalog is empty.
    pub fn inject(&mut self, now: u64) -> Option<Injection> {
        let template = self.catalog.pick(&mut self.picker)?.clone();
        Some(self.activate(&template, now))
    }

    pub fn activate(&mut self, template: &EffectTemplate, now: u64) -> Injection {
        let outcome = self.engine.try_activate(template, now).cloned();
        let bias = self.engine.bias();
        self.simulator.update_bias(&BiasDelta::from(bias));

        match &outcome {
            Ok(effect) => {
                self.summary.injections_accepted += 1;
                log_effect_activated(effect, &bias);
            }
            Err(rejection) => {
                self.summary.injections_rejected += 1;
                log_effect_rejected(&template.name, &template.description, &rejection.to_string());
            }
        }

        Injection {
            template: template.name.clone(),
            label: template.description.clone(),
            outcome,
            bias,
        }
    }

    /// Price trigger: expire stale effects, push the fresh bias into the
    /// simulator, take one step.
    pub fn tick(&mut self, now: u64) -> TickOutcome {
        let expired = self.engine.expire(now);
        let bias = self.engine.bias();
        self.simulator.update_bias(&BiasDelta::from(bias));
        let price = self.simulator.step();

        self.summary.ticks += 1;
        self.summary.effects_expired += expired.len() as u64;
        self.summary.last_price = price;
        log_effects_expired(&expired, &bias);
        log_price_step(&self.series, price, &bias, self.engine.effects().len());

        TickOutcome {
            price,
            bias,
            expired,
        }
    }

    pub fn point(&self) -> Point {
        Point {
            series: self.series.clone(),
            measurement: self.measurement.clone(),
            fields: price_fields(self.simulator.price()),
            tags: Tags::new(),
        }
    }
}

/// Last stored price for the series, or `fallback` when the sink has none,
/// fails, or returns something that is not a positive number.
pub async fn recover_price(
    sink: &dyn TelemetrySink,
    series: &str,
    measurement: &str,
    fallback: f64,
) -> f64 {
    let query = sink.last_value_query(series, measurement, "price");
    if query.is_empty() {
        return fallback;
    }
    match sink.query(&query).await {
        Ok(rows) => {
            let recovered = rows
                .first()
                .and_then(|row| row.get(VALUE_COLUMN))
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|p| p.is_finite() && *p > 0.0);
            match recovered {
                Some(price) => {
                    log_price_recovered(series, price, sink.name());
                    price
                }
                None => {
                    log_price_recovered(series, fallback, "fallback");
                    fallback
                }
            }
        }
        Err(err) => {
            log_sink_failure("query", &err.to_string(), 1);
            log_price_recovered(series, fallback, "fallback");
            fallback
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: SessionSummary,
    pub writer: WriterStats,
}

/// Run both triggers until `shutdown` resolves. The first price tick fires
/// immediately; the first injection after one full interval.
///
/// Recovery reads the same series and measurement the simulation writes;
/// `cfg` only supplies timing and sink settings.
pub async fn run<F>(
    mut sim: Simulation,
    sink: Arc<dyn TelemetrySink>,
    cfg: &Config,
    shutdown: F,
) -> RunReport
where
    F: Future<Output = ()>,
{
    let started = Instant::now();
    if cfg.recover_price {
        let price = recover_price(sink.as_ref(), sim.series(), sim.measurement(), sim.price()).await;
        sim.restore_price(price);
    }
    log_startup(sim.series(), sim.price(), &sim.engine().bias(), sink.name());

    let writer = SinkWriter::spawn(sink, WriterConfig::from_config(cfg));

    let mut ticks = interval(cfg.tick_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut injections = interval_at(Instant::now() + cfg.effect_interval(), cfg.effect_interval());
    injections.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticks.tick() => {
                {
                    let _scope = ProfileScope::with_context("tick", &[("series", v_str(sim.series()))]);
                    sim.tick(now_ms());
                }
                writer.submit(sim.point());
            }
            _ = injections.tick() => {
                sim.inject(now_ms());
            }
        }
    }

    let stats = writer.shutdown().await;
    let summary = sim.summary().clone();
    log_session_summary(started.elapsed().as_secs(), &summary, stats.dropped);
    logging::log(
        logging::Level::Debug,
        logging::Domain::Telemetry,
        "writer_stats",
        logging::obj(&[
            ("written", json!(stats.written)),
            ("failed", json!(stats.failed)),
            ("dropped", json!(stats.dropped)),
        ]),
    );
    logging::flush();

    RunReport {
        summary,
        writer: stats,
    }
}
