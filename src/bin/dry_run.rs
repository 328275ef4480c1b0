use std::fs::File;
use std::io::{self, BufWriter, Write};

use serde_json::json;

use stocksim::catalog::Catalog;
use stocksim::config::Config;
use stocksim::modifier::HOUR_MS;
use stocksim::runner::{now_ms, Simulation};

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Offline session on a virtual clock: a warm-up walk, then rounds of one
/// injection followed by a run of hourly steps. One JSON object per line.
fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env();
    let seed = cfg.seed.unwrap_or(42);
    let warmup = env_u64("WARMUP_STEPS", 100);
    let rounds = env_u64("ROUNDS", 20);
    let steps = env_u64("STEPS_PER_ROUND", 20);
    let step_ms = env_u64("STEP_HOURS", 1) * HOUR_MS;

    let mut out: Box<dyn Write> = match std::env::var("OUT") {
        Ok(path) => Box::new(BufWriter::new(File::create(path)?)),
        Err(_) => Box::new(BufWriter::new(io::stdout())),
    };

    let mut sim = Simulation::seeded(cfg.bias, cfg.initial_price, Catalog::standard(), seed)
        .with_series(&cfg.series_tag, &cfg.measurement);
    let mut now = now_ms();

    for step in 0..warmup {
        let tick = sim.tick(now);
        writeln!(out, "{}", json!({"kind": "price", "step": step, "ts": now, "price": tick.price}))?;
    }

    let mut step = warmup;
    for round in 0..rounds {
        if let Some(injection) = sim.inject(now) {
            let outcome = match &injection.outcome {
                Ok(effect) => json!({"accepted": true, "description": effect.description}),
                Err(rejection) => json!({"accepted": false, "reason": rejection.to_string()}),
            };
            let active: Vec<&str> = sim.engine().effects().iter().map(|e| e.name.as_str()).collect();
            writeln!(
                out,
                "{}",
                json!({
                    "kind": "injection",
                    "round": round,
                    "ts": now,
                    "template": injection.template,
                    "label": injection.label,
                    "outcome": outcome,
                    "active": active,
                    "bias": injection.bias,
                })
            )?;
        }

        for _ in 0..steps {
            let tick = sim.tick(now);
            writeln!(out, "{}", json!({"kind": "price", "step": step, "ts": now, "price": tick.price}))?;
            for effect in &tick.expired {
                writeln!(out, "{}", json!({"kind": "expired", "ts": now, "name": effect.name}))?;
            }
            now += step_ms;
            step += 1;
        }
    }

    out.flush()?;
    let summary = sim.summary();
    eprintln!(
        "dry_run seed={} ticks={} accepted={} rejected={} expired={} last_price={:.4}",
        seed,
        summary.ticks,
        summary.injections_accepted,
        summary.injections_rejected,
        summary.effects_expired,
        summary.last_price
    );
    Ok(())
}
