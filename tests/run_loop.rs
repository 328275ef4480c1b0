//! The live loop under paused tokio time: trigger cadence, sink delivery and
//! price recovery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use stocksim::catalog::Catalog;
use stocksim::config::Config;
use stocksim::runner::{recover_price, run, Simulation};
use stocksim::telemetry::sqlite::SqliteSink;
use stocksim::telemetry::{price_fields, Fields, Row, Tags, TelemetrySink, VALUE_COLUMN};

fn config() -> Config {
    Config {
        tick_ms: 1000,
        effect_interval_secs: 3,
        seed: Some(9),
        ..Config::default()
    }
}

#[derive(Default)]
struct Recording {
    points: Mutex<Vec<(String, f64)>>,
}

#[async_trait]
impl TelemetrySink for Recording {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn write(&self, series: &str, _m: &str, fields: &Fields, _t: &Tags) -> Result<()> {
        self.points.lock().unwrap().push((series.to_string(), fields["price"]));
        Ok(())
    }

    async fn query(&self, _q: &str) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    fn last_value_query(&self, _s: &str, _m: &str, _f: &str) -> String {
        "last".to_string()
    }
}

#[derive(Default)]
struct Broken {
    writes: AtomicU64,
}

#[async_trait]
impl TelemetrySink for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn write(&self, _s: &str, _m: &str, _f: &Fields, _t: &Tags) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("connection refused"))
    }

    async fn query(&self, _q: &str) -> Result<Vec<Row>> {
        Err(anyhow!("connection refused"))
    }

    fn last_value_query(&self, _s: &str, _m: &str, _f: &str) -> String {
        "last".to_string()
    }
}

#[tokio::test(start_paused = true)]
async fn ticks_and_injections_follow_their_intervals() {
    let cfg = config();
    let sink = Arc::new(Recording::default());
    let sim = Simulation::new(&cfg, Catalog::standard());

    let report = run(sim, sink.clone(), &cfg, tokio::time::sleep(Duration::from_millis(10_500))).await;

    // first tick at t=0, then every second up to t=10s
    assert_eq!(report.summary.ticks, 11);
    // first injection after one interval: t=3s, 6s, 9s
    assert_eq!(report.summary.injections_accepted + report.summary.injections_rejected, 3);
    assert_eq!(report.writer.written, 11);

    let points = sink.points.lock().unwrap();
    assert_eq!(points.len(), 11);
    assert!(points.iter().all(|(series, price)| series == "BNN" && *price > 0.0));
    assert_eq!(points.last().unwrap().1, report.summary.last_price);
}

#[tokio::test(start_paused = true)]
async fn failing_sink_never_stops_the_loop() {
    let cfg = Config {
        sink_failure_threshold: 2,
        ..config()
    };
    let sink = Arc::new(Broken::default());
    let sim = Simulation::new(&cfg, Catalog::standard());

    let report = run(sim, sink.clone(), &cfg, tokio::time::sleep(Duration::from_millis(10_500))).await;

    assert_eq!(report.summary.ticks, 11);
    // query failed, so the configured price was kept as the start
    assert!(report.summary.last_price > 0.0);
    assert_eq!(report.writer.written, 0);
    assert_eq!(report.writer.failed + report.writer.dropped, 11);
    assert!(report.writer.dropped > 0, "open circuit should shed points");
}

#[tokio::test(start_paused = true)]
async fn restart_continues_from_stored_price() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prices.sqlite");
    let sink = Arc::new(SqliteSink::open(path.to_str().unwrap()).unwrap());
    sink.write("BNN", "stock", &price_fields(321.0), &Tags::new()).await.unwrap();

    let cfg = config();
    let sim = Simulation::new(&cfg, Catalog::standard());
    let report = run(sim, sink.clone(), &cfg, tokio::time::sleep(Duration::from_millis(500))).await;

    assert_eq!(report.summary.ticks, 1);
    // one step of at most 2x volatility away from the recovered price
    let drift = (report.summary.last_price / 321.0 - 1.0).abs();
    assert!(drift <= 2.0 * cfg.bias.volatility + 1e-12, "drift {}", drift);

    let stored = recover_price(sink.as_ref(), "BNN", "stock", 100.0).await;
    assert_eq!(stored, report.summary.last_price);

    let rows = sink
        .query("SELECT value AS _value FROM points ORDER BY rowid")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][VALUE_COLUMN], "321");
}

#[tokio::test]
async fn recovery_ignores_garbage() {
    struct Garbage;

    #[async_trait]
    impl TelemetrySink for Garbage {
        fn name(&self) -> &'static str {
            "garbage"
        }

        async fn write(&self, _s: &str, _m: &str, _f: &Fields, _t: &Tags) -> Result<()> {
            Ok(())
        }

        async fn query(&self, _q: &str) -> Result<Vec<Row>> {
            let mut row = Row::new();
            row.insert(VALUE_COLUMN.to_string(), "-3".to_string());
            Ok(vec![row])
        }

        fn last_value_query(&self, _s: &str, _m: &str, _f: &str) -> String {
            "last".to_string()
        }
    }

    assert_eq!(recover_price(&Garbage, "BNN", "stock", 55.0).await, 55.0);
    assert_eq!(recover_price(&Broken::default(), "BNN", "stock", 55.0).await, 55.0);
}

#[tokio::test(start_paused = true)]
async fn recovery_reads_the_series_being_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prices.sqlite");
    let sink = Arc::new(SqliteSink::open(path.to_str().unwrap()).unwrap());
    sink.write("ACME", "stock", &price_fields(321.0), &Tags::new()).await.unwrap();

    // config names a different series than the simulation
    let cfg = Config {
        series_tag: "OTHER".to_string(),
        ..config()
    };
    let sim = Simulation::seeded(cfg.bias, 100.0, Catalog::standard(), 3).with_series("ACME", "stock");
    let report = run(sim, sink.clone(), &cfg, tokio::time::sleep(Duration::from_millis(500))).await;

    let drift = (report.summary.last_price / 321.0 - 1.0).abs();
    assert!(drift <= 2.0 * cfg.bias.volatility + 1e-12, "drift {}", drift);
    assert_eq!(recover_price(sink.as_ref(), "ACME", "stock", 1.0).await, report.summary.last_price);
    assert_eq!(recover_price(sink.as_ref(), "OTHER", "stock", 1.0).await, 1.0);
    assert_eq!(recover_price(sink.as_ref(), "BNN", "stock", 1.0).await, 1.0);
}
