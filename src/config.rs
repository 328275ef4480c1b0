use std::time::Duration;

use crate::bias::MovementBias;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkKind {
    Influx,
    Sqlite,
    None,
}

impl SinkKind {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "influx" | "influxdb" => SinkKind::Influx,
            "sqlite" => SinkKind::Sqlite,
            _ => SinkKind::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Influx => "influx",
            SinkKind::Sqlite => "sqlite",
            SinkKind::None => "none",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub initial_price: f64,
    pub bias: MovementBias,
    pub tick_ms: u64,
    pub effect_interval_secs: u64,
    /// Written as the `host` tag on every point.
    pub series_tag: String,
    pub measurement: String,
    pub sink: SinkKind,
    pub influx_url: String,
    pub influx_token: Option<String>,
    pub influx_org: String,
    pub influx_bucket: String,
    pub sqlite_path: String,
    pub seed: Option<u64>,
    pub sink_queue_cap: usize,
    pub sink_failure_threshold: u32,
    pub sink_cooldown_secs: u64,
    pub recover_price: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_price: 100.0,
            bias: MovementBias::new(0.001, 0.1, 0.5, 0.3),
            tick_ms: 2000,
            effect_interval_secs: 2 * 60 * 60,
            series_tag: "BNN".to_string(),
            measurement: "stock".to_string(),
            sink: SinkKind::None,
            influx_url: "http://localhost:8086".to_string(),
            influx_token: None,
            influx_org: "my-org".to_string(),
            influx_bucket: "mock_stock".to_string(),
            sqlite_path: "./stocksim.sqlite".to_string(),
            seed: None,
            sink_queue_cap: 256,
            sink_failure_threshold: 5,
            sink_cooldown_secs: 30,
            recover_price: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            initial_price: std::env::var("INITIAL_PRICE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.initial_price),
            bias: MovementBias {
                volatility: std::env::var("VOLATILITY").ok().and_then(|v| v.parse().ok()).unwrap_or(d.bias.volatility),
                prospect: std::env::var("PROSPECT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.bias.prospect),
                prospect_volatility: std::env::var("PROSPECT_VOLATILITY").ok().and_then(|v| v.parse().ok()).unwrap_or(d.bias.prospect_volatility),
                hype: std::env::var("HYPE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.bias.hype),
            },
            tick_ms: std::env::var("TICK_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.tick_ms).max(1),
            effect_interval_secs: std::env::var("EFFECT_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.effect_interval_secs).max(1),
            series_tag: std::env::var("SERIES_TAG").unwrap_or(d.series_tag),
            measurement: std::env::var("MEASUREMENT").unwrap_or(d.measurement),
            sink: std::env::var("SINK").map(|v| SinkKind::parse(&v)).unwrap_or(d.sink),
            influx_url: std::env::var("INFLUX_URL").unwrap_or(d.influx_url),
            influx_token: std::env::var("INFLUX_TOKEN").ok(),
            influx_org: std::env::var("INFLUX_ORG").unwrap_or(d.influx_org),
            influx_bucket: std::env::var("INFLUX_BUCKET").unwrap_or(d.influx_bucket),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(d.sqlite_path),
            seed: std::env::var("SEED").ok().and_then(|v| v.parse().ok()),
            sink_queue_cap: std::env::var("SINK_QUEUE_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(d.sink_queue_cap).max(1),
            sink_failure_threshold: std::env::var("SINK_FAILURE_THRESHOLD").ok().and_then(|v| v.parse().ok()).unwrap_or(d.sink_failure_threshold).max(1),
            sink_cooldown_secs: std::env::var("SINK_COOLDOWN_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.sink_cooldown_secs),
            recover_price: std::env::var("RECOVER_PRICE").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(d.recover_price),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn effect_interval(&self) -> Duration {
        Duration::from_secs(self.effect_interval_secs.max(1))
    }
}
