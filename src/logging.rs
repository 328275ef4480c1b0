//! Structured JSON logging for the simulator.
//!
//! Every record is a single JSON line carrying a run id, a sequence number,
//! level, component and event name. Records go to stdout and to per-run
//! files under `LOG_DIR/RUN_ID/` (`events.jsonl` for info and above,
//! `trace.jsonl` for trace/debug).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::bias::MovementBias;
use crate::modifier::Effect;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,    // Price steps
    Modifier,  // Effect activation, rejection, expiry
    Telemetry, // Sink writes, queries, drops
    System,    // Startup, shutdown, recovery
    Profile,   // Timing scopes
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Modifier => "modifier",
            Domain::Telemetry => "telemetry",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_log(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            events: open_log(run_dir.join("events.jsonl")),
            trace: open_log(run_dir.join("trace.jsonl")),
            run_id,
        }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "token", "influx_token"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["series", "effect", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(Ok(mut w)) = writer.as_ref().map(|m| m.lock()) {
        let _ = writeln!(w, "{}", line);
    }
}

fn flush_writer(writer: &Option<Mutex<BufWriter<File>>>) {
    if let Some(Ok(mut w)) = writer.as_ref().map(|m| m.lock()) {
        let _ = w.flush();
    }
}

/// Flush buffered log files. Call once on shutdown.
pub fn flush() {
    if let Some(ctx) = RUN_CONTEXT.get() {
        flush_writer(&ctx.events);
        flush_writer(&ctx.trace);
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }

    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_startup(series: &str, price: f64, bias: &MovementBias, sink: &str) {
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("series", v_str(series)),
            ("price", v_num(price)),
            ("bias", bias_value(bias)),
            ("sink", v_str(sink)),
        ]),
    );
}

pub fn log_price_step(series: &str, price: f64, bias: &MovementBias, active_effects: usize) {
    log(
        Level::Trace,
        Domain::Market,
        "price_step",
        obj(&[
            ("series", v_str(series)),
            ("price", v_num(price)),
            ("bias", bias_value(bias)),
            ("active_effects", json!(active_effects)),
        ]),
    );
}

pub fn log_effect_activated(effect: &Effect, bias: &MovementBias) {
    log(
        Level::Info,
        Domain::Modifier,
        "effect_activated",
        obj(&[
            ("effect", v_str(&effect.name)),
            ("msg", v_str(&effect.description)),
            ("kind", v_str(effect.kind.as_str())),
            ("expiry_ms", json!(effect.expiry)),
            ("bias", bias_value(bias)),
        ]),
    );
}

pub fn log_effect_rejected(name: &str, label: &str, reason: &str) {
    log(
        Level::Debug,
        Domain::Modifier,
        "effect_rejected",
        obj(&[
            ("effect", v_str(name)),
            ("label", v_str(label)),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_effects_expired(expired: &[Effect], bias: &MovementBias) {
    if expired.is_empty() {
        return;
    }
    let names: Vec<Value> = expired.iter().map(|e| v_str(&e.name)).collect();
    log(
        Level::Info,
        Domain::Modifier,
        "effects_expired",
        obj(&[("names", Value::Array(names)), ("bias", bias_value(bias))]),
    );
}

pub fn log_sink_failure(operation: &str, error: &str, consecutive: u32) {
    log(
        Level::Warn,
        Domain::Telemetry,
        "sink_failure",
        obj(&[
            ("operation", v_str(operation)),
            ("error", v_str(error)),
            ("consecutive", json!(consecutive)),
        ]),
    );
}

pub fn log_sink_drop(reason: &str, dropped_total: u64) {
    log(
        Level::Warn,
        Domain::Telemetry,
        "sink_drop",
        obj(&[("reason", v_str(reason)), ("dropped_total", json!(dropped_total))]),
    );
}

pub fn log_price_recovered(series: &str, price: f64, source: &str) {
    log(
        Level::Info,
        Domain::System,
        "price_recovered",
        obj(&[
            ("series", v_str(series)),
            ("price", v_num(price)),
            ("source", v_str(source)),
        ]),
    );
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub ticks: u64,
    pub injections_accepted: u64,
    pub injections_rejected: u64,
    pub effects_expired: u64,
    pub last_price: f64,
}

pub fn log_session_summary(duration_secs: u64, summary: &SessionSummary, sink_dropped: u64) {
    log(
        Level::Info,
        Domain::System,
        "session_summary",
        obj(&[
            ("duration_secs", json!(duration_secs)),
            ("ticks", json!(summary.ticks)),
            ("injections_accepted", json!(summary.injections_accepted)),
            ("injections_rejected", json!(summary.injections_rejected)),
            ("effects_expired", json!(summary.effects_expired)),
            ("last_price", v_num(summary.last_price)),
            ("sink_dropped", json!(sink_dropped)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

fn bias_value(bias: &MovementBias) -> Value {
    serde_json::to_value(bias).unwrap_or(Value::Null)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Emits a trace record with the elapsed time when dropped.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_token_is_redacted() {
        let m = sanitize_fields(obj(&[("token", v_str("secret")), ("price", v_num(1.0))]));
        assert_eq!(m.get("token").unwrap(), "[REDACTED]");
        assert_eq!(m.get("price").unwrap(), 1.0);
    }

    #[test]
    fn test_split_lifts_series_and_effect() {
        let (top, data) = split_fields(obj(&[
            ("series", v_str("BNN")),
            ("effect", v_str("Award")),
            ("price", v_num(3.0)),
        ]));
        assert_eq!(top.len(), 2);
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn test_bias_value_uses_field_names() {
        let v = bias_value(&MovementBias::new(0.01, 0.1, 0.5, 0.3));
        assert_eq!(v["prospect_volatility"], 0.5);
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
