//! Telemetry sinks: where generated prices end up.
//!
//! The simulation only ever talks to [`TelemetrySink`]; writes go through a
//! [`writer::SinkWriter`] so a slow or failing backend never holds up a tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Config, SinkKind};

pub mod circuit;
pub mod influx;
pub mod retry;
pub mod sqlite;
pub mod writer;

pub type Fields = BTreeMap<String, f64>;
pub type Tags = BTreeMap<String, String>;
/// One result row: column name to raw cell text.
pub type Row = BTreeMap<String, String>;

/// Column holding the value in rows returned by `last_value_query`.
pub const VALUE_COLUMN: &str = "_value";

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store one point. `series` is written as the `host` tag.
    async fn write(&self, series: &str, measurement: &str, fields: &Fields, tags: &Tags) -> Result<()>;

    async fn query(&self, query: &str) -> Result<Vec<Row>>;

    /// Backend-specific query whose first row carries the most recent value of
    /// `field` in [`VALUE_COLUMN`].
    fn last_value_query(&self, series: &str, measurement: &str, field: &str) -> String;
}

/// Discards writes; every query comes back empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn write(&self, _series: &str, _measurement: &str, _fields: &Fields, _tags: &Tags) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _query: &str) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    fn last_value_query(&self, _series: &str, _measurement: &str, _field: &str) -> String {
        String::new()
    }
}

impl SinkKind {
    pub fn build(self, cfg: &Config) -> Result<Arc<dyn TelemetrySink>> {
        match self {
            SinkKind::Influx => Ok(Arc::new(influx::InfluxSink::from_config(cfg)?)),
            SinkKind::Sqlite => Ok(Arc::new(sqlite::SqliteSink::open(&cfg.sqlite_path)?)),
            SinkKind::None => Ok(Arc::new(NullSink)),
        }
    }
}

pub fn price_fields(price: f64) -> Fields {
    let mut fields = Fields::new();
    fields.insert("price".to_string(), price);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_accepts_and_returns_nothing() {
        let sink = NullSink;
        sink.write("BNN", "stock", &price_fields(1.0), &Tags::new()).await.unwrap();
        assert!(sink.query("anything").await.unwrap().is_empty());
    }

    #[test]
    fn none_kind_builds_null_sink() {
        let sink = SinkKind::None.build(&Config::default()).unwrap();
        assert_eq!(sink.name(), "none");
    }
}
