//! Fire-and-forget delivery of points to a sink.
//!
//! `submit` never waits: it pushes onto a bounded queue and returns. A
//! background task drains the queue, retrying transient failures and backing
//! off through a circuit breaker. Points that cannot be queued or that arrive
//! while the circuit is open are dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::logging::{log_sink_drop, log_sink_failure};
use crate::telemetry::circuit::CircuitBreaker;
use crate::telemetry::retry::{retry_async, RetryConfig};
use crate::telemetry::{Fields, Tags, TelemetrySink};

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub series: String,
    pub measurement: String,
    pub fields: Fields,
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub queue_cap: usize,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub retry: RetryConfig,
}

impl WriterConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            queue_cap: cfg.sink_queue_cap,
            failure_threshold: cfg.sink_failure_threshold,
            cooldown: Duration::from_secs(cfg.sink_cooldown_secs),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
}

pub struct SinkWriter {
    tx: mpsc::Sender<Point>,
    dropped: Arc<AtomicU64>,
    handle: JoinHandle<WriterStats>,
}

impl SinkWriter {
    /// Must be called inside a tokio runtime.
    pub fn spawn(sink: Arc<dyn TelemetrySink>, cfg: WriterConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.queue_cap.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(drain(rx, sink, cfg, dropped.clone()));
        Self {
            tx,
            dropped,
            handle,
        }
    }

    /// Queue a point without waiting. Returns false if it was dropped.
    pub fn submit(&self, point: Point) -> bool {
        match self.tx.try_send(point) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                log_sink_drop("queue_full", n);
                false
            }
            Err(TrySendError::Closed(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                log_sink_drop("writer_closed", n);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Stop accepting points, deliver what is queued, and report.
    pub async fn shutdown(self) -> WriterStats {
        let SinkWriter {
            tx,
            dropped,
            handle,
        } = self;
        drop(tx);
        let mut stats = handle.await.unwrap_or_default();
        stats.dropped = dropped.load(Ordering::SeqCst);
        stats
    }
}

async fn drain(
    mut rx: mpsc::Receiver<Point>,
    sink: Arc<dyn TelemetrySink>,
    cfg: WriterConfig,
    dropped: Arc<AtomicU64>,
) -> WriterStats {
    let mut circuit = CircuitBreaker::new(cfg.failure_threshold, cfg.cooldown);
    let mut stats = WriterStats::default();

    while let Some(point) = rx.recv().await {
        if !circuit.allow() {
            let n = dropped.fetch_add(1, Ordering::SeqCst) + 1;
            log_sink_drop("circuit_open", n);
            continue;
        }

        let result = retry_async(&cfg.retry, "sink_write", || {
            sink.write(&point.series, &point.measurement, &point.fields, &point.tags)
        })
        .await;

        match result {
            Ok(()) => {
                circuit.record_success();
                stats.written += 1;
            }
            Err(err) => {
                circuit.record_failure();
                stats.failed += 1;
                log_sink_failure("write", &err.to_string(), circuit.failures);
            }
        }
    }

    stats
}
