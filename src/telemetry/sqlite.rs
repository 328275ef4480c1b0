use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};

use crate::telemetry::{Fields, Row, Tags, TelemetrySink};

/// Local price history in a single `points` table, one row per field.
///
/// Statements run on tokio's blocking pool, so a slow disk never stalls the
/// task that awaits them, even on a current-thread runtime.
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    pub fn open(path: &str) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS points (
                ts INTEGER NOT NULL,
                series TEXT NOT NULL,
                measurement TEXT NOT NULL,
                field TEXT NOT NULL,
                value REAL NOT NULL,
                tags TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS points_lookup ON points (series, measurement, field, ts);
            COMMIT;",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| anyhow!("sqlite connection poisoned"))?;
            f(&mut *guard)
        })
        .await?
    }
}

fn insert_points(
    conn: &mut Connection,
    ts: i64,
    series: &str,
    measurement: &str,
    fields: &Fields,
    tags: &str,
) -> Result<()> {
    let tx = conn.transaction()?;
    for (field, value) in fields {
        tx.execute(
            "INSERT INTO points (ts, series, measurement, field, value, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![ts, series, measurement, field, value, tags],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn select_rows(conn: &Connection, query: &str) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(query)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (i, name) in columns.iter().enumerate() {
            let cell = match row.get_ref(i)? {
                ValueRef::Null => String::new(),
                ValueRef::Integer(n) => n.to_string(),
                ValueRef::Real(f) => f.to_string(),
                ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
                ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
            };
            record.insert(name.clone(), cell);
        }
        out.push(record);
    }
    Ok(out)
}

#[async_trait]
impl TelemetrySink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn write(&self, series: &str, measurement: &str, fields: &Fields, tags: &Tags) -> Result<()> {
        let ts = Utc::now().timestamp_millis();
        let tags = serde_json::to_string(tags)?;
        let series = series.to_string();
        let measurement = measurement.to_string();
        let fields = fields.clone();
        self.with_conn(move |conn| insert_points(conn, ts, &series, &measurement, &fields, &tags))
            .await
    }

    async fn query(&self, query: &str) -> Result<Vec<Row>> {
        let query = query.to_string();
        self.with_conn(move |conn| select_rows(conn, &query)).await
    }

    fn last_value_query(&self, series: &str, measurement: &str, field: &str) -> String {
        format!(
            "SELECT ts AS _time, value AS _value FROM points \
             WHERE series = '{}' AND measurement = '{}' AND field = '{}' \
             ORDER BY ts DESC, rowid DESC LIMIT 1",
            sql_quote(series),
            sql_quote(measurement),
            sql_quote(field)
        )
    }
}

fn sql_quote(s: &str) -> String {
    s.replace('\'', "''")
}
