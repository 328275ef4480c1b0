use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::config::Config;
use crate::telemetry::{Fields, Row, Tags, TelemetrySink};

/// InfluxDB 2.x over its HTTP API: line protocol in, annotated CSV out.
pub struct InfluxSink {
    client: Client,
    base: String,
    token: Option<String>,
    org: String,
    bucket: String,
}

/// Non-2xx answer from the server.
#[derive(Debug, Clone)]
pub struct HttpStatusError {
    pub status: u16,
    pub body: String,
}

impl fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "influx responded {}: {}", self.status, self.body)
    }
}

impl std::error::Error for HttpStatusError {}

impl InfluxSink {
    pub fn new(base: &str, token: Option<String>, org: &str, bucket: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token,
            org: org.to_string(),
            bucket: bucket.to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.influx_url, cfg.influx_token.clone(), &cfg.influx_org, &cfg.influx_bucket)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header("Authorization", format!("Token {}", token)),
            None => req,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(HttpStatusError {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(body)
    }
}

#[async_trait]
impl TelemetrySink for InfluxSink {
    fn name(&self) -> &'static str {
        "influx"
    }

    async fn write(&self, series: &str, measurement: &str, fields: &Fields, tags: &Tags) -> Result<()> {
        let line = line_protocol(series, measurement, fields, tags)?;
        let url = format!("{}/api/v2/write", self.base);
        let req = self
            .client
            .post(&url)
            .query(&[("org", self.org.as_str()), ("bucket", self.bucket.as_str()), ("precision", "ms")])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line);
        let resp = self.authorize(req).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn query(&self, query: &str) -> Result<Vec<Row>> {
        let url = format!("{}/api/v2/query", self.base);
        let req = self
            .client
            .post(&url)
            .query(&[("org", self.org.as_str())])
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(query.to_string());
        let resp = self.authorize(req).send().await?;
        let body = Self::check(resp).await?;
        Ok(parse_annotated_csv(&body))
    }

    fn last_value_query(&self, series: &str, measurement: &str, field: &str) -> String {
        format!(
            "from(bucket: \"{}\")\n  |> range(start: 0)\n  |> filter(fn: (r) => r._measurement == \"{}\" and r.host == \"{}\" and r._field == \"{}\")\n  |> last()",
            flux_escape(&self.bucket),
            flux_escape(measurement),
            flux_escape(series),
            flux_escape(field)
        )
    }
}

/// `measurement,host=<series>,k=v field=value` with no timestamp; the
/// server stamps the point on arrival.
pub fn line_protocol(series: &str, measurement: &str, fields: &Fields, tags: &Tags) -> Result<String> {
    let mut line = escape_measurement(measurement);
    line.push_str(",host=");
    line.push_str(&escape_key(series));
    for (k, v) in tags.iter().filter(|(k, _)| k.as_str() != "host") {
        line.push(',');
        line.push_str(&escape_key(k));
        line.push('=');
        line.push_str(&escape_key(v));
    }

    let rendered: Vec<String> = fields
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(k, v)| format!("{}={}", escape_key(k), v))
        .collect();
    if rendered.is_empty() {
        return Err(anyhow!("no finite field values for {}", measurement));
    }
    line.push(' ');
    line.push_str(&rendered.join(","));
    Ok(line)
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

fn flux_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parse InfluxDB annotated CSV. Annotation rows (`#...`) are skipped, a blank
/// line ends a table and the next row is a fresh header.
pub fn parse_annotated_csv(body: &str) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut header: Option<Vec<String>> = None;
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            header = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let cells = split_csv_line(line);
        match &header {
            None => header = Some(cells),
            Some(cols) => {
                let row: Row = cols
                    .iter()
                    .zip(cells)
                    .filter(|(k, _)| !k.is_empty())
                    .map(|(k, v)| (k.clone(), v))
                    .collect();
                rows.push(row);
            }
        }
    }
    rows
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    cells.push(cur);
    cells
}
