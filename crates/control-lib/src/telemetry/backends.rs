//! Backend telemetry from the metrics time-series database
//!
//! Issues query-by-expression requests against a Prometheus-compatible
//! endpoint and folds the per-instance results into `LiveSample`s keyed by
//! backend address.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::LiveSample;

/// Memory utilisation percent.
const MEM_USAGE_QUERY: &str =
    "(1 - (node_memory_MemAvailable_bytes / node_memory_MemTotal_bytes)) * 100";

/// CPU utilisation percent, one-minute average across cores.
const CPU_USAGE_QUERY: &str =
    r#"avg by (instance) ((1 - irate(node_cpu_seconds_total{mode="idle"}[1m])) * 100)"#;

/// HTTP requests per second, one-minute rate.
const RPS_QUERY: &str = r#"rate(apache_accesses_total{job="apache_exporter"}[1m])"#;

/// Total memory in bytes.
const TOTAL_MEM_QUERY: &str = "node_memory_MemTotal_bytes";

/// Total CPU core count.
const TOTAL_CPU_QUERY: &str = r#"count(node_cpu_seconds_total{mode="idle"}) by (instance)"#;

/// Configuration for the telemetry client.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Base URL of the metrics database, e.g. "http://192.168.126.2:9090".
    pub base_url: String,
    /// Per-query timeout.
    pub timeout: Duration,
    /// Samples whose scrape timestamp is older than this are marked stale.
    pub staleness_cap: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            timeout: Duration::from_secs(10),
            staleness_cap: Duration::from_secs(15),
        }
    }
}

/// Source of per-backend live samples.
#[async_trait]
pub trait BackendTelemetry: Send + Sync {
    /// Collect one sample per reachable backend, keyed by address.
    async fn sample_all(&self) -> Result<HashMap<String, LiveSample>>;

    /// Total HTTP requests served across all backends in the previous hour.
    async fn hourly_request_count(&self) -> Result<u64>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    metric: HashMap<String, String>,
    /// `[unix_seconds, "value"]`
    value: (f64, String),
}

/// Prometheus-backed implementation.
pub struct PrometheusTelemetry {
    config: TelemetryConfig,
    client: reqwest::Client,
}

impl PrometheusTelemetry {
    pub fn new(config: TelemetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build metrics DB client")?;
        Ok(Self { config, client })
    }

    async fn query(&self, expr: &str) -> Result<Vec<QueryResult>> {
        let url = format!("{}/api/v1/query", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", expr)])
            .send()
            .await
            .with_context(|| format!("metrics query failed: {expr}"))?;

        let body: QueryResponse = response
            .json()
            .await
            .context("metrics response is not valid JSON")?;
        if body.status != "success" {
            anyhow::bail!("metrics query returned status {}", body.status);
        }
        Ok(body.data.result)
    }

    /// The `instance` label embeds the backend address as "ip:port".
    fn address_of(result: &QueryResult) -> Option<String> {
        result
            .metric
            .get("instance")
            .map(|i| i.split(':').next().unwrap_or(i).to_string())
    }

    fn value_of(result: &QueryResult) -> f64 {
        result.value.1.parse().unwrap_or(0.0)
    }

    fn is_fresh(&self, result: &QueryResult) -> bool {
        let now = chrono::Utc::now().timestamp() as f64;
        (now - result.value.0) <= self.config.staleness_cap.as_secs_f64()
    }
}

#[async_trait]
impl BackendTelemetry for PrometheusTelemetry {
    async fn sample_all(&self) -> Result<HashMap<String, LiveSample>> {
        let cpu = self.query(CPU_USAGE_QUERY).await?;
        let mem = self.query(MEM_USAGE_QUERY).await?;
        let rps = self.query(RPS_QUERY).await?;
        let total_mem = self.query(TOTAL_MEM_QUERY).await?;
        let total_cpu = self.query(TOTAL_CPU_QUERY).await?;

        let mut samples: HashMap<String, LiveSample> = HashMap::new();

        // CPU usage defines the set of live instances; everything else joins in.
        for result in &cpu {
            let Some(address) = Self::address_of(result) else { continue };
            samples.insert(
                address,
                LiveSample {
                    cpu_pct: Self::value_of(result),
                    memory_pct: 0.0,
                    rps: 0.0,
                    total_memory_bytes: 0,
                    total_cpu_cores: 0,
                    fresh: self.is_fresh(result),
                },
            );
        }

        for result in &mem {
            if let Some(address) = Self::address_of(result) {
                if let Some(sample) = samples.get_mut(&address) {
                    sample.memory_pct = Self::value_of(result);
                    sample.fresh &= self.is_fresh(result);
                }
            }
        }
        for result in &rps {
            if let Some(address) = Self::address_of(result) {
                if let Some(sample) = samples.get_mut(&address) {
                    sample.rps = Self::value_of(result);
                }
            }
        }
        for result in &total_mem {
            if let Some(address) = Self::address_of(result) {
                if let Some(sample) = samples.get_mut(&address) {
                    sample.total_memory_bytes = Self::value_of(result) as u64;
                }
            }
        }
        for result in &total_cpu {
            if let Some(address) = Self::address_of(result) {
                if let Some(sample) = samples.get_mut(&address) {
                    sample.total_cpu_cores = Self::value_of(result) as u32;
                }
            }
        }

        debug!(backends = samples.len(), "Collected backend telemetry");
        if samples.is_empty() {
            warn!("No backend instances returned by the metrics database");
        }
        Ok(samples)
    }

    async fn hourly_request_count(&self) -> Result<u64> {
        let expr = r#"sum(increase(apache_accesses_total{job="apache_exporter"}[1h]))"#;
        let results = self.query(expr).await?;
        let total = results.first().map(Self::value_of).unwrap_or(0.0);
        Ok(total.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(instance: &str, ts: f64, value: &str) -> QueryResult {
        let mut metric = HashMap::new();
        metric.insert("instance".to_string(), instance.to_string());
        QueryResult { metric, value: (ts, value.to_string()) }
    }

    #[test]
    fn address_strips_port() {
        let r = result("192.168.6.2:9100", 0.0, "1");
        assert_eq!(PrometheusTelemetry::address_of(&r).unwrap(), "192.168.6.2");
    }

    #[test]
    fn unparseable_value_reads_as_zero() {
        let r = result("192.168.6.2:9100", 0.0, "NaN-ish");
        assert_eq!(PrometheusTelemetry::value_of(&r), 0.0);
    }

    #[test]
    fn staleness_cap_marks_old_samples() {
        let telemetry = PrometheusTelemetry::new(TelemetryConfig::default()).unwrap();
        let now = chrono::Utc::now().timestamp() as f64;

        assert!(telemetry.is_fresh(&result("a:1", now - 1.0, "5")));
        assert!(!telemetry.is_fresh(&result("a:1", now - 120.0, "5")));
    }

    #[test]
    fn response_deserializes() {
        let raw = r#"{
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [
                    {"metric": {"instance": "192.168.6.2:9100"}, "value": [1700000000.0, "42.5"]}
                ]
            }
        }"#;
        let parsed: QueryResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.status, "success");
        assert_eq!(parsed.data.result.len(), 1);
        assert_eq!(PrometheusTelemetry::value_of(&parsed.data.result[0]), 42.5);
    }
}
