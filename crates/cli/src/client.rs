//! API client for the controller HTTP API

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// HTTP client for the controller API.
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;
        Ok(Self { client, base_url })
    }

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request without a body.
    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        response.json().await.context("Failed to parse response")
    }

    /// Make a DELETE request.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<WeightsDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsDocument {
    pub metadata: WeightsMetadata,
    pub path_selection_weights: BTreeMap<String, RouteEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsMetadata {
    pub timestamp_utc8: String,
    pub iteration: u64,
    pub load_balancing_mode: String,
    pub using_predictions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub path_details: BTreeMap<String, PathDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathDetail {
    pub via_spine: String,
    pub selection_ratio: f64,
    pub bandwidth_cost: BandwidthCost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthCost {
    pub bytes: f64,
    pub megabytes: f64,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    pub push_stats: PushStats,
    #[serde(default)]
    pub last_collection: Option<LastCollection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushStats {
    pub total_pushes: u64,
    pub successful_pushes: u64,
    pub failed_pushes: u64,
    #[serde(default)]
    pub last_push_time: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastCollection {
    pub total_bytes: u64,
    pub total_mb: f64,
    pub devices: usize,
    pub window_end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub unacknowledged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub severity: String,
    pub category: String,
    pub title: String,
    pub message: String,
    pub timestamp: String,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
