//! `fcp weights` - current path-selection weights

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::client::WeightsResponse;
use crate::output::{self, OutputFormat};

#[derive(Tabled, Serialize)]
struct WeightRow {
    #[tabled(rename = "Route")]
    route: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Spine")]
    spine: String,
    #[tabled(rename = "Ratio")]
    ratio: String,
    #[tabled(rename = "Cost")]
    cost: String,
    #[tabled(rename = "Source")]
    source: String,
}

/// Show the current weights, optionally filtered by route.
pub async fn show_weights(
    client: &ApiClient,
    route: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let response: WeightsResponse = client.get("/current_weights").await?;

    let Some(document) = response.data else {
        output::print_warning("No weights published yet");
        return Ok(());
    };

    println!(
        "Iteration {} | mode: {} | predictions: {} | {}",
        document.metadata.iteration,
        document.metadata.load_balancing_mode,
        document.metadata.using_predictions,
        document.metadata.timestamp_utc8,
    );

    let mut rows = Vec::new();
    for (route_key, entry) in &document.path_selection_weights {
        if let Some(filter) = &route {
            if route_key != filter {
                continue;
            }
        }
        for (path_key, detail) in &entry.path_details {
            rows.push(WeightRow {
                route: route_key.clone(),
                path: path_key.clone(),
                spine: detail.via_spine.clone(),
                ratio: output::format_ratio(detail.selection_ratio),
                cost: output::format_mb(detail.bandwidth_cost.megabytes),
                source: detail.bandwidth_cost.source.clone(),
            });
        }
    }

    output::print_table(&rows, format);
    Ok(())
}
