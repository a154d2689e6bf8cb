//! `fcp stats`, `fcp sync` and `fcp health`

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ActionResponse, ApiClient, HealthResponse, StatsResponse};
use crate::output::{self, OutputFormat};

#[derive(Tabled, Serialize)]
struct StatRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Show push and collection statistics.
pub async fn show_stats(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response: StatsResponse = client.get("/stats").await?;
    let push = &response.push_stats;

    let mut rows = vec![
        StatRow { metric: "Total pushes".into(), value: push.total_pushes.to_string() },
        StatRow { metric: "Successful pushes".into(), value: push.successful_pushes.to_string() },
        StatRow { metric: "Failed pushes".into(), value: push.failed_pushes.to_string() },
        StatRow {
            metric: "Last push time".into(),
            value: push.last_push_time.clone().unwrap_or_else(|| "-".into()),
        },
    ];
    if let Some(error) = &push.last_error {
        rows.push(StatRow { metric: "Last error".into(), value: error.clone() });
    }
    if let Some(collection) = &response.last_collection {
        rows.push(StatRow {
            metric: "Last collection".into(),
            value: format!(
                "{} ({} devices, ending {})",
                output::format_mb(collection.total_mb),
                collection.devices,
                collection.window_end
            ),
        });
    }

    output::print_table(&rows, format);
    Ok(())
}

/// Trigger an immediate resync to the SDN host.
pub async fn force_sync(client: &ApiClient) -> Result<()> {
    let response: ActionResponse = client.post("/force_sync").await?;
    let message = response.message.unwrap_or_default();
    if response.success {
        output::print_success(&message);
    } else {
        output::print_error(&message);
    }
    Ok(())
}

/// Show controller health.
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response: HealthResponse = client.get("/health").await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Table => {
            println!("Controller: {}", output::color_status(&response.status));
        }
    }
    Ok(())
}
