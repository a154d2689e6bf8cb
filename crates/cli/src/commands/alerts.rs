//! `fcp alerts` - list, acknowledge and dismiss alerts

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ActionResponse, AlertsResponse, ApiClient};
use crate::output::{self, OutputFormat};

#[derive(Tabled, Serialize)]
struct AlertRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Ack")]
    acknowledged: String,
}

/// List recent alerts.
pub async fn list_alerts(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let response: AlertsResponse = client.get(&format!("/alerts?limit={limit}")).await?;

    if response.unacknowledged > 0 {
        output::print_warning(&format!("{} unacknowledged alert(s)", response.unacknowledged));
    }

    let rows: Vec<AlertRow> = response
        .alerts
        .iter()
        .map(|alert| AlertRow {
            id: alert.id.clone(),
            severity: output::color_severity(&alert.severity),
            category: alert.category.clone(),
            title: alert.title.clone(),
            time: alert.timestamp.clone(),
            acknowledged: if alert.acknowledged { "yes".into() } else { "no".into() },
        })
        .collect();

    output::print_table(&rows, format);
    Ok(())
}

/// Acknowledge one alert by id.
pub async fn acknowledge(client: &ApiClient, id: &str) -> Result<()> {
    let response: ActionResponse = client.post(&format!("/alerts/{id}/ack")).await?;
    if response.success {
        output::print_success(&format!("Alert {id} acknowledged"));
    } else {
        output::print_error(&format!("Alert {id} not found"));
    }
    Ok(())
}

/// Dismiss one alert by id.
pub async fn dismiss(client: &ApiClient, id: &str) -> Result<()> {
    let response: ActionResponse = client.delete(&format!("/alerts/{id}")).await?;
    if response.success {
        output::print_success(&format!("Alert {id} dismissed"));
    } else {
        output::print_error(&format!("Alert {id} not found"));
    }
    Ok(())
}
