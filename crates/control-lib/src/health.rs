//! Component health tracking for the controller's HTTP API

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health of one control-plane component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health detail for a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Aggregate response served by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, ComponentHealth>,
}

/// Component names used by the controller.
pub mod components {
    pub const CAPACITY_LOOP: &str = "capacity_loop";
    pub const PATH_LOOP: &str = "path_loop";
    pub const FORECASTER: &str = "forecaster";
    pub const TELEMETRY: &str = "telemetry";
}

/// Shared registry of component health.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn set_healthy(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::degraded(message));
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::unhealthy(message));
    }

    /// Aggregate view: unhealthy dominates, then degraded.
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let mut status = "healthy";
        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => {
                    status = "unhealthy";
                    break;
                }
                ComponentStatus::Degraded => status = "degraded",
                ComponentStatus::Healthy => {}
            }
        }
        HealthResponse { status: status.to_string(), components }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.health().await.status, "healthy");
    }

    #[tokio::test]
    async fn degraded_component_degrades_aggregate() {
        let registry = HealthRegistry::new();
        registry.register(components::CAPACITY_LOOP).await;
        registry.register(components::PATH_LOOP).await;

        registry.set_degraded(components::PATH_LOOP, "SDN controller slow").await;
        assert_eq!(registry.health().await.status, "degraded");
    }

    #[tokio::test]
    async fn unhealthy_dominates() {
        let registry = HealthRegistry::new();
        registry.register(components::TELEMETRY).await;
        registry.set_degraded(components::TELEMETRY, "slow").await;
        registry.set_unhealthy(components::TELEMETRY, "unreachable").await;
        assert_eq!(registry.health().await.status, "unhealthy");

        registry.set_healthy(components::TELEMETRY).await;
        assert_eq!(registry.health().await.status, "healthy");
    }
}
