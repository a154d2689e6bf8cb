//! Hypervisor power actuation
//!
//! Drives VM power state through a libvirt-style `virsh` invocation. All
//! operations are idempotent: powering on a running VM or powering off a
//! stopped one reports success.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

/// Requested power state for a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    /// Hard reset, used when a backend fails its health checks.
    Restart,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Restart => write!(f, "restart"),
        }
    }
}

/// Seam over the hypervisor so the capacity loop can be tested offline.
#[async_trait]
pub trait PowerActuator: Send + Sync {
    async fn set_power(&self, vm_name: &str, state: PowerState) -> Result<()>;
}

/// Actuates power via `virsh` against a libvirt hypervisor.
pub struct VirshActuator {
    /// Connection URI, e.g. "qemu+ssh://kvm-host/system".
    pub uri: String,
    pub timeout: Duration,
}

impl VirshActuator {
    pub fn new(uri: impl Into<String>, timeout: Duration) -> Self {
        Self { uri: uri.into(), timeout }
    }

    async fn virsh(&self, args: &[&str]) -> Result<(bool, String)> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("virsh").arg("-c").arg(&self.uri).args(args).output(),
        )
        .await
        .context("virsh timed out")?
        .context("failed to spawn virsh")?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Ok((output.status.success(), stderr))
    }

    /// Errors that mean the VM is already in the requested state.
    fn already_there(state: PowerState, stderr: &str) -> bool {
        match state {
            PowerState::On => stderr.contains("already active"),
            PowerState::Off => stderr.contains("not running") || stderr.contains("domain is not running"),
            PowerState::Restart => false,
        }
    }
}

#[async_trait]
impl PowerActuator for VirshActuator {
    async fn set_power(&self, vm_name: &str, state: PowerState) -> Result<()> {
        let verb = match state {
            PowerState::On => "start",
            PowerState::Off => "destroy",
            PowerState::Restart => "reset",
        };

        debug!(vm = vm_name, %state, "Actuating power");
        let (success, stderr) = self.virsh(&[verb, vm_name]).await?;

        if success || Self::already_there(state, &stderr) {
            info!(vm = vm_name, %state, "Power actuation complete");
            return Ok(());
        }
        anyhow::bail!("virsh {verb} {vm_name} failed: {}", stderr.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_matching() {
        assert!(VirshActuator::already_there(
            PowerState::On,
            "error: Domain is already active"
        ));
        assert!(VirshActuator::already_there(
            PowerState::Off,
            "error: Requested operation is not valid: domain is not running"
        ));
        assert!(!VirshActuator::already_there(PowerState::Restart, "error: whatever"));
        assert!(!VirshActuator::already_there(PowerState::On, "error: no such domain"));
    }
}
