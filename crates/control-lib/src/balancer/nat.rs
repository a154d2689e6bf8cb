//! Single-destination DNAT commit
//!
//! Rewrites the ingress DNAT rule to point the public endpoint at the chosen
//! backend. Committing the already-installed target is a no-op; a failed
//! install leaves the previous rule intact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Output of one executed command.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Seam over subprocess execution so the dataplane can be mocked.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<RunOutput>;
}

/// Runs commands on the host. The edge binary runs as root for this.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<RunOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to spawn {program}"))?;
        Ok(RunOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Result of a commit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Target already installed, dataplane untouched.
    Unchanged,
    /// Rule replaced or appended for the new target.
    Installed,
}

/// NAT configuration of the ingress box.
#[derive(Debug, Clone)]
pub struct NatConfig {
    pub public_ip: String,
    pub public_interface: String,
    pub port: u16,
}

/// Manages the single DNAT rule plus the MASQUERADE return rule.
pub struct NatCommitter {
    config: NatConfig,
    runner: Box<dyn CommandRunner>,
    installed: Option<String>,
    install_count: u64,
}

impl NatCommitter {
    pub fn new(config: NatConfig, runner: Box<dyn CommandRunner>) -> Self {
        Self { config, runner, installed: None, install_count: 0 }
    }

    /// Currently committed backend address, if any.
    pub fn installed_target(&self) -> Option<&str> {
        self.installed.as_deref()
    }

    /// Number of dataplane installations performed. A repeated commit of the
    /// same target must not move this counter.
    pub fn install_count(&self) -> u64 {
        self.install_count
    }

    /// Enable kernel IP forwarding. Run once at startup.
    pub async fn enable_forwarding(&self) -> Result<()> {
        let output = self
            .runner
            .run("sysctl", &["-w".into(), "net.ipv4.ip_forward=1".into()])
            .await?;
        if !output.success {
            anyhow::bail!("enabling ip_forward failed: {}", output.stderr.trim());
        }
        Ok(())
    }

    /// Point the public endpoint at `target`. Equal target is a no-op.
    pub async fn commit(&mut self, target: &str) -> Result<CommitOutcome> {
        if self.installed.as_deref() == Some(target) {
            debug!(target, "NAT target unchanged");
            return Ok(CommitOutcome::Unchanged);
        }

        let rule_num = self.find_dnat_rule().await?;
        let mut args: Vec<String> = vec!["-t".into(), "nat".into()];
        match rule_num {
            Some(num) => {
                args.extend(["-R".into(), "PREROUTING".into(), num.to_string()]);
            }
            None => {
                args.extend(["-A".into(), "PREROUTING".into()]);
            }
        }
        args.extend(self.dnat_rule_spec(target));

        let output = self.runner.run("iptables", &args).await?;
        if !output.success {
            anyhow::bail!("DNAT install for {target} failed: {}", output.stderr.trim());
        }

        self.ensure_masquerade().await?;

        info!(target, replaced = rule_num.is_some(), "NAT rule committed");
        self.installed = Some(target.to_string());
        self.install_count += 1;
        Ok(CommitOutcome::Installed)
    }

    fn dnat_rule_spec(&self, target: &str) -> Vec<String> {
        vec![
            "-i".into(),
            self.config.public_interface.clone(),
            "-p".into(),
            "tcp".into(),
            "--dport".into(),
            self.config.port.to_string(),
            "-d".into(),
            self.config.public_ip.clone(),
            "-j".into(),
            "DNAT".into(),
            "--to-destination".into(),
            target.to_string(),
        ]
    }

    /// Line number of our DNAT rule in PREROUTING, if present.
    async fn find_dnat_rule(&self) -> Result<Option<u32>> {
        let args: Vec<String> = ["-t", "nat", "-L", "PREROUTING", "-n", "--line-numbers"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = self.runner.run("iptables", &args).await?;
        if !output.success {
            anyhow::bail!("listing PREROUTING failed: {}", output.stderr.trim());
        }

        let needle_ip = &self.config.public_ip;
        let needle_port = format!("dpt:{}", self.config.port);
        for line in output.stdout.lines() {
            if line.contains(needle_ip.as_str()) && line.contains(&needle_port) {
                if let Some(num) = line.split_whitespace().next().and_then(|t| t.parse().ok()) {
                    return Ok(Some(num));
                }
            }
        }
        Ok(None)
    }

    /// Append the MASQUERADE return rule unless it already exists.
    async fn ensure_masquerade(&self) -> Result<()> {
        let spec = vec![
            "-o".to_string(),
            self.config.public_interface.clone(),
            "-j".to_string(),
            "MASQUERADE".to_string(),
        ];

        let mut check: Vec<String> = vec!["-t".into(), "nat".into(), "-C".into(), "POSTROUTING".into()];
        check.extend(spec.clone());
        let exists = self.runner.run("iptables", &check).await?.success;
        if exists {
            return Ok(());
        }

        let mut add: Vec<String> = vec!["-t".into(), "nat".into(), "-A".into(), "POSTROUTING".into()];
        add.extend(spec);
        let output = self.runner.run("iptables", &add).await?;
        if !output.success {
            warn!(stderr = %output.stderr.trim(), "Could not install MASQUERADE rule");
            anyhow::bail!("MASQUERADE install failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Records invocations and scripts the PREROUTING listing.
    struct FakeRunner {
        calls: Arc<Mutex<Vec<Vec<String>>>>,
        listing: String,
        fail_installs: Arc<AtomicBool>,
    }

    impl FakeRunner {
        fn new(listing: &str) -> (Self, Arc<Mutex<Vec<Vec<String>>>>, Arc<AtomicBool>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let fail = Arc::new(AtomicBool::new(false));
            let runner = Self {
                calls: calls.clone(),
                listing: listing.to_string(),
                fail_installs: fail.clone(),
            };
            (runner, calls, fail)
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, _program: &str, args: &[String]) -> Result<RunOutput> {
            self.calls.lock().unwrap().push(args.to_vec());

            let listing = args.iter().any(|a| a == "-L");
            let check = args.iter().any(|a| a == "-C");
            let install = args.iter().any(|a| a == "-A" || a == "-R");

            if listing {
                return Ok(RunOutput { success: true, stdout: self.listing.clone(), stderr: String::new() });
            }
            if check {
                // MASQUERADE not present yet.
                return Ok(RunOutput { success: false, stdout: String::new(), stderr: String::new() });
            }
            if install && self.fail_installs.load(Ordering::SeqCst) {
                return Ok(RunOutput { success: false, stdout: String::new(), stderr: "denied".into() });
            }
            Ok(RunOutput { success: true, stdout: String::new(), stderr: String::new() })
        }
    }

    fn config() -> NatConfig {
        NatConfig {
            public_ip: "203.0.113.9".to_string(),
            public_interface: "eno3".to_string(),
            port: 80,
        }
    }

    #[tokio::test]
    async fn first_commit_appends_rule() {
        let (runner, calls, _) = FakeRunner::new("");
        let mut nat = NatCommitter::new(config(), Box::new(runner));
        let outcome = nat.commit("192.168.6.2").await.unwrap();

        assert_eq!(outcome, CommitOutcome::Installed);
        assert_eq!(nat.installed_target(), Some("192.168.6.2"));
        assert_eq!(nat.install_count(), 1);

        let calls = calls.lock().unwrap();
        assert!(calls.iter().any(|args| args.iter().any(|a| a == "-A")
            && args.iter().any(|a| a == "PREROUTING")));
    }

    #[tokio::test]
    async fn repeated_commit_is_noop() {
        let (runner, calls, _) = FakeRunner::new("");
        let mut nat = NatCommitter::new(config(), Box::new(runner));
        nat.commit("192.168.6.2").await.unwrap();
        let count = nat.install_count();
        let invocations = calls.lock().unwrap().len();

        let outcome = nat.commit("192.168.6.2").await.unwrap();
        assert_eq!(outcome, CommitOutcome::Unchanged);
        assert_eq!(nat.install_count(), count);
        assert_eq!(calls.lock().unwrap().len(), invocations);
    }

    #[tokio::test]
    async fn existing_rule_is_replaced_not_appended() {
        let listing = "num  target  prot opt source     destination\n\
                       1    DNAT    tcp  --  0.0.0.0/0  203.0.113.9   tcp dpt:80 to:192.168.6.2\n";
        let (runner, calls, _) = FakeRunner::new(listing);
        let mut nat = NatCommitter::new(config(), Box::new(runner));
        nat.commit("192.168.6.3").await.unwrap();

        let calls = calls.lock().unwrap();
        let replace = calls
            .iter()
            .find(|args| args.iter().any(|a| a == "-R"))
            .expect("expected a replace invocation");
        assert!(replace.iter().any(|a| a == "1"));
        assert!(!calls.iter().any(|args| args.iter().any(|a| a == "-A")
            && args.iter().any(|a| a == "PREROUTING")));
    }

    #[tokio::test]
    async fn failed_install_keeps_previous_target() {
        let (runner, _, fail) = FakeRunner::new("");
        let mut nat = NatCommitter::new(config(), Box::new(runner));
        nat.commit("192.168.6.2").await.unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(nat.commit("192.168.6.3").await.is_err());
        assert_eq!(nat.installed_target(), Some("192.168.6.2"));
        assert_eq!(nat.install_count(), 1);
    }
}
