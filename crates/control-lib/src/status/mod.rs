//! Authoritative server-status document
//!
//! Written by the central controller on every backend state transition and
//! read back by the edge controller each tick. Writes use atomic rename;
//! readers retry on the next tick if a parse fails.

mod sync;

pub use sync::{DocumentShipper, LocalShipper, ScpShipper, StatusSyncer, SyncConfig};

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{Backend, BackendState};
use crate::store::{read_json, write_json_atomic};

/// Per-backend entry in the status document, keyed by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub name: String,
    pub ip: String,
    pub active: bool,
    pub draining: bool,
    pub healthy: bool,
}

/// The full on-disk document: backend address -> entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusDocument {
    pub entries: BTreeMap<String, StatusEntry>,
}

impl StatusDocument {
    /// Build the document from the authoritative backend states.
    pub fn from_states<'a>(
        states: impl IntoIterator<Item = (&'a Backend, &'a BackendState)>,
    ) -> Self {
        let mut entries = BTreeMap::new();
        for (backend, state) in states {
            entries.insert(
                backend.address.clone(),
                StatusEntry {
                    name: backend.id.clone(),
                    ip: backend.address.clone(),
                    active: state.active,
                    draining: state.draining,
                    healthy: state.healthy,
                },
            );
        }
        Self { entries }
    }

    /// Atomically write the document to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// Load the document from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Addresses the edge may schedule: active, not draining, healthy.
    pub fn schedulable_addresses(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.active && !e.draining && e.healthy)
            .map(|e| e.ip.clone())
            .collect()
    }
}
