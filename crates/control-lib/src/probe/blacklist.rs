//! Persisted backend blacklist
//!
//! Backends that exhausted their health checks are quarantined here until
//! they recover. The set survives restarts and the startup copy is unioned
//! with whatever accumulates in memory, so a crash never forgets a bad node.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::{read_json, write_json_atomic};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BlacklistFile {
    backends: BTreeSet<String>,
}

/// Durable set of blacklisted backend ids.
pub struct Blacklist {
    path: PathBuf,
    backends: BTreeSet<String>,
}

impl Blacklist {
    /// Open the blacklist, unioning any persisted entries.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let backends = if path.exists() {
            match read_json::<BlacklistFile>(&path) {
                Ok(file) => {
                    if !file.backends.is_empty() {
                        info!(count = file.backends.len(), "Rehydrated blacklist");
                    }
                    file.backends
                }
                Err(e) => {
                    warn!(error = %e, "Could not load blacklist, starting empty");
                    BTreeSet::new()
                }
            }
        } else {
            BTreeSet::new()
        };
        Self { path, backends }
    }

    pub fn contains(&self, backend_id: &str) -> bool {
        self.backends.contains(backend_id)
    }

    pub fn insert(&mut self, backend_id: impl Into<String>) {
        if self.backends.insert(backend_id.into()) {
            self.persist();
        }
    }

    pub fn remove(&mut self, backend_id: &str) -> bool {
        let removed = self.backends.remove(backend_id);
        if removed {
            self.persist();
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.backends.iter()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    fn persist(&self) {
        let file = BlacklistFile { backends: self.backends.clone() };
        if let Err(e) = write_json_atomic(&self.path, &file) {
            warn!(error = %e, "Failed to persist blacklist");
        }
    }
}
