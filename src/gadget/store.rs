//! Persistence of the active gadget across process restarts.

use super::status::Role;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// What is needed to pick an active gadget back up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRecord {
    pub profile_id: String,
    pub role: Role,
    pub gadget_dir: String,
    pub keyboard_device: Option<String>,
    pub mouse_device: Option<String>,
}

pub trait StateStore: Send + Sync {
    fn load(&self) -> Option<ActiveRecord>;

    fn save(&self, record: &ActiveRecord) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// One JSON file holding the record.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Option<ActiveRecord> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&text) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable gadget state");
                None
            }
        }
    }

    fn save(&self, record: &ActiveRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }
        let text = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))?;
        debug!(path = %self.path.display(), "saved active gadget");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove state file: {}", self.path.display())),
        }
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<Option<ActiveRecord>>,
}

impl MemoryStore {
    pub fn new(record: Option<ActiveRecord>) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Option<ActiveRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn save(&self, record: &ActiveRecord) -> Result<()> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
