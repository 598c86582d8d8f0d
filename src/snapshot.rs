//! JSON snapshot of the desk for restart persistence

use crate::account::Account;
use crate::desk::Desk;
use crate::error::{DeskError, Result};
use crate::gateway::Gateway;
use crate::module::Module;
use crate::position::ModuleBook;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeskSnapshot {
    pub version: u32,
    pub saved_at: Option<DateTime<Utc>>,
    pub gateways: Vec<Gateway>,
    pub accounts: Vec<Account>,
    pub modules: Vec<Module>,
    pub books: Vec<ModuleBook>,
}

/// Write the snapshot through a temp file so a crash never leaves half a file
pub fn save(snapshot: &DeskSnapshot, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    tracing::debug!("Snapshot saved to {}", path.display());
    Ok(())
}

/// Read a snapshot; `None` when the file does not exist yet
pub fn load(path: &Path) -> Result<Option<DeskSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let snapshot: DeskSnapshot = serde_json::from_str(&content)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(DeskError::Internal(format!(
            "Unsupported snapshot version {} in {}",
            snapshot.version,
            path.display()
        )));
    }
    tracing::info!(
        "Snapshot loaded from {} ({} modules)",
        path.display(),
        snapshot.modules.len()
    );
    Ok(Some(snapshot))
}

/// Write the desk to `path` on every tick that follows a committed change
pub fn spawn_autosave(desk: Arc<Desk>, path: PathBuf, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        let mut saved = desk.revision();
        loop {
            ticker.tick().await;
            let revision = desk.revision();
            if revision == saved {
                continue;
            }
            let snapshot = desk.snapshot();
            let target = path.clone();
            match tokio::task::spawn_blocking(move || save(&snapshot, &target)).await {
                Ok(Ok(())) => saved = revision,
                Ok(Err(e)) => tracing::warn!("Autosave to {} failed: {}", path.display(), e),
                Err(e) => tracing::error!("Autosave task panicked: {}", e),
            }
        }
    })
}
