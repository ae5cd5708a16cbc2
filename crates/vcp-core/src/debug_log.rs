//! Request/response capture for debugging.
//!
//! When debug mode is on, each relayed request and its final output are
//! written as pretty JSON under the debug log directory. Write failures
//! are logged and otherwise ignored.

use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DebugLog {
    dir: PathBuf,
    enabled: bool,
}

impl DebugLog {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
        }
    }

    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `payload` as `<kind>-<timestamp>-<id>.json`. Returns the path
    /// written, if any.
    pub async fn record<T: Serialize>(&self, kind: &str, payload: &T) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        match self.write(kind, payload).await {
            Ok(path) => {
                debug!(path = %path.display(), "debug log written");
                Some(path)
            }
            Err(e) => {
                warn!(kind, error = %e, "failed to write debug log");
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, kind: &str, payload: &T) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let id = Uuid::new_v4().simple().to_string();
        let name = format!(
            "{kind}-{}-{}.json",
            Local::now().format("%Y%m%d-%H%M%S%.3f"),
            &id[..8]
        );
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(payload)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }
}
