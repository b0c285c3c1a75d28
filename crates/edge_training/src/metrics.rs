use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const METRICS_FILE: &str = "metrics.jsonl";

/// Append-only JSON-lines log, one record per epoch.
#[derive(Debug)]
pub struct MetricsLog {
    path: PathBuf,
    file: File,
}

impl MetricsLog {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| anyhow!("failed to create {}: {e}", dir.display()))?;
        let path = dir.join(METRICS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| anyhow!("failed to open {}: {e}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record<T: Serialize>(&mut self, entry: &T) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        writeln!(self.file, "{line}").map_err(|e| anyhow!("failed to append to {}: {e}", self.path.display()))
    }
}
