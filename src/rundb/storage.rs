use super::{RunDb, RunInfo};
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Stores each run as a JSON file at `<root>/<pipeline>/<run-name>.json`
pub struct JsonRunDb {
    root: PathBuf,
}

impl JsonRunDb {
    /// Create new run storage
    ///
    /// Creates the root directory if it doesn't exist
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).context("Failed to create run database directory")?;
        Ok(Self { root })
    }

    /// Load one run from disk
    pub fn load(&self, pipeline: &str, name: &str) -> Result<RunInfo> {
        let path = self.run_path(pipeline, name);
        let json = fs::read_to_string(&path)
            .context(format!("Failed to read run from {:?}", path))?;

        serde_json::from_str(&json).context("Failed to deserialize run")
    }

    /// List all stored runs of a pipeline, oldest first
    pub fn list(&self, pipeline: &str) -> Result<Vec<RunInfo>> {
        let mut runs = Vec::new();
        let dir = self.root.join(pipeline);

        if !dir.exists() {
            return Ok(runs);
        }

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();

            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                let json = fs::read_to_string(&path)?;
                if let Ok(run) = serde_json::from_str::<RunInfo>(&json) {
                    runs.push(run);
                }
            }
        }

        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.name.cmp(&b.name)));
        Ok(runs)
    }

    fn run_path(&self, pipeline: &str, name: &str) -> PathBuf {
        self.root.join(pipeline).join(format!("{}.json", name))
    }
}

impl RunDb for JsonRunDb {
    fn save_run(&self, info: &RunInfo) -> Result<()> {
        let path = self.run_path(&info.pipeline, &info.name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .context(format!("Failed to create run directory {:?}", dir))?;
        }

        let json = serde_json::to_string_pretty(info).context("Failed to serialize run")?;
        fs::write(&path, json).context(format!("Failed to write run to {:?}", path))?;

        Ok(())
    }
}
