use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which part of a run this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Run the whole pipeline in this process
    #[default]
    Standalone,
    /// Drive remote shards, run nothing locally
    Coordinator,
    /// Serve the shard HTTP API and run one shard on demand
    Shard,
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_port() -> u16 {
    3030
}

fn default_poll_interval_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Port the shard server listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URLs of the shards, in shard index order
    #[serde(default)]
    pub shard_endpoints: Vec<String>,
    #[serde(default)]
    pub only_keys: Vec<String>,
    #[serde(default)]
    pub run_db_path: Option<PathBuf>,
    #[serde(default)]
    pub run_name: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            role: Role::default(),
            num_workers: default_num_workers(),
            port: default_port(),
            shard_endpoints: Vec::new(),
            only_keys: Vec::new(),
            run_db_path: None,
            run_name: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl EngineOptions {
    pub fn from_json(config: serde_json::Value) -> Result<Self> {
        serde_json::from_value(config).context("Failed to parse engine options")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine options from {:?}", path))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse engine options in {:?}", path))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// True when run metadata should be recorded
    pub fn records_runs(&self) -> bool {
        self.run_db_path.is_some() && self.run_name.as_deref().is_some_and(|n| !n.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        match self.role {
            Role::Coordinator => {
                if self.shard_endpoints.is_empty() {
                    bail!("coordinator role needs at least one shard endpoint");
                }
            }
            Role::Standalone | Role::Shard => {
                if self.num_workers == 0 {
                    bail!("num_workers must be at least 1");
                }
            }
        }
        Ok(())
    }
}
