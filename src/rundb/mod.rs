pub mod storage;

pub use storage::JsonRunDb;

use crate::observability::FeedStats;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Persists run metadata
pub trait RunDb: Send + Sync {
    fn save_run(&self, info: &RunInfo) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunInfoStatus {
    Started,
    Finished,
    Error,
}

/// One named value reported for a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub name: String,
    /// Name of the aggregator the value came from
    pub aggregator: String,
    pub value: Value,
}

impl RunResult {
    pub fn new(name: impl Into<String>, aggregator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            aggregator: aggregator.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub pipeline: String,
    pub name: String,
    pub status: RunInfoStatus,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub results: Vec<RunResult>,
    #[serde(default)]
    pub feed_stats: BTreeMap<String, FeedStats>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunInfo {
    pub fn started(pipeline: impl Into<String>, name: impl Into<String>, params: BTreeMap<String, Value>) -> Self {
        Self {
            pipeline: pipeline.into(),
            name: name.into(),
            status: RunInfoStatus::Started,
            params,
            results: Vec::new(),
            feed_stats: BTreeMap::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self, results: Vec<RunResult>, feed_stats: BTreeMap<String, FeedStats>) {
        self.status = RunInfoStatus::Finished;
        self.results = results;
        self.feed_stats = feed_stats;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunInfoStatus::Error;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }
}
