use super::state::{RunState, RunStatus};
use crate::core::{Results, Sample};
use crate::graph::Pipeline;
use crate::observability::{merge_stats, FeedStats};
use crate::server::wire::{ResultsResponse, StartRequest, StatusResponse};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How many consecutive failed status polls a shard gets to come up
pub const MAX_UNREACHABLE_POLLS: u32 = 12;

/// Call every aggregator's `finalize` once, in name order
pub fn finalize_aggregators(pipeline: &Pipeline) -> Result<()> {
    for agg in pipeline.aggregators() {
        agg.finalize()
            .with_context(|| format!("failed to finalize {}", agg.name()))?;
    }
    Ok(())
}

/// What the coordinator needs from a shard
#[async_trait]
pub trait ShardApi: Send + Sync + 'static {
    fn endpoint(&self) -> &str;

    async fn status(&self) -> Result<StatusResponse>;

    async fn start(&self, req: StartRequest) -> Result<()>;

    async fn results(&self) -> Result<ResultsResponse>;

    async fn feed_stats(&self) -> Result<BTreeMap<String, FeedStats>>;
}

/// Drives a distributed run across remote shards.
///
/// Every step stops at the first error. The only exception is an unreachable
/// shard while waiting for readiness, which is polled again up to
/// `MAX_UNREACHABLE_POLLS` times.
pub struct Coordinator {
    pipeline: Pipeline,
    shards: Vec<Arc<dyn ShardApi>>,
    poll_interval: Duration,
    status: Mutex<RunStatus>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Coordinator {
    pub fn new(pipeline: Pipeline, shards: Vec<Arc<dyn ShardApi>>, poll_interval: Duration) -> Self {
        Self {
            pipeline,
            shards,
            poll_interval,
            status: Mutex::new(RunStatus::default()),
        }
    }

    pub fn status(&self) -> RunStatus {
        lock(&self.status).clone()
    }

    pub async fn run(&self) -> Result<(Results, BTreeMap<String, FeedStats>)> {
        if self.shards.is_empty() {
            bail!("no shard endpoints configured");
        }

        let outcome = self.drive().await;
        match &outcome {
            Ok(_) => {
                info!(pipeline = %self.pipeline.name, "distributed run finished");
                lock(&self.status).finish(None);
            }
            Err(err) => {
                error!(pipeline = %self.pipeline.name, "distributed run failed: {:#}", err);
                lock(&self.status).finish(Some(format!("{:#}", err)));
            }
        }
        outcome
    }

    async fn drive(&self) -> Result<(Results, BTreeMap<String, FeedStats>)> {
        info!(shards = self.shards.len(), "waiting for shards to be ready");
        self.wait_for_shards(RunState::Waiting).await?;

        lock(&self.status).start();
        self.start_shards().await?;

        info!("waiting for shards to finish");
        self.wait_for_shards(RunState::Finished).await?;

        info!("collecting results");
        let results = self.collect_results().await?;

        info!("collecting feed stats");
        let feed_stats = self.collect_feed_stats().await?;

        Ok((results, feed_stats))
    }

    /// Poll every shard in turn until it reports `target`
    async fn wait_for_shards(&self, target: RunState) -> Result<()> {
        for shard in &self.shards {
            let mut unreachable = 0;
            loop {
                let status = match shard.status().await {
                    Ok(status) => status,
                    // shard processes may still be booting
                    Err(err) if target == RunState::Waiting && unreachable < MAX_UNREACHABLE_POLLS => {
                        unreachable += 1;
                        warn!(
                            endpoint = shard.endpoint(),
                            attempt = unreachable,
                            "shard not reachable yet: {:#}",
                            err
                        );
                        tokio::time::sleep(self.poll_interval).await;
                        continue;
                    }
                    Err(err) => {
                        return Err(err.context(format!("status request to {} failed", shard.endpoint())))
                    }
                };

                if let Some(err) = status.err.filter(|e| !e.is_empty()) {
                    bail!("shard {} failed: {}", shard.endpoint(), err);
                }
                if status.state == target {
                    break;
                }

                let expected = match target {
                    RunState::Waiting => false,
                    RunState::Running => status.state == RunState::Waiting,
                    RunState::Finished => status.state == RunState::Running,
                };
                if !expected {
                    bail!(
                        "shard {} is {}, expected {}",
                        shard.endpoint(),
                        status.state.name(),
                        target.name()
                    );
                }

                debug!(
                    endpoint = shard.endpoint(),
                    state = status.state.name(),
                    "shard not {} yet",
                    target.name()
                );
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Ok(())
    }

    async fn start_shards(&self) -> Result<()> {
        let total_shards = self.shards.len();
        for (shard, api) in self.shards.iter().enumerate() {
            info!(endpoint = api.endpoint(), shard, total_shards, "starting shard");
            api.start(StartRequest { shard, total_shards })
                .await
                .with_context(|| format!("failed to start shard {} at {}", shard, api.endpoint()))?;
        }
        Ok(())
    }

    /// Fold each shard's local results in endpoint order, then finalize
    async fn collect_results(&self) -> Result<Results> {
        let aggregators = self.pipeline.aggregators();
        let mut running: BTreeMap<String, Sample> = BTreeMap::new();

        for shard in &self.shards {
            let endpoint = shard.endpoint();
            let resp = shard
                .results()
                .await
                .with_context(|| format!("results request to {} failed", endpoint))?;

            for agg in &aggregators {
                let name = agg.name();
                let data = resp
                    .serialized_results
                    .get(name)
                    .ok_or_else(|| anyhow!("shard {} returned no result for {}", endpoint, name))?;
                let sample = agg
                    .from_json(data)
                    .with_context(|| format!("failed to decode {} from {}", name, endpoint))?;
                let total = agg
                    .aggregate_from_shard(running.remove(name), sample, endpoint)
                    .with_context(|| format!("failed to fold {} from {}", name, endpoint))?;
                running.insert(name.to_string(), total);
            }
            debug!(endpoint, "folded shard results");
        }

        finalize_aggregators(&self.pipeline)?;

        let mut results = Results::new();
        for (name, sample) in running {
            results.insert(name, sample);
        }
        Ok(results)
    }

    async fn collect_feed_stats(&self) -> Result<BTreeMap<String, FeedStats>> {
        let mut requests = JoinSet::new();
        for shard in &self.shards {
            let shard = shard.clone();
            requests.spawn(async move {
                shard
                    .feed_stats()
                    .await
                    .with_context(|| format!("feed stats request to {} failed", shard.endpoint()))
            });
        }

        let mut total = BTreeMap::new();
        while let Some(joined) = requests.join_next().await {
            let stats = joined.context("feed stats task failed")??;
            merge_stats(&mut total, &stats);
        }
        Ok(total)
    }
}
