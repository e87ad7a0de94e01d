use super::state::{RunState, RunStatus};
use super::worker::Worker;
use crate::core::{FeedHandle, Results};
use crate::graph::{PipeClone, Pipeline};
use crate::observability::{FeedStats, RunStats, StatsReport};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub num_workers: usize,
    /// Only process records with these keys. Empty means all records.
    pub only_keys: Vec<String>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            num_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            only_keys: Vec::new(),
        }
    }
}

struct ShardRun {
    pipe: PipeClone,
    workers: JoinSet<(usize, PipeClone)>,
}

/// Executes one shard of a pipeline on a pool of blocking worker tasks.
///
/// A runner is single-use: `start` once, then `wait`.
pub struct Runner {
    pipeline: Pipeline,
    opts: RunnerOptions,
    stats: Arc<RunStats>,
    status: Mutex<RunStatus>,
    shard: Mutex<Option<ShardRun>>,
    results: Mutex<Option<Results>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Runner {
    pub fn new(pipeline: Pipeline, opts: RunnerOptions) -> Self {
        Self {
            pipeline,
            opts,
            stats: Arc::new(RunStats::new()),
            status: Mutex::new(RunStatus::default()),
            shard: Mutex::new(None),
            results: Mutex::new(None),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Clone the graph for `shard` and launch the workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, shard: usize, total_shards: usize) -> Result<()> {
        if lock(&self.status).state != RunState::Waiting {
            bail!("run already started");
        }
        if total_shards == 0 || shard >= total_shards {
            bail!("invalid shard {} of {}", shard, total_shards);
        }
        if self.opts.num_workers == 0 {
            bail!("at least one worker is required");
        }

        let (pipe, workers) = match self.build(shard, total_shards) {
            Ok(built) => built,
            Err(err) => {
                lock(&self.status).finish(Some(format!("{:#}", err)));
                return Err(err);
            }
        };

        // a concurrent start may have won the race while we were cloning
        if !lock(&self.status).start() {
            bail!("run already started");
        }
        info!(
            pipeline = %self.pipeline.name,
            shard,
            total_shards,
            workers = workers.len(),
            "starting run"
        );

        let mut handles = JoinSet::new();
        for (index, worker) in workers.into_iter().enumerate() {
            handles.spawn_blocking(move || {
                worker.run();
                (index, worker.into_pipe())
            });
        }

        *lock(&self.shard) = Some(ShardRun {
            pipe,
            workers: handles,
        });
        Ok(())
    }

    fn build(&self, shard: usize, total_shards: usize) -> Result<(PipeClone, Vec<Worker>)> {
        let pipe = PipeClone::for_shard(&self.pipeline, shard, total_shards)
            .context("failed to clone pipeline for shard")?;

        for feed in self.pipeline.all_feeds() {
            self.stats.register(feed.name());
        }

        let only_keys: Arc<HashSet<String>> = Arc::new(self.opts.only_keys.iter().cloned().collect());
        let mut workers = Vec::with_capacity(self.opts.num_workers);
        for id in 0..self.opts.num_workers {
            let worker_pipe = pipe
                .for_worker()
                .with_context(|| format!("failed to clone pipeline for worker {}", id))?;
            workers.push(Worker::new(id, worker_pipe, self.stats.clone(), only_keys.clone()));
        }
        Ok((pipe, workers))
    }

    /// Block until every worker is done, then aggregate the worker clones.
    ///
    /// A worker panic is re-raised here as soon as that worker ends, without
    /// waiting for the others.
    pub async fn wait(&self) -> Result<Results> {
        let run = lock(&self.shard).take();
        let Some(run) = run else {
            return match lock(&self.results).clone() {
                Some(results) => Ok(results),
                None => Err(anyhow!("run has not been started")),
            };
        };

        let mut workers = run.workers;
        let mut finished = Vec::with_capacity(workers.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(done) => finished.push(done),
                Err(err) if err.is_panic() => {
                    lock(&self.status).finish(Some("worker panicked".to_string()));
                    std::panic::resume_unwind(err.into_panic());
                }
                Err(err) => {
                    let err = anyhow!("worker task failed: {}", err);
                    lock(&self.status).finish(Some(format!("{:#}", err)));
                    return Err(err);
                }
            }
        }

        finished.sort_by_key(|(index, _)| *index);
        let worker_pipes: Vec<PipeClone> = finished.into_iter().map(|(_, pipe)| pipe).collect();

        match self.aggregate(&run.pipe, &worker_pipes) {
            Ok(results) => {
                *lock(&self.results) = Some(results.clone());
                lock(&self.status).finish(None);
                info!(pipeline = %self.pipeline.name, "run finished");
                info!("\n{}", StatsReport::new(self.stats.snapshot()).generate_report());
                Ok(results)
            }
            Err(err) => {
                error!(pipeline = %self.pipeline.name, "local aggregation failed: {:#}", err);
                lock(&self.status).finish(Some(format!("{:#}", err)));
                Err(err)
            }
        }
    }

    fn aggregate(&self, shard_pipe: &PipeClone, worker_pipes: &[PipeClone]) -> Result<Results> {
        let mut results = Results::new();
        for orig in self.pipeline.aggregators() {
            let orig_handle = FeedHandle::aggregator(orig.clone());
            let shard_agg = shard_pipe
                .clone_of(&orig_handle)
                .and_then(|h| h.as_aggregator())
                .ok_or_else(|| anyhow!("no shard instance of aggregator {}", orig.name()))?;

            let clones: Vec<_> = worker_pipes
                .iter()
                .filter_map(|p| p.clone_of(&orig_handle).and_then(|h| h.as_aggregator()).cloned())
                .collect();

            let sample = shard_agg
                .aggregate_local(&clones)
                .with_context(|| format!("failed to aggregate {}", orig.name()))?;
            results.insert(orig.name(), sample);
        }
        Ok(results)
    }

    pub fn status(&self) -> RunStatus {
        lock(&self.status).clone()
    }

    /// Local aggregation results, once the run has finished successfully
    pub fn results(&self) -> Option<Results> {
        lock(&self.results).clone()
    }

    /// Local results encoded by each aggregator, keyed by aggregator name
    pub fn serialized_results(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let status = self.status();
        if let Some(err) = status.err {
            bail!("run failed: {}", err);
        }
        let results = self
            .results()
            .ok_or_else(|| anyhow!("results are not available: run is {}", status.state.name()))?;

        let mut serialized = BTreeMap::new();
        for agg in self.pipeline.aggregators() {
            let sample = results
                .get(agg.name())
                .ok_or_else(|| anyhow!("missing result for aggregator {}", agg.name()))?;
            serialized.insert(agg.name().to_string(), agg.to_json(sample)?);
        }
        Ok(serialized)
    }

    pub fn feed_stats(&self) -> BTreeMap<String, FeedStats> {
        self.stats.snapshot()
    }
}
