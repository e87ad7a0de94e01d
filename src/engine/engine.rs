use super::coordinator::{finalize_aggregators, Coordinator, ShardApi};
use super::options::{EngineOptions, Role};
use super::runner::{Runner, RunnerOptions};
use crate::core::Results;
use crate::graph::{Pipeline, ResultsFn};
use crate::observability::FeedStats;
use crate::rundb::{JsonRunDb, RunDb, RunInfo};
use crate::server::{self, ShardClient};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Bookkeeping for one run in a `RunDb`
pub struct RunBook {
    db: Arc<dyn RunDb>,
    info: Mutex<RunInfo>,
    results_fn: Option<ResultsFn>,
}

impl RunBook {
    pub fn new(db: Arc<dyn RunDb>, pipeline: &Pipeline, run_name: &str) -> Self {
        Self {
            db,
            info: Mutex::new(RunInfo::started(
                pipeline.name.clone(),
                run_name,
                pipeline.params.clone(),
            )),
            results_fn: pipeline.results_fn.clone(),
        }
    }

    pub fn begin(&self) -> Result<()> {
        let info = self.info.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.db.save_run(&info).context("failed to record run start")
    }

    /// Record how a run ended
    pub fn record(&self, outcome: &Result<Results>, feed_stats: BTreeMap<String, FeedStats>) -> Result<()> {
        let mut info = self.info.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match outcome {
            Ok(results) => {
                let values = self.results_fn.as_ref().map(|f| f(results)).unwrap_or_default();
                info.finish(values, feed_stats);
            }
            Err(err) => {
                info.feed_stats = feed_stats;
                info.fail(format!("{:#}", err));
            }
        }
        self.db.save_run(&info).context("failed to record run outcome")
    }
}

/// Runs a validated pipeline in the role its options ask for
pub struct Engine {
    pipeline: Pipeline,
    opts: EngineOptions,
    run_db: Option<Arc<dyn RunDb>>,
}

impl Engine {
    pub fn new(pipeline: Pipeline, opts: EngineOptions) -> Result<Self> {
        pipeline.validate()?;
        opts.validate()?;

        let run_db: Option<Arc<dyn RunDb>> = match &opts.run_db_path {
            Some(path) if opts.records_runs() => {
                Some(Arc::new(JsonRunDb::new(path.clone())?) as Arc<dyn RunDb>)
            }
            _ => None,
        };

        Ok(Self {
            pipeline,
            opts,
            run_db,
        })
    }

    /// Record runs in `db` instead of the configured JSON store. Runs are
    /// still only recorded when a run name is set.
    pub fn with_run_db(mut self, db: Arc<dyn RunDb>) -> Self {
        self.run_db = Some(db);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// Run to completion and return the final results.
    ///
    /// In the shard role this serves the shard API and only returns on
    /// error.
    pub async fn run(&self) -> Result<Results> {
        info!(pipeline = %self.pipeline.name, role = ?self.opts.role, "running pipeline");
        match self.opts.role {
            Role::Standalone => self.run_standalone().await,
            Role::Coordinator => self.run_coordinator().await,
            Role::Shard => {
                let listener = TcpListener::bind(("0.0.0.0", self.opts.port))
                    .await
                    .with_context(|| format!("failed to bind shard server on port {}", self.opts.port))?;
                self.serve_shard(listener).await?;
                Err(anyhow!("shard server stopped"))
            }
        }
    }

    /// Serve the shard API on an already bound listener
    pub async fn serve_shard(&self, listener: TcpListener) -> Result<()> {
        let runner = Arc::new(Runner::new(self.pipeline.clone(), self.runner_options()));
        server::serve(listener, runner, self.run_book().map(Arc::new)).await
    }

    async fn run_standalone(&self) -> Result<Results> {
        let book = self.run_book();
        if let Some(book) = &book {
            book.begin()?;
        }

        let runner = Runner::new(self.pipeline.clone(), self.runner_options());
        let outcome = match runner.start(0, 1) {
            Ok(()) => runner.wait().await,
            Err(err) => Err(err),
        };
        let outcome = outcome.and_then(|results| {
            finalize_aggregators(&self.pipeline)?;
            Ok(results)
        });

        settle(book.as_ref(), outcome, runner.feed_stats())
    }

    async fn run_coordinator(&self) -> Result<Results> {
        let book = self.run_book();
        if let Some(book) = &book {
            book.begin()?;
        }

        let shards = self
            .opts
            .shard_endpoints
            .iter()
            .map(|endpoint| Arc::new(ShardClient::new(endpoint.clone())) as Arc<dyn ShardApi>)
            .collect();
        let coordinator = Coordinator::new(self.pipeline.clone(), shards, self.opts.poll_interval());

        match coordinator.run().await {
            Ok((results, feed_stats)) => settle(book.as_ref(), Ok(results), feed_stats),
            Err(err) => settle(book.as_ref(), Err(err), BTreeMap::new()),
        }
    }

    fn run_book(&self) -> Option<RunBook> {
        let db = self.run_db.clone()?;
        let name = self.opts.run_name.as_deref().filter(|n| !n.is_empty())?;
        Some(RunBook::new(db, &self.pipeline, name))
    }

    fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            num_workers: self.opts.num_workers,
            only_keys: self.opts.only_keys.clone(),
        }
    }
}

/// Record the outcome, if a run book is kept, and pass it on. A failure to
/// record never masks a run error.
fn settle(
    book: Option<&RunBook>,
    outcome: Result<Results>,
    feed_stats: BTreeMap<String, FeedStats>,
) -> Result<Results> {
    let Some(book) = book else {
        return outcome;
    };
    match (book.record(&outcome, feed_stats), outcome) {
        (Ok(()), outcome) => outcome,
        (Err(record_err), Ok(_)) => Err(record_err),
        (Err(record_err), Err(err)) => {
            warn!("{:#}", record_err);
            Err(err)
        }
    }
}
