//! Demo pipeline: sums the numbers 1..=N after a fan-out transform, and
//! counts them by parity. Run one process per role to try the distributed
//! mode, e.g. two `--role shard --port 3031/3032` processes and one
//! `--role coordinator --shard http://127.0.0.1:3031 --shard http://127.0.0.1:3032`.

use anyhow::Result;
use clap::Parser;
use shardflow::core::{new_error, FeedHandle, Record, Sample, Source};
use shardflow::engine::{Engine, EngineOptions, Role};
use shardflow::graph::{ParentMap, Pipeline};
use shardflow::nodes::{MapTransform, OneInOneOut, RecordSource, SumAggregator};
use shardflow::rundb::RunResult;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "shardflow")]
#[command(about = "Run the shardflow demo pipeline", long_about = None)]
struct Cli {
    /// Path to a JSON engine options file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    role: Option<Role>,

    /// Worker threads per shard
    #[arg(short, long)]
    workers: Option<usize>,

    /// Port the shard server listens on
    #[arg(short, long)]
    port: Option<u16>,

    /// Shard base URL (repeatable, in shard order)
    #[arg(long = "shard")]
    shards: Vec<String>,

    /// Only process records with this key (repeatable)
    #[arg(long = "only-key")]
    only_keys: Vec<String>,

    /// Directory for run metadata
    #[arg(long)]
    run_db: Option<PathBuf>,

    #[arg(long)]
    run_name: Option<String>,

    /// How many numbers the source emits
    #[arg(short = 'n', long, default_value_t = 1000)]
    count: i64,
}

fn demo_pipeline(count: i64) -> Result<Pipeline> {
    let records = (1..=count)
        .map(|i| Record::new(i.to_string(), Sample::new(i)))
        .collect();
    let source: Arc<dyn Source> = Arc::new(RecordSource::new("numbers", records)?);

    let repeat = FeedHandle::transform(Arc::new(MapTransform::new("repeat", |s| vec![s.clone(), s])));
    let checked = FeedHandle::transform(Arc::new(OneInOneOut::new("skip-sevens", |s| {
        if s.downcast_ref::<i64>().is_some_and(|v| v % 7 == 0) {
            Some(new_error("multiple of seven"))
        } else {
            Some(s)
        }
    })));
    let total = FeedHandle::aggregator(Arc::new(SumAggregator::new(
        "total",
        || 0i64,
        |s| s.downcast_ref::<i64>().copied().unwrap_or_default(),
    )));
    let parity = FeedHandle::aggregator(Arc::new(SumAggregator::new(
        "parity",
        BTreeMap::<String, u64>::new,
        |s| {
            let key = match s.downcast_ref::<i64>() {
                Some(v) if v % 2 == 0 => "even",
                _ => "odd",
            };
            BTreeMap::from([(key.to_string(), 1u64)])
        },
    )));

    let mut parents = ParentMap::new();
    let checked = parents.chain(FeedHandle::source(source.clone()), [repeat, checked]);
    parents.add(checked.clone(), total);
    parents.add(checked, parity);

    Ok(Pipeline::new("demo", parents, vec![source])
        .with_param("count", count)
        .with_results_fn(|results| {
            let mut values = Vec::new();
            if let Some(total) = results.value::<i64>("total") {
                values.push(RunResult::new("Total", "total", *total));
            }
            if let Some(parity) = results.value::<BTreeMap<String, u64>>("parity") {
                values.push(RunResult::new("Parity", "parity", serde_json::json!(parity)));
            }
            values
        }))
}

fn options(cli: &Cli) -> Result<EngineOptions> {
    let mut opts = match &cli.config {
        Some(path) => EngineOptions::from_file(path)?,
        None => EngineOptions::default(),
    };

    // Apply overrides
    if let Some(role) = cli.role {
        opts.role = role;
    }
    if let Some(workers) = cli.workers {
        opts.num_workers = workers;
    }
    if let Some(port) = cli.port {
        opts.port = port;
    }
    if !cli.shards.is_empty() {
        opts.shard_endpoints = cli.shards.clone();
    }
    if !cli.only_keys.is_empty() {
        opts.only_keys = cli.only_keys.clone();
    }
    if cli.run_db.is_some() {
        opts.run_db_path = cli.run_db.clone();
    }
    if cli.run_name.is_some() {
        opts.run_name = cli.run_name.clone();
    }
    Ok(opts)
}

#[tokio::main]
async fn main() -> Result<()> {
    shardflow::logging::init();

    let cli = Cli::parse();
    let engine = Engine::new(demo_pipeline(cli.count)?, options(&cli)?)?;
    let results = engine.run().await?;

    if let Some(total) = results.value::<i64>("total") {
        tracing::info!("total: {}", total);
    }
    if let Some(parity) = results.value::<BTreeMap<String, u64>>("parity") {
        tracing::info!("parity: {:?}", parity);
    }
    Ok(())
}
