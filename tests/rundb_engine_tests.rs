use serde_json::json;
use anyhow::{bail, Result};
use shardflow::core::{Aggregator, Dependent, Feed, FeedHandle, Record, Sample, Source, Transform};
use shardflow::engine::{Engine, EngineOptions, Role};
use shardflow::graph::{ParentMap, Pipeline};
use shardflow::nodes::{RecordSource, SumAggregator};
use shardflow::rundb::{JsonRunDb, RunDb, RunInfo, RunInfoStatus, RunResult};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn numbers(n: i64) -> Arc<dyn Source> {
    let records = (1..=n)
        .map(|i| Record::new(i.to_string(), Sample::new(i)))
        .collect();
    Arc::new(RecordSource::new("numbers", records).unwrap())
}

fn sum_pipeline() -> Pipeline {
    let source = numbers(3);
    let mut parents = ParentMap::new();
    parents.add(
        FeedHandle::source(source.clone()),
        FeedHandle::aggregator(Arc::new(SumAggregator::new("sum", || 0i64, |s| {
            *s.downcast_ref::<i64>().unwrap()
        }))),
    );
    Pipeline::new("sums", parents, vec![source])
        .with_param("limit", 3)
        .with_results_fn(|results| {
            vec![RunResult::new("Total", "sum", *results.value::<i64>("sum").unwrap())]
        })
}

fn options(dir: &TempDir, run_name: Option<&str>) -> EngineOptions {
    EngineOptions {
        role: Role::Standalone,
        num_workers: 2,
        run_db_path: Some(dir.path().to_path_buf()),
        run_name: run_name.map(str::to_string),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_standalone_run_is_recorded() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(sum_pipeline(), options(&dir, Some("first"))).unwrap();

    let results = engine.run().await.unwrap();
    assert_eq!(results.value::<i64>("sum"), Some(&6));

    let db = JsonRunDb::new(dir.path()).unwrap();
    let run = db.load("sums", "first").unwrap();
    assert_eq!(run.status, RunInfoStatus::Finished);
    assert_eq!(run.params["limit"], json!(3));
    assert_eq!(run.results, vec![RunResult::new("Total", "sum", 6)]);
    assert_eq!(run.feed_stats["sum"].inputs, 3);
    assert!(run.error.is_none());
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_nothing_recorded_without_run_name() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(sum_pipeline(), options(&dir, None)).unwrap();
    engine.run().await.unwrap();

    let db = JsonRunDb::new(dir.path()).unwrap();
    assert!(db.list("sums").unwrap().is_empty());
}

struct Uncloneable;

impl Feed for Uncloneable {
    fn name(&self) -> &str {
        "uncloneable"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Dependent for Uncloneable {
    fn clone_dependent(&self) -> Option<FeedHandle> {
        None
    }

    fn input(&self, _sample: Sample) {}
}

impl Transform for Uncloneable {
    fn transform_out(&self) -> Option<Sample> {
        None
    }
}

#[tokio::test]
async fn test_failed_run_is_recorded() {
    let dir = TempDir::new().unwrap();
    let source = numbers(3);
    let mut parents = ParentMap::new();
    parents.add(
        FeedHandle::source(source.clone()),
        FeedHandle::transform(Arc::new(Uncloneable)),
    );
    let pipeline = Pipeline::new("broken", parents, vec![source]);

    let engine = Engine::new(pipeline, options(&dir, Some("attempt"))).unwrap();
    let err = engine.run().await.unwrap_err();
    assert!(format!("{:#}", err).contains("returned nothing"));

    let run = JsonRunDb::new(dir.path()).unwrap().load("broken", "attempt").unwrap();
    assert_eq!(run.status, RunInfoStatus::Error);
    assert!(run.error.unwrap().contains("returned nothing"));
}

#[tokio::test]
async fn test_engine_rejects_invalid_pipeline() {
    let source = numbers(3);
    let pipeline = Pipeline::new("", ParentMap::new(), vec![source]);
    assert!(Engine::new(pipeline, EngineOptions::default()).is_err());
}

#[tokio::test]
async fn test_engine_rejects_coordinator_without_shards() {
    let opts = EngineOptions {
        role: Role::Coordinator,
        ..Default::default()
    };
    assert!(Engine::new(sum_pipeline(), opts).is_err());
}

#[test]
fn test_list_orders_runs_by_start() {
    let dir = TempDir::new().unwrap();
    let db = JsonRunDb::new(dir.path()).unwrap();

    let mut older = RunInfo::started("p", "b-run", Default::default());
    let newer = RunInfo::started("p", "a-run", Default::default());
    older.started_at = newer.started_at - chrono::Duration::seconds(60);

    db.save_run(&newer).unwrap();
    db.save_run(&older).unwrap();

    let names: Vec<_> = db.list("p").unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["b-run", "a-run"]);
    assert!(db.list("other").unwrap().is_empty());
}

/// Integer sum that counts `finalize` calls, and can be told to fail them
struct MarkedSum {
    inner: SumAggregator<i64>,
    finalized: Arc<AtomicUsize>,
    fail: bool,
}

impl MarkedSum {
    fn new(finalized: Arc<AtomicUsize>, fail: bool) -> Self {
        Self {
            inner: SumAggregator::new("sum", || 0i64, |s| *s.downcast_ref::<i64>().unwrap()),
            finalized,
            fail,
        }
    }
}

impl Feed for MarkedSum {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Dependent for MarkedSum {
    fn clone_dependent(&self) -> Option<FeedHandle> {
        self.inner.clone_dependent()
    }

    fn input(&self, sample: Sample) {
        self.inner.input(sample)
    }
}

impl Aggregator for MarkedSum {
    fn for_shard(&self, shard: usize, total_shards: usize) -> Result<Arc<dyn Aggregator>> {
        self.inner.for_shard(shard, total_shards)
    }

    fn aggregate_local(&self, clones: &[Arc<dyn Aggregator>]) -> Result<Sample> {
        self.inner.aggregate_local(clones)
    }

    fn to_json(&self, sample: &Sample) -> Result<Vec<u8>> {
        self.inner.to_json(sample)
    }

    fn from_json(&self, data: &[u8]) -> Result<Sample> {
        self.inner.from_json(data)
    }

    fn aggregate_from_shard(&self, agg: Option<Sample>, shard_sample: Sample, endpoint: &str) -> Result<Sample> {
        self.inner.aggregate_from_shard(agg, shard_sample, endpoint)
    }

    fn finalize(&self) -> Result<()> {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("could not write done marker");
        }
        Ok(())
    }
}

fn marked_pipeline(finalized: Arc<AtomicUsize>, fail: bool) -> Pipeline {
    let source = numbers(3);
    let mut parents = ParentMap::new();
    parents.add(
        FeedHandle::source(source.clone()),
        FeedHandle::aggregator(Arc::new(MarkedSum::new(finalized, fail))),
    );
    Pipeline::new("marked", parents, vec![source])
}

#[tokio::test]
async fn test_standalone_run_finalizes_once() {
    let finalized = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(marked_pipeline(finalized.clone(), false), EngineOptions {
        role: Role::Standalone,
        num_workers: 2,
        ..Default::default()
    })
    .unwrap();

    let results = engine.run().await.unwrap();
    assert_eq!(results.value::<i64>("sum"), Some(&6));
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_finalize_error_fails_recorded_run() {
    let dir = TempDir::new().unwrap();
    let finalized = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(marked_pipeline(finalized.clone(), true), options(&dir, Some("marker"))).unwrap();

    let err = engine.run().await.unwrap_err();
    assert!(format!("{:#}", err).contains("could not write done marker"));
    assert_eq!(finalized.load(Ordering::SeqCst), 1);

    let run = JsonRunDb::new(dir.path()).unwrap().load("marked", "marker").unwrap();
    assert_eq!(run.status, RunInfoStatus::Error);
    assert!(run.error.unwrap().contains("failed to finalize sum"));
    assert_eq!(run.feed_stats["sum"].inputs, 3);
}
