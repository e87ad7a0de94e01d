use shardflow::core::{Aggregator, Dependent, Feed, FeedHandle, Record, Sample, Source, Transform};
use shardflow::engine::{Coordinator, RunBook, RunState, Runner, RunnerOptions, ShardApi};
use shardflow::graph::{ParentMap, Pipeline};
use shardflow::nodes::{RecordSource, SumAggregator};
use shardflow::rundb::{JsonRunDb, RunDb, RunInfoStatus};
use shardflow::server::{self, ShardClient, StartRequest};
use std::any::Any;
use std::sync::Arc;
use tempfile::TempDir;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;

fn sum_pipeline(n: i64) -> (Pipeline, Arc<dyn Aggregator>) {
    let records = (1..=n)
        .map(|i| Record::new(i.to_string(), Sample::new(i)))
        .collect();
    let source: Arc<dyn Source> = Arc::new(RecordSource::new("numbers", records).unwrap());
    let sum: Arc<dyn Aggregator> = Arc::new(SumAggregator::new("sum", || 0i64, |s| {
        *s.downcast_ref::<i64>().unwrap()
    }));

    let mut parents = ParentMap::new();
    parents.add(FeedHandle::source(source.clone()), FeedHandle::aggregator(sum.clone()));
    (Pipeline::new("sum", parents, vec![source]), sum)
}

/// Start a shard server on an ephemeral port and return a client for it
async fn spawn_shard(pipeline: &Pipeline) -> ShardClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let runner = Arc::new(Runner::new(
        pipeline.clone(),
        RunnerOptions {
            num_workers: 2,
            only_keys: Vec::new(),
        },
    ));
    tokio::spawn(server::serve(listener, runner, None));
    ShardClient::new(format!("http://{}/", addr))
}

#[tokio::test]
async fn test_shard_api_round_trip() {
    let (pipeline, sum) = sum_pipeline(3);
    let client = spawn_shard(&pipeline).await;

    let status = client.status().await.unwrap();
    assert_eq!(status.state, RunState::Waiting);
    assert!(status.err.is_none());

    // no results before the run
    let err = client.results().await.unwrap_err();
    assert!(err.to_string().contains("409"));

    client
        .start(StartRequest {
            shard: 0,
            total_shards: 1,
        })
        .await
        .unwrap();

    for _ in 0..200 {
        if client.status().await.unwrap().state == RunState::Finished {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let status = client.status().await.unwrap();
    assert_eq!(status.state, RunState::Finished);
    assert!(status.err.is_none());

    let results = client.results().await.unwrap();
    let sample = sum.from_json(&results.serialized_results["sum"]).unwrap();
    assert_eq!(sample.downcast_ref::<i64>(), Some(&6));

    let stats = client.feed_stats().await.unwrap();
    assert_eq!(stats["numbers"].outputs, 3);
    assert_eq!(stats["sum"].inputs, 3);
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let (pipeline, _) = sum_pipeline(3);
    let client = spawn_shard(&pipeline).await;
    let req = StartRequest {
        shard: 0,
        total_shards: 1,
    };

    client.start(req).await.unwrap();
    let err = client.start(req).await.unwrap_err();
    assert!(err.to_string().contains("409"));
}

#[tokio::test]
async fn test_bad_shard_index_rejected() {
    let (pipeline, _) = sum_pipeline(3);
    let client = spawn_shard(&pipeline).await;

    let err = client
        .start(StartRequest {
            shard: 4,
            total_shards: 2,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("400"));
    assert_eq!(client.status().await.unwrap().state, RunState::Waiting);
}

#[tokio::test]
async fn test_coordinator_over_http() {
    let (pipeline, _) = sum_pipeline(100);
    let mut shards: Vec<Arc<dyn ShardApi>> = Vec::new();
    for _ in 0..2 {
        shards.push(Arc::new(spawn_shard(&pipeline).await));
    }

    let coordinator = Coordinator::new(pipeline, shards, Duration::from_millis(10));
    let (results, feed_stats) = coordinator.run().await.unwrap();

    assert_eq!(results.value::<i64>("sum"), Some(&5050));
    assert_eq!(feed_stats["numbers"].outputs, 100);
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
async fn test_failed_start_is_recorded() {
    let dir = TempDir::new().unwrap();
    let records = vec![Record::new("1", Sample::new(1i64))];
    let source: Arc<dyn Source> = Arc::new(RecordSource::new("numbers", records).unwrap());
    let mut parents = ParentMap::new();
    parents.add(
        FeedHandle::source(source.clone()),
        FeedHandle::transform(Arc::new(Uncloneable)),
    );
    let pipeline = Pipeline::new("broken", parents, vec![source]);

    let db: Arc<dyn RunDb> = Arc::new(JsonRunDb::new(dir.path()).unwrap());
    let book = Arc::new(RunBook::new(db, &pipeline, "attempt"));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let runner = Arc::new(Runner::new(
        pipeline,
        RunnerOptions {
            num_workers: 2,
            only_keys: Vec::new(),
        },
    ));
    tokio::spawn(server::serve(listener, runner, Some(book)));
    let client = ShardClient::new(format!("http://{}", addr));

    let err = client
        .start(StartRequest {
            shard: 0,
            total_shards: 1,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("500"));

    let status = client.status().await.unwrap();
    assert!(status.err.unwrap().contains("returned nothing"));

    let run = JsonRunDb::new(dir.path()).unwrap().load("broken", "attempt").unwrap();
    assert_eq!(run.status, RunInfoStatus::Error);
    assert!(run.error.unwrap().contains("returned nothing"));
}
