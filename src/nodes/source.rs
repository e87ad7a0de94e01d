use crate::core::{Feed, Record, Source};
use anyhow::{bail, Result};
use crossbeam_channel::{bounded, Receiver};
use std::any::Any;
use std::sync::{Arc, OnceLock};
use std::thread;

/// Capacity of the queue between a source's producer thread and its workers
pub const SOURCE_QUEUE_CAPACITY: usize = 256;

/// Finite, in-memory source.
///
/// A shard instance serves the records whose position satisfies
/// `index % total_shards == shard`, in order. On first use it starts a
/// producer thread that feeds them through a bounded channel, which any
/// number of workers may pull from at once.
pub struct RecordSource {
    name: String,
    records: Arc<Vec<Record>>,
    shard: usize,
    total_shards: usize,
    queue: OnceLock<Receiver<Record>>,
}

impl RecordSource {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Result<Self> {
        let name = name.into();
        if records.is_empty() {
            bail!("no records given to source {}", name);
        }
        Ok(Self::for_partition(name, Arc::new(records), 0, 1))
    }

    fn for_partition(name: String, records: Arc<Vec<Record>>, shard: usize, total_shards: usize) -> Self {
        Self {
            name,
            records,
            shard,
            total_shards,
            queue: OnceLock::new(),
        }
    }

    fn produce(&self) -> Receiver<Record> {
        let (tx, rx) = bounded(SOURCE_QUEUE_CAPACITY);
        let records = self.records.clone();
        let (shard, total_shards) = (self.shard, self.total_shards);
        thread::spawn(move || {
            let partition = records
                .iter()
                .enumerate()
                .filter(|(i, _)| i % total_shards == shard);
            for (_, record) in partition {
                // every receiver is gone: nobody is reading any more
                if tx.send(record.clone()).is_err() {
                    break;
                }
            }
        });
        rx
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Feed for RecordSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Source for RecordSource {
    fn for_shard(&self, shard: usize, total_shards: usize) -> Result<Arc<dyn Source>> {
        if total_shards == 0 || shard >= total_shards {
            bail!("invalid shard {} of {}", shard, total_shards);
        }
        Ok(Arc::new(Self::for_partition(
            self.name.clone(),
            self.records.clone(),
            shard,
            total_shards,
        )))
    }

    fn source_out(&self) -> Option<Record> {
        // the producer drops its sender once the partition is exhausted
        self.queue.get_or_init(|| self.produce()).recv().ok()
    }
}

pub type GeneratorFn = Arc<dyn Fn() -> Option<Record> + Send + Sync>;

/// Source backed by a generator function.
///
/// Every shard and worker pulls from the same generator, which therefore
/// has to be safe to call from several threads.
pub struct FuncSource {
    name: String,
    f: GeneratorFn,
}

impl FuncSource {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Option<Record> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

impl Feed for FuncSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Source for FuncSource {
    fn for_shard(&self, _shard: usize, _total_shards: usize) -> Result<Arc<dyn Source>> {
        Ok(Arc::new(Self {
            name: self.name.clone(),
            f: self.f.clone(),
        }))
    }

    fn source_out(&self) -> Option<Record> {
        (self.f)()
    }
}
