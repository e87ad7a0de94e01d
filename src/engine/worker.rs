use crate::core::{FeedHandle, Record, Sample};
use crate::graph::PipeClone;
use crate::observability::{FeedError, RunStats};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Drives records through one worker's private copy of the graph.
///
/// A record's whole downstream call tree runs on the worker's thread before
/// the next record is pulled.
pub struct Worker {
    id: usize,
    pipe: PipeClone,
    stats: Arc<RunStats>,
    only_keys: Arc<HashSet<String>>,
}

/// What a record is attributed to in error stats
struct Origin<'a> {
    source: &'a str,
    key: &'a str,
}

impl Worker {
    pub fn new(id: usize, pipe: PipeClone, stats: Arc<RunStats>, only_keys: Arc<HashSet<String>>) -> Self {
        Self {
            id,
            pipe,
            stats,
            only_keys,
        }
    }

    /// Drain every source until it is exhausted and return the number of
    /// records processed.
    pub fn run(&self) -> usize {
        let mut processed = 0;
        for source in self.pipe.sources() {
            let handle = FeedHandle::source(source.clone());
            let source_name = self.orig_name(&handle).to_string();

            while let Some(record) = source.source_out() {
                if !self.only_keys.is_empty() && !self.only_keys.contains(&record.key) {
                    continue;
                }
                self.process(&handle, &source_name, record);
                processed += 1;
            }
        }
        debug!(worker = self.id, processed, "worker drained all sources");
        processed
    }

    /// The worker's graph copy, holding its aggregator clones
    pub fn into_pipe(self) -> PipeClone {
        self.pipe
    }

    fn process(&self, source: &FeedHandle, source_name: &str, record: Record) {
        let origin = Origin {
            source: source_name,
            key: &record.key,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.emit(source, source_name, record.value.clone(), &origin)
        }));

        if let Err(payload) = outcome {
            error!(
                worker = self.id,
                source = source_name,
                key = %record.key,
                "panic while processing record"
            );
            panic::resume_unwind(payload);
        }
    }

    /// Account for `sample` as output of `feed` and push it to the feed's
    /// dependents, depth first.
    fn emit(&self, feed: &FeedHandle, feed_name: &str, sample: Sample, origin: &Origin<'_>) {
        if let Some(err) = sample.as_error() {
            self.stats.record_error(
                feed_name,
                &err.reason,
                FeedError::new(origin.source, origin.key, err.to_string()),
            );
            return;
        }
        self.stats.record_out(feed_name);

        for dependent in self.pipe.dependents(feed) {
            let name = self.orig_name(dependent);
            self.stats.record_in(name);
            dependent.input(sample.clone());

            if let FeedHandle::Transform(transform) = dependent {
                while let Some(out) = transform.transform_out() {
                    self.emit(dependent, name, out, origin);
                }
            }
        }
    }

    fn orig_name<'a>(&'a self, feed: &'a FeedHandle) -> &'a str {
        self.pipe.orig(feed).map_or(feed.name(), |orig| orig.name())
    }
}
