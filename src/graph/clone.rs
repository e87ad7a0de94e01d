use super::error::{GraphError, GraphResult};
use super::parents::{DependentMap, ParentMap};
use super::pipeline::Pipeline;
use crate::core::{FeedHandle, FeedId, Source};
use std::collections::HashMap;
use std::sync::Arc;

/// A copy of a pipeline graph plus the maps back to the template's feeds.
///
/// Built once per shard (`for_shard`: sources and aggregators replaced by
/// their shard instances) and once per worker from the shard copy
/// (`for_worker`: every dependent replaced by a private clone). The
/// `orig`/`clone_of` lookups always refer to the template feeds, so stats
/// and results are attributed to them no matter how deep the copy.
#[derive(Clone)]
pub struct PipeClone {
    parents: ParentMap,
    dependents: DependentMap,
    sources: Vec<Arc<dyn Source>>,
    orig_to_clone: HashMap<FeedId, FeedHandle>,
    clone_to_orig: HashMap<FeedId, FeedHandle>,
}

impl PipeClone {
    pub fn for_shard(pipeline: &Pipeline, shard: usize, total_shards: usize) -> GraphResult<Self> {
        let mut orig_to_clone = HashMap::new();
        let mut clone_to_orig = HashMap::new();

        for feed in pipeline.all_feeds() {
            let copy = shard_instance(&feed, shard, total_shards)?;
            orig_to_clone.insert(feed.id(), copy.clone());
            clone_to_orig.insert(copy.id(), feed);
        }

        let sources = pipeline
            .sources
            .iter()
            .map(|s| FeedHandle::source(s.clone()))
            .collect::<Vec<_>>();

        Self::assemble(&pipeline.parents, &sources, orig_to_clone, clone_to_orig)
    }

    /// Worker-private copy. Sources stay shared with the shard.
    pub fn for_worker(&self) -> GraphResult<Self> {
        let mut orig_to_clone = HashMap::new();
        let mut clone_to_orig = HashMap::new();

        for (orig_id, shard_copy) in &self.orig_to_clone {
            let copy = worker_instance(shard_copy)?;
            let orig = self.clone_to_orig[&shard_copy.id()].clone();
            orig_to_clone.insert(*orig_id, copy.clone());
            clone_to_orig.insert(copy.id(), orig);
        }

        let sources = self
            .sources
            .iter()
            .map(|s| self.orig_of_source(s))
            .collect::<Vec<_>>();
        let parents = self.template_parents();

        Self::assemble(&parents, &sources, orig_to_clone, clone_to_orig)
    }

    fn assemble(
        template: &ParentMap,
        template_sources: &[FeedHandle],
        orig_to_clone: HashMap<FeedId, FeedHandle>,
        clone_to_orig: HashMap<FeedId, FeedHandle>,
    ) -> GraphResult<Self> {
        let mut parents = ParentMap::new();
        for (child, parent) in template.edges() {
            parents.add(
                orig_to_clone[&parent.id()].clone(),
                orig_to_clone[&child.id()].clone(),
            );
        }

        let sources = template_sources
            .iter()
            .filter_map(|s| orig_to_clone[&s.id()].as_source().cloned())
            .collect();

        Ok(Self {
            dependents: parents.dependent_map(),
            parents,
            sources,
            orig_to_clone,
            clone_to_orig,
        })
    }

    /// The graph expressed in template feeds again
    fn template_parents(&self) -> ParentMap {
        let mut parents = ParentMap::new();
        for (child, parent) in self.parents.edges() {
            parents.add(
                self.clone_to_orig[&parent.id()].clone(),
                self.clone_to_orig[&child.id()].clone(),
            );
        }
        parents
    }

    fn orig_of_source(&self, source: &Arc<dyn Source>) -> FeedHandle {
        self.clone_to_orig[&FeedHandle::source(source.clone()).id()].clone()
    }

    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    pub fn parents(&self) -> &ParentMap {
        &self.parents
    }

    /// Dependents of a feed of this copy, in name order
    pub fn dependents(&self, feed: &FeedHandle) -> &[FeedHandle] {
        self.dependents.dependents(feed)
    }

    /// Template feed a feed of this copy stands in for
    pub fn orig(&self, copy: &FeedHandle) -> Option<&FeedHandle> {
        self.clone_to_orig.get(&copy.id())
    }

    /// This copy's instance of a template feed
    pub fn clone_of(&self, orig: &FeedHandle) -> Option<&FeedHandle> {
        self.orig_to_clone.get(&orig.id())
    }
}

fn shard_instance(feed: &FeedHandle, shard: usize, total_shards: usize) -> GraphResult<FeedHandle> {
    let shard_err = |err: anyhow::Error| GraphError::ShardClone {
        name: feed.name().to_string(),
        shard,
        total_shards,
        message: format!("{:#}", err),
    };

    match feed {
        FeedHandle::Source(s) => s
            .for_shard(shard, total_shards)
            .map(FeedHandle::Source)
            .map_err(shard_err),
        FeedHandle::Aggregator(a) => a
            .for_shard(shard, total_shards)
            .map(FeedHandle::Aggregator)
            .map_err(shard_err),
        other => Ok(other.clone()),
    }
}

fn worker_instance(feed: &FeedHandle) -> GraphResult<FeedHandle> {
    let copy = match feed {
        FeedHandle::Source(_) => return Ok(feed.clone()),
        FeedHandle::Transform(t) => t.clone_dependent(),
        FeedHandle::Aggregator(a) => a.clone_dependent(),
        FeedHandle::Sink(s) => s.clone_dependent(),
    };

    let copy = copy.ok_or_else(|| GraphError::NilClone(feed.name().to_string()))?;
    if !copy.same_kind(feed) {
        return Err(GraphError::CapabilityMismatch {
            name: feed.name().to_string(),
            expected: feed.kind(),
            got: copy.kind(),
        });
    }
    Ok(copy)
}
