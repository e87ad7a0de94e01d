use super::error::{GraphError, GraphResult};
use super::parents::{sorted_by_name, ParentMap};
use crate::core::{Aggregator, FeedHandle, FeedId, Results, Source};
use crate::rundb::RunResult;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Turns a run's final aggregation into the values stored with the run
pub type ResultsFn = Arc<dyn Fn(&Results) -> Vec<RunResult> + Send + Sync>;

/// Immutable template of a dataflow job.
///
/// Engines never run the template's feeds directly; they run per-shard and
/// per-worker clones of them.
#[derive(Clone)]
pub struct Pipeline {
    pub name: String,
    pub parents: ParentMap,
    pub sources: Vec<Arc<dyn Source>>,
    pub params: BTreeMap<String, Value>,
    pub results_fn: Option<ResultsFn>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, parents: ParentMap, sources: Vec<Arc<dyn Source>>) -> Self {
        Self {
            name: name.into(),
            parents,
            sources,
            params: BTreeMap::new(),
            results_fn: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_results_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Results) -> Vec<RunResult> + Send + Sync + 'static,
    {
        self.results_fn = Some(Arc::new(f));
        self
    }

    /// Every feed in the graph plus the listed sources, sorted by name
    pub fn all_feeds(&self) -> Vec<FeedHandle> {
        let mut seen: HashMap<FeedId, FeedHandle> = HashMap::new();
        for feed in self.parents.feeds() {
            seen.insert(feed.id(), feed);
        }
        for source in &self.sources {
            let handle = FeedHandle::source(source.clone());
            seen.entry(handle.id()).or_insert(handle);
        }
        sorted_by_name(seen.into_values())
    }

    /// The listed sources, sorted by name
    pub fn sources(&self) -> Vec<Arc<dyn Source>> {
        sorted_by_name(self.sources.iter().map(|s| FeedHandle::source(s.clone())))
            .iter()
            .filter_map(|f| f.as_source().cloned())
            .collect()
    }

    pub fn aggregators(&self) -> Vec<Arc<dyn Aggregator>> {
        self.all_feeds()
            .iter()
            .filter_map(|f| f.as_aggregator().cloned())
            .collect()
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.name.is_empty() {
            return Err(GraphError::EmptyPipelineName);
        }

        let feeds = self.all_feeds();
        let mut names: HashMap<&str, FeedId> = HashMap::new();
        for feed in &feeds {
            if feed.name().is_empty() {
                return Err(GraphError::EmptyFeedName { kind: feed.kind() });
            }
            if let Some(id) = names.insert(feed.name(), feed.id()) {
                if id != feed.id() {
                    return Err(GraphError::DuplicateName(feed.name().to_string()));
                }
            }
        }

        let listed: HashSet<FeedId> = self
            .sources
            .iter()
            .map(|s| FeedHandle::source(s.clone()).id())
            .collect();

        for (child, parent) in self.parents.edges() {
            if !child.is_dependent() {
                return Err(GraphError::SourceHasParent(child.name().to_string()));
            }
            if !parent.is_dependent() && !listed.contains(&parent.id()) {
                return Err(GraphError::UnlistedSource(parent.name().to_string()));
            }
        }

        // each dependent must trace back to a source; this also rules out cycles
        for (child, _) in self.parents.edges() {
            let mut visited = HashSet::new();
            let mut current = child.clone();
            loop {
                if !current.is_dependent() {
                    break;
                }
                if !visited.insert(current.id()) {
                    return Err(GraphError::Unreachable(child.name().to_string()));
                }
                match self.parents.parent(&current) {
                    Some(parent) => current = parent.clone(),
                    None => return Err(GraphError::Unreachable(child.name().to_string())),
                }
            }
        }

        Ok(())
    }
}
