use crate::core::{FeedHandle, FeedId};
use std::collections::HashMap;

#[derive(Clone)]
struct Edge {
    child: FeedHandle,
    parent: FeedHandle,
}

/// Edges of a pipeline graph, recorded as child -> parent.
///
/// Every dependent has exactly one parent; adding a child a second time
/// replaces its parent.
#[derive(Clone, Default)]
pub struct ParentMap {
    edges: HashMap<FeedId, Edge>,
}

impl ParentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `parent -> child` and return the child
    pub fn add(&mut self, parent: FeedHandle, child: FeedHandle) -> FeedHandle {
        self.edges.insert(
            child.id(),
            Edge {
                child: child.clone(),
                parent,
            },
        );
        child
    }

    /// Link `head -> tail[0] -> tail[1] -> ...` and return the last feed,
    /// so a chain can be continued or branched later.
    pub fn chain(
        &mut self,
        head: FeedHandle,
        tail: impl IntoIterator<Item = FeedHandle>,
    ) -> FeedHandle {
        let mut last = head;
        for feed in tail {
            last = self.add(last, feed);
        }
        last
    }

    pub fn parent(&self, child: &FeedHandle) -> Option<&FeedHandle> {
        self.edges.get(&child.id()).map(|e| &e.parent)
    }

    /// (child, parent) pairs in no particular order
    pub fn edges(&self) -> impl Iterator<Item = (&FeedHandle, &FeedHandle)> {
        self.edges.values().map(|e| (&e.child, &e.parent))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every feed mentioned on either end of an edge, sorted by name
    pub fn feeds(&self) -> Vec<FeedHandle> {
        let mut seen: HashMap<FeedId, FeedHandle> = HashMap::new();
        for edge in self.edges.values() {
            seen.entry(edge.child.id())
                .or_insert_with(|| edge.child.clone());
            seen.entry(edge.parent.id())
                .or_insert_with(|| edge.parent.clone());
        }
        sorted_by_name(seen.into_values())
    }

    /// Inverse view: parent -> children, children sorted by name
    pub fn dependent_map(&self) -> DependentMap {
        let mut children: HashMap<FeedId, Vec<FeedHandle>> = HashMap::new();
        for edge in self.edges.values() {
            children
                .entry(edge.parent.id())
                .or_default()
                .push(edge.child.clone());
        }
        for deps in children.values_mut() {
            deps.sort_by(|a, b| a.name().cmp(b.name()).then(a.id().cmp(&b.id())));
        }
        DependentMap { children }
    }
}

/// Parent -> dependents, in a reproducible (name) order
#[derive(Clone, Default)]
pub struct DependentMap {
    children: HashMap<FeedId, Vec<FeedHandle>>,
}

impl DependentMap {
    pub fn dependents(&self, parent: &FeedHandle) -> &[FeedHandle] {
        self.children
            .get(&parent.id())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

pub(crate) fn sorted_by_name(feeds: impl IntoIterator<Item = FeedHandle>) -> Vec<FeedHandle> {
    let mut feeds: Vec<FeedHandle> = feeds.into_iter().collect();
    feeds.sort_by(|a, b| a.name().cmp(b.name()).then(a.id().cmp(&b.id())));
    feeds
}
