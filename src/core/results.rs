use super::Sample;
use std::any::Any;
use std::collections::BTreeMap;

/// Final aggregation output of a run, keyed by aggregator name
#[derive(Debug, Clone, Default)]
pub struct Results {
    samples: BTreeMap<String, Sample>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, aggregator: impl Into<String>, sample: Sample) {
        self.samples.insert(aggregator.into(), sample);
    }

    pub fn get(&self, aggregator: &str) -> Option<&Sample> {
        self.samples.get(aggregator)
    }

    /// Typed view of an aggregator's result
    pub fn value<T: Any>(&self, aggregator: &str) -> Option<&T> {
        self.get(aggregator).and_then(|s| s.downcast_ref::<T>())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Sample)> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
