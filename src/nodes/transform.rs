use crate::core::{Dependent, Feed, FeedHandle, Keyed, Sample, Transform};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Outputs waiting to be drained through `transform_out`
#[derive(Default)]
struct Pending(Mutex<VecDeque<Sample>>);

impl Pending {
    fn push(&self, sample: Sample) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(sample);
    }

    fn extend(&self, samples: Vec<Sample>) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(samples);
    }

    fn pop(&self) -> Option<Sample> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

pub type OneInOneOutFn = Arc<dyn Fn(Sample) -> Option<Sample> + Send + Sync>;
pub type MapFn = Arc<dyn Fn(Sample) -> Vec<Sample> + Send + Sync>;
pub type IncludeFn = Arc<dyn Fn(&Sample) -> bool + Send + Sync>;

/// At most one output per input
pub struct OneInOneOut {
    name: String,
    f: OneInOneOutFn,
    pending: Pending,
}

impl OneInOneOut {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Sample) -> Option<Sample> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
            pending: Pending::default(),
        }
    }
}

impl Feed for OneInOneOut {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Dependent for OneInOneOut {
    fn clone_dependent(&self) -> Option<FeedHandle> {
        Some(FeedHandle::Transform(Arc::new(Self {
            name: self.name.clone(),
            f: self.f.clone(),
            pending: Pending::default(),
        })))
    }

    fn input(&self, sample: Sample) {
        if let Some(out) = (self.f)(sample) {
            self.pending.push(out);
        }
    }
}

impl Transform for OneInOneOut {
    fn transform_out(&self) -> Option<Sample> {
        self.pending.pop()
    }
}

/// Like `OneInOneOut`, but looks inside `Keyed` inputs and re-attaches the
/// key to whatever the function returns, errors included.
pub struct OneInOneOutKeyed {
    name: String,
    f: OneInOneOutFn,
    pending: Pending,
}

impl OneInOneOutKeyed {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Sample) -> Option<Sample> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
            pending: Pending::default(),
        }
    }
}

impl Feed for OneInOneOutKeyed {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Dependent for OneInOneOutKeyed {
    fn clone_dependent(&self) -> Option<FeedHandle> {
        Some(FeedHandle::Transform(Arc::new(Self {
            name: self.name.clone(),
            f: self.f.clone(),
            pending: Pending::default(),
        })))
    }

    fn input(&self, sample: Sample) {
        let out = match sample.downcast_ref::<Keyed>() {
            Some(keyed) => {
                (self.f)(keyed.sample.clone()).map(|out| Sample::keyed(keyed.key.clone(), out))
            }
            None => (self.f)(sample),
        };
        if let Some(out) = out {
            self.pending.push(out);
        }
    }
}

impl Transform for OneInOneOutKeyed {
    fn transform_out(&self) -> Option<Sample> {
        self.pending.pop()
    }
}

/// Any number of outputs per input
pub struct MapTransform {
    name: String,
    f: MapFn,
    pending: Pending,
}

impl MapTransform {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Sample) -> Vec<Sample> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
            pending: Pending::default(),
        }
    }
}

impl Feed for MapTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Dependent for MapTransform {
    fn clone_dependent(&self) -> Option<FeedHandle> {
        Some(FeedHandle::Transform(Arc::new(Self {
            name: self.name.clone(),
            f: self.f.clone(),
            pending: Pending::default(),
        })))
    }

    fn input(&self, sample: Sample) {
        self.pending.extend((self.f)(sample));
    }
}

impl Transform for MapTransform {
    fn transform_out(&self) -> Option<Sample> {
        self.pending.pop()
    }
}

/// Passes through the inputs the predicate accepts
pub struct FilterTransform {
    name: String,
    f: IncludeFn,
    pending: Pending,
}

impl FilterTransform {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Sample) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
            pending: Pending::default(),
        }
    }
}

impl Feed for FilterTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Dependent for FilterTransform {
    fn clone_dependent(&self) -> Option<FeedHandle> {
        Some(FeedHandle::Transform(Arc::new(Self {
            name: self.name.clone(),
            f: self.f.clone(),
            pending: Pending::default(),
        })))
    }

    fn input(&self, sample: Sample) {
        if (self.f)(&sample) {
            self.pending.push(sample);
        }
    }
}

impl Transform for FilterTransform {
    fn transform_out(&self) -> Option<Sample> {
        self.pending.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::new_error;

    fn drain(t: &dyn Transform) -> Vec<Sample> {
        std::iter::from_fn(|| t.transform_out()).collect()
    }

    #[test]
    fn test_map_fans_out() {
        let t = MapTransform::new("twice", |s| vec![s.clone(), s]);
        t.input(Sample::new(3i64));
        let out = drain(&t);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|s| s.downcast_ref::<i64>() == Some(&3)));
        assert!(t.transform_out().is_none());
    }

    #[test]
    fn test_filter() {
        let t = FilterTransform::new("even", |s| s.downcast_ref::<i64>().map_or(false, |v| v % 2 == 0));
        t.input(Sample::new(1i64));
        assert!(drain(&t).is_empty());
        t.input(Sample::new(2i64));
        assert_eq!(drain(&t).len(), 1);
    }

    #[test]
    fn test_keyed_rewraps_errors() {
        let t = OneInOneOutKeyed::new("parse", |_| Some(new_error("unparseable")));
        t.input(Sample::keyed("a.py", Sample::new("src".to_string())));

        let out = drain(&t);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].downcast_ref::<Keyed>().unwrap().key, "a.py");
        assert_eq!(out[0].as_error().unwrap().reason, "unparseable");
    }

    #[test]
    fn test_clone_has_private_buffer() {
        let t = OneInOneOut::new("id", Some);
        t.input(Sample::new(1i64));

        let copy = t.clone_dependent().unwrap();
        let copy = copy.as_transform().unwrap();
        assert!(copy.transform_out().is_none());
        assert!(t.transform_out().is_some());
    }
}
