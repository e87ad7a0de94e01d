use crate::core::{Dependent, Feed, FeedHandle, Sample};
use std::any::Any;
use std::sync::Arc;

pub type SinkFn = Arc<dyn Fn(Sample) + Send + Sync>;

/// Terminal dependent that hands every input to a function.
///
/// Worker clones share the function, so any state it captures is shared
/// across workers too.
pub struct FuncSink {
    name: String,
    f: SinkFn,
}

impl FuncSink {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Sample) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

impl Feed for FuncSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Dependent for FuncSink {
    fn clone_dependent(&self) -> Option<FeedHandle> {
        Some(FeedHandle::Sink(Arc::new(Self {
            name: self.name.clone(),
            f: self.f.clone(),
        })))
    }

    fn input(&self, sample: Sample) {
        (self.f)(sample)
    }
}
