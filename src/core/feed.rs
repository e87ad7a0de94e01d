use super::{Record, Sample};
use anyhow::Result;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Base trait for every node of a pipeline graph
pub trait Feed: Send + Sync + 'static {
    /// Globally unique, non-empty name. Stats and results are reported under it.
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// Produces the records that drive a pipeline.
///
/// `source_out` is called concurrently by every worker on a shard, so
/// implementations must synchronize internally (usually a channel).
pub trait Source: Feed {
    /// Instance that only yields this shard's portion of the input
    fn for_shard(&self, shard: usize, total_shards: usize) -> Result<Arc<dyn Source>>;

    /// Next record, or `None` once the stream is exhausted
    fn source_out(&self) -> Option<Record>;
}

/// A feed with exactly one parent that receives its parent's output
pub trait Dependent: Feed {
    /// Private copy for a single worker. Must return a handle of the same
    /// kind as `self`.
    fn clone_dependent(&self) -> Option<FeedHandle>;

    fn input(&self, sample: Sample);
}

/// Dependent that emits samples to its own dependents.
///
/// After each `input`, the caller drains `transform_out` until it returns
/// `None`, so one input may yield any number of outputs.
pub trait Transform: Dependent {
    fn transform_out(&self) -> Option<Sample>;
}

/// Dependent that accumulates a result.
///
/// Aggregation runs in two phases: `aggregate_local` merges a shard's worker
/// clones, then (distributed runs only) the coordinator folds each shard's
/// result into a running total with `aggregate_from_shard`, in shard
/// endpoint order, and calls `finalize` once at the end.
pub trait Aggregator: Dependent {
    fn for_shard(&self, shard: usize, total_shards: usize) -> Result<Arc<dyn Aggregator>>;

    fn aggregate_local(&self, clones: &[Arc<dyn Aggregator>]) -> Result<Sample>;

    fn to_json(&self, sample: &Sample) -> Result<Vec<u8>>;

    fn from_json(&self, data: &[u8]) -> Result<Sample>;

    /// `agg` is `None` for the first shard, which seeds the total
    fn aggregate_from_shard(
        &self,
        agg: Option<Sample>,
        shard_sample: Sample,
        endpoint: &str,
    ) -> Result<Sample>;

    fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

/// Identity of a feed instance (the address of its allocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId(usize);

/// A feed tagged with its capability
#[derive(Clone)]
pub enum FeedHandle {
    Source(Arc<dyn Source>),
    Transform(Arc<dyn Transform>),
    Aggregator(Arc<dyn Aggregator>),
    /// Terminal dependent with no outputs
    Sink(Arc<dyn Dependent>),
}

impl FeedHandle {
    pub fn source(source: Arc<dyn Source>) -> Self {
        Self::Source(source)
    }

    pub fn transform(transform: Arc<dyn Transform>) -> Self {
        Self::Transform(transform)
    }

    pub fn aggregator(aggregator: Arc<dyn Aggregator>) -> Self {
        Self::Aggregator(aggregator)
    }

    pub fn sink(sink: Arc<dyn Dependent>) -> Self {
        Self::Sink(sink)
    }

    pub fn id(&self) -> FeedId {
        let ptr = match self {
            Self::Source(f) => Arc::as_ptr(f) as *const (),
            Self::Transform(f) => Arc::as_ptr(f) as *const (),
            Self::Aggregator(f) => Arc::as_ptr(f) as *const (),
            Self::Sink(f) => Arc::as_ptr(f) as *const (),
        };
        FeedId(ptr as usize)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Source(f) => f.name(),
            Self::Transform(f) => f.name(),
            Self::Aggregator(f) => f.name(),
            Self::Sink(f) => f.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Transform(_) => "transform",
            Self::Aggregator(_) => "aggregator",
            Self::Sink(_) => "sink",
        }
    }

    pub fn same_kind(&self, other: &FeedHandle) -> bool {
        self.kind() == other.kind()
    }

    pub fn is_dependent(&self) -> bool {
        !matches!(self, Self::Source(_))
    }

    /// Deliver a sample to this feed. Sources take no input and ignore it.
    pub fn input(&self, sample: Sample) {
        match self {
            Self::Source(_) => {}
            Self::Transform(f) => f.input(sample),
            Self::Aggregator(f) => f.input(sample),
            Self::Sink(f) => f.input(sample),
        }
    }

    pub fn as_source(&self) -> Option<&Arc<dyn Source>> {
        match self {
            Self::Source(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_transform(&self) -> Option<&Arc<dyn Transform>> {
        match self {
            Self::Transform(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_aggregator(&self) -> Option<&Arc<dyn Aggregator>> {
        match self {
            Self::Aggregator(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.kind(), self.name())
    }
}

impl PartialEq for FeedHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for FeedHandle {}
