pub mod feed;
pub mod results;
pub mod sample;

pub use feed::{Aggregator, Dependent, Feed, FeedHandle, FeedId, Source, Transform};
pub use results::Results;
pub use sample::{coerce_error, new_error, wrap_error, Keyed, Record, Sample, SampleError};
