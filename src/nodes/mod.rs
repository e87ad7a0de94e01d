pub mod aggregator;
pub mod sink;
pub mod source;
pub mod transform;

pub use aggregator::{Addable, SharedSumAggregator, SumAggregator};
pub use sink::FuncSink;
pub use source::{FuncSource, RecordSource};
pub use transform::{FilterTransform, MapTransform, OneInOneOut, OneInOneOutKeyed};
