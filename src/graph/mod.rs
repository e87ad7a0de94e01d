pub mod clone;
pub mod error;
pub mod parents;
pub mod pipeline;

pub use clone::PipeClone;
pub use error::{GraphError, GraphResult};
pub use parents::{DependentMap, ParentMap};
pub use pipeline::{Pipeline, ResultsFn};
