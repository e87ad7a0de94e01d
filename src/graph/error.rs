//! Errors raised while validating or cloning a pipeline graph.

use thiserror::Error;

/// Fatal problems with a pipeline definition, found before any record flows.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("pipeline name is empty")]
    EmptyPipelineName,

    #[error("a {kind} feed has an empty name")]
    EmptyFeedName { kind: &'static str },

    #[error("more than one feed is named {0:?}")]
    DuplicateName(String),

    #[error("source {0:?} cannot have a parent")]
    SourceHasParent(String),

    #[error("dependent {0:?} is not reachable from any source")]
    Unreachable(String),

    #[error("source {0:?} feeds dependents but is missing from the pipeline's sources")]
    UnlistedSource(String),

    #[error("clone of {0:?} returned nothing")]
    NilClone(String),

    #[error("clone of {name:?} is a {got}, expected a {expected}")]
    CapabilityMismatch {
        name: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("shard {shard}/{total_shards} instance of {name:?} failed: {message}")]
    ShardClone {
        name: String,
        shard: usize,
        total_shards: usize,
        message: String,
    },
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;
