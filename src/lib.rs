//! Batch dataflow engine.
//!
//! A [`graph::Pipeline`] is a DAG of feeds: sources produce records,
//! transforms turn samples into more samples, aggregators fold them into a
//! result. An [`engine::Engine`] runs the pipeline in one process, or spreads
//! it over shard processes driven by a coordinator over HTTP.

pub mod core;
pub mod engine;
pub mod graph;
pub mod logging;
pub mod nodes;
pub mod observability;
pub mod rundb;
pub mod server;

pub use crate::core::{Record, Results, Sample};
pub use engine::{Engine, EngineOptions, Role};
pub use graph::{ParentMap, Pipeline};
