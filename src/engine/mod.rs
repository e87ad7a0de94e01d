pub mod coordinator;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod options;
pub mod runner;
pub mod state;
pub mod worker;

pub use coordinator::{finalize_aggregators, Coordinator, ShardApi, MAX_UNREACHABLE_POLLS};
pub use engine::{Engine, RunBook};
pub use options::{EngineOptions, Role};
pub use runner::{Runner, RunnerOptions};
pub use state::{RunState, RunStatus};
pub use worker::Worker;
