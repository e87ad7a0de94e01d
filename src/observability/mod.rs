pub mod collector;
pub mod metrics;
pub mod monitor;

pub use collector::{merge_stats, RunStats};
pub use metrics::{FeedError, FeedErrors, FeedStats, MAX_ERROR_SAMPLES};
pub use monitor::StatsReport;
