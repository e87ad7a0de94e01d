pub mod client;
pub mod handlers;
pub mod wire;

pub use client::ShardClient;
pub use handlers::{router, serve, ShardState};
pub use wire::{ResultsResponse, StartRequest, StatusResponse};
