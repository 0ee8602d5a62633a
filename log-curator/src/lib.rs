pub mod classify;
pub mod cmd;
pub mod config;
pub mod context;
pub mod enumerate;
pub mod error;
pub mod intake;
pub mod job;
pub mod metrics_consts;
pub mod pipeline;
pub mod server;
pub mod sink;
pub mod transform;
