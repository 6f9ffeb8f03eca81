pub mod backend;
pub mod cli;
pub mod config;
pub mod debug;
pub mod executor;
pub mod formatter;
pub mod ledger;
pub mod orchestrator;
pub mod pack;
pub mod resolution;
pub mod workflow;

pub use rehearse_common::protocol;
