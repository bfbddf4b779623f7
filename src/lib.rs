pub mod aggregator;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod pdf;
pub mod registry;
pub mod report;
pub mod router;
pub mod server;
pub mod util;

pub use error::{Error, Result};
