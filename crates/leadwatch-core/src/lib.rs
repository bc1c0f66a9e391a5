pub mod action;
pub mod attention;
pub mod batch;
pub mod change;
pub mod collab;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod executor;
pub mod io;
pub mod operator;
pub mod poller;
pub mod router;
pub mod scheduler;
pub mod scoring;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod workflow;

pub use error::{LeadwatchError, Result};
