pub mod compaction;
pub mod config;
pub mod error;
pub mod failure;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod session;
pub mod types;

pub use error::{EngineError, Result};
