pub mod batch;
pub mod classify;
pub mod cmd;
pub mod config;
mod error;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod paths;
pub mod playlist;
pub mod probe;
pub mod process;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod session;
pub mod ytdlp;

pub use error::{EngineError, Result};
