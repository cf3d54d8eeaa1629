//! Errors surfaced by the runner and the CLI.

use tagsim_common::{SimError, SinkError};
use tagsim_model::ModelError;
use thiserror::Error;

/// Anything that can stop the `tagsim` binary.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Model files failed to load.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// The run aborted.
    #[error("simulation error: {0}")]
    Simulation(#[from] SimError),

    /// The output sink could not be opened.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Result serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad command-line arguments.
    #[error("configuration error: {0}")]
    Config(String),
}
