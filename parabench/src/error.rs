use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the harness itself.
///
/// Task-level problems never show up here; they are counted in
/// [`RunOutcome`](crate::executor::RunOutcome) and logged instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("data size {requested} exceeds the dataset length {available}")]
    DataSizeExceedsDataset { requested: usize, available: usize },

    #[error("failed to spawn worker thread")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("background task failed to join")]
    Join(#[from] tokio::task::JoinError),

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV at line {line}: {reason}")]
    Csv { line: usize, reason: String },
}

/// Failure of a single benchmark task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Builds a [`TaskError::Panicked`] from a `catch_unwind` / join payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(message)
    }
}
