use std::time::Duration;

use thiserror::Error;

use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Task execution failed: {0}")]
    Execution(String),

    #[error("Task exceeded its deadline of {0:?}")]
    TaskTimeout(Duration),

    #[error("Wait timed out after {0:?}")]
    WaitTimeout(Duration),

    #[error("Task cancelled: {0}")]
    Cancelled(String),

    #[error("Orchestrator is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, Error>;
