//! Error types for tagwalk operations

use std::path::PathBuf;

/// Failures that happen outside a running command.
///
/// Outcomes of a command that did start (cancelled, tool failure, stale
/// index, nothing found) are reported through
/// [`CommandStatus`](crate::CommandStatus) instead.
#[derive(Debug, thiserror::Error)]
pub enum TagwalkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No GTags database found for {}", .0.display())]
    DatabaseNotFound(PathBuf),

    #[error("GTags database {} is in use, try again later", .0.display())]
    DatabaseBusy(PathBuf),

    #[error("GTags database already exists in {}", .0.display())]
    DatabaseExists(PathBuf),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Settings parse error in {}: {message}", .path.display())]
    SettingsParse { path: PathBuf, message: String },

    #[error("Could not start command worker: {0}")]
    WorkerUnavailable(std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TagwalkError {
    /// True when the error means "retry later" rather than "broken".
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::DatabaseBusy(_))
    }
}
