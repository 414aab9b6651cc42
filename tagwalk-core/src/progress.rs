//! Hooks for showing a cancellable "working..." indicator

use crate::command::CancelToken;

/// UI collaborator shown while a slow command runs.
///
/// `show` is called from the command's worker thread once the command has
/// outlived its grace period; cancelling `cancel` aborts the command.
/// `hide` follows once the process has exited or been killed.
pub trait ProgressIndicator: Send + Sync {
    fn show(&self, header: &str, cancel: CancelToken);
    fn hide(&self) {}
}

/// Indicator that displays nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressIndicator for NoProgress {
    fn show(&self, _header: &str, _cancel: CancelToken) {}
}
