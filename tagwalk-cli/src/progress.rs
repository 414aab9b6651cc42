use colored::Colorize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use tagwalk_core::{CancelToken, ProgressIndicator};

/// Status line on stderr while a slow command runs
pub struct TerminalProgress {
    quiet: bool,
    visible: AtomicBool,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            visible: AtomicBool::new(false),
        }
    }
}

impl ProgressIndicator for TerminalProgress {
    fn show(&self, header: &str, _cancel: CancelToken) {
        if self.quiet {
            return;
        }
        self.visible.store(true, Ordering::Release);
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "{} {}", header.dimmed(), "...".dimmed());
        let _ = stderr.flush();
    }

    fn hide(&self) {
        if self.visible.swap(false, Ordering::AcqRel) {
            eprintln!();
        }
    }
}
