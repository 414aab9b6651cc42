//! Asynchronous execution of commands against the GTags tools
//!
//! Each command gets a worker thread that spawns the tool, drains its output
//! pipes, waits for exit or cancellation, releases the database lock, parses
//! the output and posts the finished command back to the issuing thread.

mod cmdline;

pub use cmdline::{CommandLine, ToolPaths, GTAGS_CONF};

use crate::command::{CancelToken, Command, CommandStatus, Operation};
use crate::database::{Database, DatabaseRegistry};
use crate::dispatch::DispatchHandle;
use crate::parser::ParseOutcome;
use crate::pipe::PipeReader;
use crate::progress::{NoProgress, ProgressIndicator};
use crate::TagwalkError;
use std::io;
use std::process::Child;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Grace period before a query shows its progress indicator
pub const PROGRESS_DELAY: Duration = Duration::from_millis(300);

/// Longest gap between exit checks while a process runs
const REAP_INTERVAL: Duration = Duration::from_millis(20);

/// Callback receiving the finished command on the issuing thread
pub type Completion = Box<dyn FnOnce(Arc<Command>) + Send + 'static>;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Starts a command's worker. On error the job is dropped unrun.
type Spawner = Arc<dyn Fn(Job) -> io::Result<()> + Send + Sync>;

fn spawn_thread(job: Job) -> io::Result<()> {
    thread::Builder::new()
        .name("tagwalk-cmd".to_string())
        .spawn(job)
        .map(drop)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Exited,
    Cancelled,
    TimedOut,
}

/// Runs commands on worker threads.
///
/// Cheap to clone; clones share the registry, tool paths, dispatcher and
/// progress indicator.
#[derive(Clone)]
pub struct CommandEngine {
    registry: Arc<DatabaseRegistry>,
    tools: ToolPaths,
    dispatch: DispatchHandle,
    progress: Arc<dyn ProgressIndicator>,
    progress_delay: Duration,
    spawn: Spawner,
}

impl CommandEngine {
    pub fn new(registry: Arc<DatabaseRegistry>, tools: ToolPaths, dispatch: DispatchHandle) -> Self {
        Self {
            registry,
            tools,
            dispatch,
            progress: Arc::new(NoProgress),
            progress_delay: PROGRESS_DELAY,
            spawn: Arc::new(spawn_thread),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressIndicator>) -> Self {
        self.progress = progress;
        self
    }

    /// Override the grace period before queries show progress
    pub fn with_progress_delay(mut self, delay: Duration) -> Self {
        self.progress_delay = delay;
        self
    }

    #[cfg(test)]
    fn with_spawner(mut self, spawn: Spawner) -> Self {
        self.spawn = spawn;
        self
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Start `cmd` on a worker thread.
    ///
    /// The command's database must already be locked in the mode its
    /// operation needs; the engine releases it. `on_complete` runs exactly
    /// once on the dispatcher's thread. If no worker can be started the lock
    /// is released here, `on_complete` is dropped uncalled, and
    /// `WorkerUnavailable` is returned.
    pub fn run<F>(&self, cmd: Command, on_complete: F) -> crate::Result<()>
    where
        F: FnOnce(Arc<Command>) + Send + 'static,
    {
        let database = cmd.database().cloned();
        let engine = self.clone();
        let completion: Completion = Box::new(on_complete);

        match (self.spawn)(Box::new(move || engine.execute(cmd, completion))) {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "failed to start command worker");
                if let Some(db) = database {
                    self.registry.release(&db);
                }
                Err(TagwalkError::WorkerUnavailable(e))
            }
        }
    }

    /// Start the oldest queued single-file update on `db` if it is free.
    ///
    /// Returns false when the queue is empty or the database is locked. The
    /// update's own lock release starts the next one, so the queue drains
    /// one file at a time. If the worker cannot start, the file goes back to
    /// the front of the queue and the error is returned.
    pub fn run_scheduled_update(&self, db: &Arc<Database>) -> crate::Result<bool> {
        let Some(file) = db.take_scheduled_update() else {
            return Ok(false);
        };
        tracing::debug!(file = %file.display(), root = %db.path().display(), "running scheduled update");

        let cmd = Command::new(Operation::UpdateSingleFile, file.to_string_lossy()).on(Arc::clone(db));
        match self.run(cmd, |cmd| {
            tracing::debug!(file = cmd.tag(), status = %cmd.status(), "scheduled update finished");
        }) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "scheduled update not started");
                db.requeue_update(file);
                Err(e)
            }
        }
    }

    fn execute(self, mut cmd: Command, on_complete: Completion) {
        let span = tracing::debug_span!("command", op = ?cmd.operation(), tag = cmd.tag());
        let _enter = span.enter();

        cmd.start();
        self.run_process(&mut cmd);
        self.release_database(&cmd);

        if !cmd.status().is_terminal() {
            parse_output(&mut cmd);
        }

        if cmd.operation() == Operation::CreateIndex && cmd.status() == CommandStatus::Ok {
            if let Some(db) = cmd.database() {
                if let Err(e) = db.save_config() {
                    tracing::warn!(root = %db.path().display(), error = %e, "failed to save database config");
                }
            }
        }

        tracing::debug!(status = %cmd.status(), bytes = cmd.output().len(), "command finished");
        let cmd = Arc::new(cmd);
        self.dispatch.post(move || on_complete(cmd));
    }

    /// Spawn the tool and collect its output. Leaves the command `Running`
    /// unless it already reached a final state.
    fn run_process(&self, cmd: &mut Command) {
        let cancel = cmd.cancel_token().clone();
        if cancel.is_cancelled() {
            cmd.finish(CommandStatus::Cancelled);
            return;
        }

        let line = CommandLine::build(cmd, &self.tools);
        tracing::debug!(cmdline = %line, "starting tool");

        let pipes = PipeReader::pipe().and_then(|out| PipeReader::pipe().map(|err| (out, err)));
        let ((mut stdout, stdout_w), (mut stderr, stderr_w)) = match pipes {
            Ok(pipes) => pipes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to create output pipes");
                cmd.finish(CommandStatus::RunError);
                return;
            }
        };

        // The builder holds the write ends; dropping it leaves the child as
        // the only writer so the readers see end-of-stream on exit.
        let spawned = {
            let mut process = line.to_process();
            process.stdout(stdout_w).stderr(stderr_w);
            process.spawn()
        };
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!(program = %line.program.display(), error = %e, "failed to spawn tool");
                cmd.finish(CommandStatus::RunError);
                return;
            }
        };

        if let Err(e) = stdout.open().and_then(|()| stderr.open()) {
            tracing::warn!(error = %e, "failed to start pipe reader");
            terminate(&mut child);
            cmd.finish(CommandStatus::RunError);
            return;
        }

        let delay = if cmd.operation().is_index_write() {
            Duration::ZERO
        } else {
            self.progress_delay
        };
        let mut outcome = wait_for_exit(&mut child, &cancel, Some(Instant::now() + delay));
        if outcome == Wait::TimedOut {
            tracing::debug!(?delay, "still running, showing progress");
            self.progress.show(&cmd.header(), cancel.clone());
            outcome = wait_for_exit(&mut child, &cancel, None);
            self.progress.hide();
        }

        if outcome == Wait::Cancelled {
            terminate(&mut child);
        } else if let Err(e) = child.wait() {
            tracing::debug!(error = %e, "failed to reap tool");
        }

        let out = stdout.into_output();
        let err = stderr.into_output();

        if outcome == Wait::Cancelled {
            tracing::debug!(discarded = out.len() + err.len(), "command cancelled");
            cmd.finish(CommandStatus::Cancelled);
        } else if !out.is_empty() {
            cmd.append_output(&out);
        } else if !err.is_empty() {
            cmd.set_output(err);
            if !cmd.operation().is_index_write() {
                cmd.finish(CommandStatus::Failed);
            }
        }
    }

    /// Give back the command's lock, starting a queued update if that
    /// left the database free. A create that did not succeed removes the
    /// partial index instead.
    fn release_database(&self, cmd: &Command) {
        let Some(db) = cmd.database() else {
            return;
        };

        let failed_create =
            cmd.operation() == Operation::CreateIndex && cmd.status().is_terminal();
        if failed_create {
            if let Err(e) = self.registry.unregister(db) {
                tracing::warn!(root = %db.path().display(), error = %e, "failed to remove partial index");
            }
            return;
        }

        if self.registry.release(db) {
            // Failures are logged and the file stays queued
            let _ = self.run_scheduled_update(db);
        }
    }
}

impl std::fmt::Debug for CommandEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEngine")
            .field("tools", &self.tools)
            .field("progress_delay", &self.progress_delay)
            .finish_non_exhaustive()
    }
}

fn parse_output(cmd: &mut Command) {
    if cmd.output().is_empty() {
        cmd.finish(CommandStatus::Ok);
        return;
    }
    let Some(mut parser) = cmd.take_parser() else {
        cmd.finish(CommandStatus::Ok);
        return;
    };

    let status = match parser.parse(cmd) {
        Ok(ParseOutcome::Parsed(_)) => CommandStatus::Ok,
        Ok(ParseOutcome::Empty) => CommandStatus::ParseEmpty,
        Err(e) => {
            tracing::debug!(error = %e, "unexpected tool output");
            CommandStatus::ParseError
        }
    };
    cmd.restore_parser(parser);
    cmd.finish(status);
}

/// Wait for exit, cancellation or `deadline`, whichever comes first.
///
/// Sleeps on the cancel token between exit checks, so cancellation wakes
/// it immediately.
fn wait_for_exit(child: &mut Child, cancel: &CancelToken, deadline: Option<Instant>) -> Wait {
    loop {
        if cancel.is_cancelled() {
            return Wait::Cancelled;
        }
        match child.try_wait() {
            Ok(Some(_)) => return Wait::Exited,
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "failed to poll tool");
                return Wait::Exited;
            }
        }
        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Wait::TimedOut;
                }
                (deadline - now).min(REAP_INTERVAL)
            }
            None => REAP_INTERVAL,
        };
        if cancel.wait_timeout(pause) {
            return Wait::Cancelled;
        }
    }
}

fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::warn!(pid = child.id(), error = %e, "failed to kill tool");
    }
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::database::LockMode;
    use crate::dispatch::Dispatcher;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn engine(registry: &Arc<DatabaseRegistry>, dispatcher: &Dispatcher) -> CommandEngine {
        let refuse: Spawner = Arc::new(|_job: Job| Err(io::Error::other("thread limit reached")));
        CommandEngine::new(
            Arc::clone(registry),
            ToolPaths::new("/nonexistent"),
            dispatcher.handle(),
        )
        .with_spawner(refuse)
    }

    #[test]
    fn test_run_without_worker_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DatabaseRegistry::new(DbConfig::default()));
        let dispatcher = Dispatcher::new();
        let engine = engine(&registry, &dispatcher);

        let db = registry.register(dir.path(), LockMode::Read).unwrap();
        assert!(db.try_lock(LockMode::Read));
        assert_eq!(db.lock_state().readers, 2);

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let cmd = Command::new(Operation::FindDefinition, "foo").on(Arc::clone(&db));
        let err = engine
            .run(cmd, move |_| flag.store(true, Ordering::SeqCst))
            .unwrap_err();

        assert!(matches!(err, TagwalkError::WorkerUnavailable(_)));
        assert_eq!(db.lock_state().readers, 1);
        assert_eq!(dispatcher.run_pending(), 0);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_scheduled_update_requeued_when_worker_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DatabaseRegistry::new(DbConfig::default()));
        let dispatcher = Dispatcher::new();
        let engine = engine(&registry, &dispatcher);

        let db = registry.register(dir.path(), LockMode::Read).unwrap();
        let (a, b) = (PathBuf::from("/proj/a.c"), PathBuf::from("/proj/b.c"));
        db.schedule_update(&a);
        db.schedule_update(&b);
        assert!(!engine.run_scheduled_update(&db).unwrap());

        assert!(registry.release(&db));
        let err = engine.run_scheduled_update(&db).unwrap_err();
        assert!(matches!(err, TagwalkError::WorkerUnavailable(_)));
        assert!(!db.is_locked());
        assert_eq!(db.pending_updates(), vec![a, b]);
    }
}
