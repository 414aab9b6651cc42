//! Command descriptors: what to run, against which database, and the outcome

use crate::database::{Database, LockMode};
use crate::parser::ResultParser;
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Operation a command asks the external tools to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateIndex,
    UpdateSingleFile,
    AutocompleteTag,
    AutocompleteSymbol,
    AutocompletePath,
    FindFile,
    FindDefinition,
    FindReference,
    FindSymbol,
    Grep,
    GrepLiteral,
    ToolVersion,
    SecondaryToolVersion,
}

impl Operation {
    /// Human readable name, used as the default command name
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateIndex => "Create Database",
            Self::UpdateSingleFile => "Update File",
            Self::AutocompleteTag => "AutoComplete",
            Self::AutocompleteSymbol => "AutoComplete Symbol",
            Self::AutocompletePath => "AutoComplete File Name",
            Self::FindFile => "Find File",
            Self::FindDefinition => "Find Definition",
            Self::FindReference => "Find Reference",
            Self::FindSymbol => "Find Symbol",
            Self::Grep => "Grep",
            Self::GrepLiteral => "Grep Literal",
            Self::ToolVersion => "Global Version",
            Self::SecondaryToolVersion => "Ctags Version",
        }
    }

    /// Builds or updates the index (needs the writer lock)
    pub fn is_index_write(&self) -> bool {
        matches!(self, Self::CreateIndex | Self::UpdateSingleFile)
    }

    pub fn is_version_query(&self) -> bool {
        matches!(self, Self::ToolVersion | Self::SecondaryToolVersion)
    }

    /// Lock a command of this kind must hold on its database
    pub fn lock_mode(&self) -> LockMode {
        LockMode::writer(self.is_index_write())
    }

    /// Searches library databases through `GTAGSLIBPATH`
    pub fn searches_libraries(&self) -> bool {
        matches!(self, Self::AutocompleteTag | Self::FindDefinition)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of a command. Everything except `Pending` and `Running` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Running,
    /// Aborted by the user before the process exited
    Cancelled,
    /// The process or its pipes could not be started
    RunError,
    /// The tool only wrote to its error stream
    Failed,
    /// Output does not match the expected record shape (stale index)
    ParseError,
    /// Filtering removed every result
    ParseEmpty,
    Ok,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Cancelled => "cancelled",
            Self::RunError => "run_error",
            Self::Failed => "failed",
            Self::ParseError => "parse_error",
            Self::ParseEmpty => "parse_empty",
            Self::Ok => "ok",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct CancelInner {
    cancelled: AtomicBool,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

/// Shared cancellation flag for one command.
///
/// Clones refer to the same flag. Waiters can block on it with a timeout.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                wake_tx,
                wake_rx,
            }),
        }
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            let _ = self.inner.wake_tx.try_send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Block up to `timeout` for cancellation. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let _ = self.inner.wake_rx.recv_timeout(timeout);
        self.is_cancelled()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// One request to the external tools plus its result state.
///
/// Built by the caller, moved into [`CommandEngine::run`](crate::CommandEngine::run),
/// and handed back through the completion callback once terminal.
#[derive(Debug)]
pub struct Command {
    operation: Operation,
    name: String,
    tag: String,
    regex: bool,
    match_case: bool,
    skip_libs: bool,
    database: Option<Arc<Database>>,
    parser: Option<ResultParser>,
    status: CommandStatus,
    output: Vec<u8>,
    cancel: CancelToken,
}

impl Command {
    pub fn new(operation: Operation, tag: impl Into<String>) -> Self {
        Self {
            operation,
            name: operation.name().to_string(),
            tag: tag.into(),
            regex: false,
            match_case: true,
            skip_libs: false,
            database: None,
            parser: None,
            status: CommandStatus::Pending,
            output: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Target database. The caller must already hold the matching lock;
    /// the engine releases it when the process finishes.
    pub fn on(mut self, database: Arc<Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn regex(mut self, regex: bool) -> Self {
        self.regex = regex;
        self
    }

    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.match_case = !ignore_case;
        self
    }

    /// Do not consult library databases for this query
    pub fn skip_libs(mut self, skip: bool) -> Self {
        self.skip_libs = skip;
        self
    }

    pub fn with_parser(mut self, parser: impl Into<ResultParser>) -> Self {
        self.parser = Some(parser.into());
        self
    }

    /// Seed the output buffer; fresh output is appended after it
    pub fn with_output(mut self, seed: impl Into<Vec<u8>>) -> Self {
        self.output = seed.into();
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_regex(&self) -> bool {
        self.regex
    }

    pub fn is_match_case(&self) -> bool {
        self.match_case
    }

    pub fn skips_libs(&self) -> bool {
        self.skip_libs
    }

    pub fn database(&self) -> Option<&Arc<Database>> {
        self.database.as_ref()
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.database.as_deref().map(Database::path)
    }

    pub fn parser(&self) -> Option<&ResultParser> {
        self.parser.as_ref()
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    /// Captured tool output (standard output, or the error stream on failure)
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn output_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// True when results may come from both the project and library indexes
    pub fn spans_library_dbs(&self) -> bool {
        if self.skip_libs {
            return false;
        }
        self.database
            .as_deref()
            .map(|db| {
                let config = db.config();
                config.use_lib_db && !config.lib_db_paths.is_empty()
            })
            .unwrap_or(false)
    }

    /// Title shown while the command runs
    pub fn header(&self) -> String {
        match self.operation {
            Operation::CreateIndex => format!(
                "{} - \"{}\"",
                self.name,
                self.db_path().map(|p| p.display().to_string()).unwrap_or_default()
            ),
            op if op.is_version_query() => self.name.clone(),
            _ => format!("{} - \"{}\"", self.name, self.tag),
        }
    }

    pub(crate) fn start(&mut self) {
        if self.status == CommandStatus::Pending {
            self.status = CommandStatus::Running;
        }
    }

    /// Move to a final state. A command that is already final keeps its state.
    pub(crate) fn finish(&mut self, status: CommandStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }

    pub(crate) fn append_output(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    pub(crate) fn set_output(&mut self, bytes: Vec<u8>) {
        self.output = bytes;
    }

    pub(crate) fn take_parser(&mut self) -> Option<ResultParser> {
        self.parser.take()
    }

    pub(crate) fn restore_parser(&mut self, parser: ResultParser) {
        self.parser = Some(parser);
    }
}
