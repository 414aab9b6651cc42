//! Tagwalk Core - cancellable GNU Global queries
//!
//! Runs `gtags`, `global` and `ctags` as subprocesses on worker threads,
//! guards each index with a non-blocking reader/writer lock, defers
//! single-file re-indexing until a database is free, and parses the tools'
//! line output into flat candidate lists or file-grouped search results.
//! Finished commands are handed back to the issuing thread through a
//! [`Dispatcher`].

pub mod command;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod parser;
pub mod pipe;
pub mod progress;

pub use command::{CancelToken, Command, CommandStatus, Operation};
pub use config::{DbConfig, ParserLabel, Settings};
pub use database::{Database, DatabaseRegistry, LockMode, LockState};
pub use dispatch::{DispatchHandle, Dispatcher};
pub use engine::{CommandEngine, CommandLine, ToolPaths};
pub use error::TagwalkError;
pub use parser::{FileHits, FlatListParser, GroupedParser, Hit, ParseOutcome, ParsedResult, ResultParser};
pub use pipe::PipeReader;
pub use progress::{NoProgress, ProgressIndicator};

/// Result type alias for tagwalk operations
pub type Result<T> = std::result::Result<T, TagwalkError>;
