//! Turning raw tool output into structured results

mod flat;
mod grouped;
mod uniqueness;

pub use flat::FlatListParser;
pub use grouped::{FileHits, GroupedParser, Hit, ParsedResult};
pub use uniqueness::UniquenessRegister;

use crate::command::Command;

/// A record that does not have the `file:line:content` shape.
///
/// Usually means the index is stale relative to the sources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed record on line {line}: {record:?}")]
pub struct MalformedRecord {
    pub line: usize,
    pub record: String,
}

/// Result of a successful parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Number of entries kept
    Parsed(usize),
    /// There were candidates but filtering removed all of them
    Empty,
}

/// Parser attached to a command, run once its process has finished
#[derive(Debug, Clone)]
pub enum ResultParser {
    Flat(FlatListParser),
    Grouped(GroupedParser),
}

impl ResultParser {
    pub fn parse(&mut self, cmd: &Command) -> Result<ParseOutcome, MalformedRecord> {
        match self {
            Self::Flat(p) => p.parse(cmd),
            Self::Grouped(p) => p.parse(cmd),
        }
    }

    pub fn as_flat(&self) -> Option<&FlatListParser> {
        match self {
            Self::Flat(p) => Some(p),
            Self::Grouped(_) => None,
        }
    }

    pub fn as_grouped(&self) -> Option<&GroupedParser> {
        match self {
            Self::Grouped(p) => Some(p),
            Self::Flat(_) => None,
        }
    }
}

impl From<FlatListParser> for ResultParser {
    fn from(p: FlatListParser) -> Self {
        Self::Flat(p)
    }
}

impl From<GroupedParser> for ResultParser {
    fn from(p: GroupedParser) -> Self {
        Self::Grouped(p)
    }
}
