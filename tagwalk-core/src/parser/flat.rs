use super::{MalformedRecord, ParseOutcome, UniquenessRegister};
use crate::command::{Command, Operation};

/// One entry per output line, used for completion lists and version text
#[derive(Debug, Default, Clone)]
pub struct FlatListParser {
    dedup: Option<bool>,
    entries: Vec<String>,
}

impl FlatListParser {
    /// Deduplicates automatically when the query spans library databases
    pub fn new() -> Self {
        Self::default()
    }

    /// Force duplicate removal on or off
    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<String> {
        self.entries
    }

    pub fn parse(&mut self, cmd: &Command) -> Result<ParseOutcome, MalformedRecord> {
        let dedup = self.dedup.unwrap_or_else(|| cmd.spans_library_dbs());
        let strip_separator = matches!(
            cmd.operation(),
            Operation::FindFile | Operation::AutocompletePath
        );

        let text = cmd.output_text();
        let mut seen = UniquenessRegister::new();
        self.entries.clear();

        for token in text.split(['\n', '\r']).filter(|t| !t.is_empty()) {
            let entry = if strip_separator {
                token.strip_prefix(['/', '\\']).unwrap_or(token)
            } else {
                token
            };
            if entry.is_empty() || (dedup && !seen.is_unique(entry)) {
                continue;
            }
            self.entries.push(entry.to_string());
        }

        Ok(ParseOutcome::Parsed(self.entries.len()))
    }
}
