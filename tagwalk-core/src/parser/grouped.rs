use super::{MalformedRecord, ParseOutcome, UniquenessRegister};
use crate::command::{Command, Operation};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

/// One matching line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hit {
    pub line: u32,
    pub text: String,
}

/// A run of consecutive hits in one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHits {
    pub file: String,
    pub hits: Vec<Hit>,
}

/// Results grouped by file, plus their rendered text form
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedResult {
    pub header: String,
    pub files: Vec<FileHits>,
    pub file_count: usize,
    pub hit_count: usize,
    #[serde(skip)]
    text: String,
}

impl ParsedResult {
    fn new(header: String) -> Self {
        Self {
            text: header.clone(),
            header,
            ..Self::default()
        }
    }

    /// Header line followed by the indented file and hit lines
    pub fn text(&self) -> &str {
        &self.text
    }

    fn open_file(&mut self, file: &str) {
        let _ = write!(self.text, "\n\t{file}");
        self.files.push(FileHits {
            file: file.to_string(),
            hits: Vec::new(),
        });
        self.file_count += 1;
    }

    fn push_hit(&mut self, file: &str, line: u32, content: &str) {
        if self.files.last().map(|f| f.file.as_str()) != Some(file) {
            self.open_file(file);
        }
        let _ = write!(self.text, "\n\t\tline {line}:\t{content}");
        if let Some(group) = self.files.last_mut() {
            group.hits.push(Hit {
                line,
                text: content.to_string(),
            });
        }
        self.hit_count += 1;
    }

    /// File search records: the file is both header and hit
    fn push_file(&mut self, file: &str) {
        self.open_file(file);
        self.hit_count += 1;
    }
}

/// Parser for navigable search results (`file:line:content` records, or
/// bare paths for file search)
#[derive(Debug, Default, Clone)]
pub struct GroupedParser {
    dedup: Option<bool>,
    result: ParsedResult,
}

impl GroupedParser {
    /// Deduplicates automatically when the query spans library databases
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn result(&self) -> &ParsedResult {
        &self.result
    }

    pub fn into_result(self) -> ParsedResult {
        self.result
    }

    pub fn files(&self) -> &[FileHits] {
        &self.result.files
    }

    pub fn file_count(&self) -> usize {
        self.result.file_count
    }

    pub fn hit_count(&self) -> usize {
        self.result.hit_count
    }

    pub fn text(&self) -> &str {
        self.result.text()
    }

    pub fn parse(&mut self, cmd: &Command) -> Result<ParseOutcome, MalformedRecord> {
        let dedup = self.dedup.unwrap_or_else(|| cmd.spans_library_dbs());
        let filter = PathFilter::for_command(cmd);
        let file_search = cmd.operation() == Operation::FindFile;

        self.result = ParsedResult::new(header(cmd));
        let mut seen = UniquenessRegister::new();
        let mut candidates = 0usize;

        let text = cmd.output_text();
        for (idx, record) in text.lines().enumerate() {
            if record.trim().is_empty() {
                continue;
            }

            let file = if file_search {
                record.trim()
            } else {
                let (file, _, _) = split_record(record).ok_or_else(|| MalformedRecord {
                    line: idx + 1,
                    record: record.to_string(),
                })?;
                file
            };

            candidates += 1;
            if filter.excludes(file) || (dedup && !seen.is_unique(record)) {
                continue;
            }

            if file_search {
                self.result.push_file(file);
            } else if let Some((file, line, content)) = split_record(record) {
                self.result.push_hit(file, line, content);
            }
        }

        if candidates > 0 && self.result.hit_count == 0 {
            return Ok(ParseOutcome::Empty);
        }
        Ok(ParseOutcome::Parsed(self.result.hit_count))
    }
}

fn header(cmd: &Command) -> String {
    format!(
        "{} \"{}\" ({}, {}) in \"{}\"",
        cmd.name(),
        cmd.tag(),
        if cmd.is_regex() { "regexp" } else { "literal" },
        if cmd.is_match_case() {
            "match case"
        } else {
            "ignore case"
        },
        cmd.db_path().map(|p| p.display().to_string()).unwrap_or_default()
    )
}

/// Split `file:line:content`. A leading drive letter (`C:\`) belongs to the file.
fn split_record(record: &str) -> Option<(&str, u32, &str)> {
    let skip = if has_drive_prefix(record) { 2 } else { 0 };
    let first = record[skip..].find(':')? + skip;
    let file = &record[..first];
    let rest = &record[first + 1..];
    let second = rest.find(':')?;
    let line = rest[..second].trim().parse().ok()?;
    if file.is_empty() {
        return None;
    }
    let content = rest[second + 1..].trim_start_matches([' ', '\t']);
    Some((file, line, content))
}

fn has_drive_prefix(record: &str) -> bool {
    let bytes = record.as_bytes();
    bytes.len() > 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'\\' | b'/')
}

/// Ignored sub-folders of a database
struct PathFilter {
    root: PathBuf,
    folders: Vec<PathBuf>,
}

impl PathFilter {
    fn for_command(cmd: &Command) -> Self {
        let Some(db) = cmd.database() else {
            return Self {
                root: PathBuf::new(),
                folders: Vec::new(),
            };
        };
        let root = db.path().to_path_buf();
        let folders = db
            .config()
            .active_path_filters()
            .iter()
            .map(|f| normalize(&root.join(f)))
            .collect();
        Self { root, folders }
    }

    fn excludes(&self, file: &str) -> bool {
        if self.folders.is_empty() {
            return false;
        }
        let path = normalize(&self.root.join(Path::new(file)));
        self.folders.iter().any(|folder| path.starts_with(folder))
    }
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::database::Database;
    use std::sync::Arc;

    const SCENARIO: &str = "a.c:10:foo();\na.c:12:foo(x);\nb.c:3:void foo(){}\n";

    fn database(config: DbConfig) -> Arc<Database> {
        Arc::new(Database::new(PathBuf::from("/proj"), config))
    }

    fn run(cmd: &Command, parser: GroupedParser) -> (Result<ParseOutcome, MalformedRecord>, GroupedParser) {
        let mut parser = parser;
        let outcome = parser.parse(cmd);
        (outcome, parser)
    }

    #[test]
    fn test_groups_consecutive_records() {
        let cmd = Command::new(Operation::FindReference, "foo").with_output(SCENARIO);
        let (outcome, parser) = run(&cmd, GroupedParser::new());

        assert_eq!(outcome, Ok(ParseOutcome::Parsed(3)));
        assert_eq!(parser.file_count(), 2);
        assert_eq!(parser.hit_count(), 3);
        let files: Vec<_> = parser.files().iter().map(|f| f.file.as_str()).collect();
        assert_eq!(files, vec!["a.c", "b.c"]);
        assert_eq!(parser.files()[0].hits.len(), 2);
        assert_eq!(
            parser.files()[1].hits[0],
            Hit {
                line: 3,
                text: "void foo(){}".to_string()
            }
        );
    }

    #[test]
    fn test_path_filter_drops_folder() {
        let config = DbConfig {
            use_path_filter: true,
            path_filters: vec![PathBuf::from("lib")],
            ..DbConfig::default()
        };
        let cmd = Command::new(Operation::FindReference, "foo")
            .on(database(config))
            .with_output("src/a.c:10:foo();\nsrc/a.c:12:foo(x);\nlib/b.c:3:void foo(){}\n");
        let (outcome, parser) = run(&cmd, GroupedParser::new());

        assert_eq!(outcome, Ok(ParseOutcome::Parsed(2)));
        assert_eq!(parser.file_count(), 1);
        assert_eq!(parser.hit_count(), 2);
        assert!(parser.files().iter().all(|f| f.file != "lib/b.c"));
    }

    #[test]
    fn test_absolute_filter_and_disabled_filters() {
        let config = DbConfig {
            use_path_filter: true,
            path_filters: vec![PathBuf::from("/proj/lib")],
            ..DbConfig::default()
        };
        let cmd = Command::new(Operation::Grep, "foo")
            .on(database(config.clone()))
            .with_output("lib/x.c:1:foo\nlibrary/y.c:2:foo\n");
        let (_, parser) = run(&cmd, GroupedParser::new());
        assert_eq!(parser.files().len(), 1);
        assert_eq!(parser.files()[0].file, "library/y.c");

        let off = DbConfig {
            use_path_filter: false,
            ..config
        };
        let cmd = Command::new(Operation::Grep, "foo")
            .on(database(off))
            .with_output("lib/x.c:1:foo\n");
        let (_, parser) = run(&cmd, GroupedParser::new());
        assert_eq!(parser.hit_count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_filter_matches_paths_outside_root() {
        let config = DbConfig {
            use_path_filter: true,
            path_filters: vec![PathBuf::from("/usr/include")],
            ..DbConfig::default()
        };
        let db = Arc::new(Database::new(PathBuf::from("/proj/app"), config));
        let cmd = Command::new(Operation::FindDefinition, "foo")
            .on(db)
            .with_output("../../usr/include/x.h:1:foo\nsrc/a.c:2:foo\n");
        let (outcome, parser) = run(&cmd, GroupedParser::new());
        assert_eq!(outcome, Ok(ParseOutcome::Parsed(1)));
        assert_eq!(parser.hit_count(), 1);
        assert_eq!(parser.files()[0].file, "src/a.c");
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_resolves_dots() {
        assert_eq!(
            normalize(Path::new("/proj/app/../../usr/./include")),
            PathBuf::from("/usr/include")
        );
        assert_eq!(normalize(Path::new("/../../x")), PathBuf::from("/x"));
        assert_eq!(normalize(Path::new("../a")), PathBuf::from("../a"));
    }

    #[test]
    fn test_everything_filtered_is_empty() {
        let config = DbConfig {
            use_path_filter: true,
            path_filters: vec![PathBuf::from("gen")],
            ..DbConfig::default()
        };
        let cmd = Command::new(Operation::FindSymbol, "foo")
            .on(database(config))
            .with_output("gen/a.c:1:foo\ngen/b.c:2:foo\n");
        let (outcome, parser) = run(&cmd, GroupedParser::new());
        assert_eq!(outcome, Ok(ParseOutcome::Empty));
        assert_eq!(parser.file_count(), 0);
    }

    #[test]
    fn test_dedup_across_library_databases() {
        let config = DbConfig {
            use_lib_db: true,
            lib_db_paths: vec![PathBuf::from("/usr/include")],
            ..DbConfig::default()
        };
        let output = "a.h:5:int foo(void);\na.h:5:int foo(void);\nb.c:9:foo();\n";
        let cmd = Command::new(Operation::FindDefinition, "foo")
            .on(database(config.clone()))
            .with_output(output);
        let (_, parser) = run(&cmd, GroupedParser::new());
        assert_eq!(parser.hit_count(), 2);
        assert_eq!(parser.file_count(), 2);

        let cmd = Command::new(Operation::FindDefinition, "foo")
            .on(database(config))
            .skip_libs(true)
            .with_output(output);
        let (_, parser) = run(&cmd, GroupedParser::new());
        assert_eq!(parser.hit_count(), 3);
    }

    #[test]
    fn test_malformed_record_aborts() {
        let cmd = Command::new(Operation::FindReference, "foo")
            .with_output("a.c:10:foo();\nno separators here\n");
        let (outcome, _) = run(&cmd, GroupedParser::new());
        let err = outcome.unwrap_err();
        assert_eq!(err.line, 2);

        let cmd = Command::new(Operation::FindReference, "foo").with_output("a.c:ten:foo();\n");
        assert!(run(&cmd, GroupedParser::new()).0.is_err());
    }

    #[test]
    fn test_non_consecutive_file_gets_new_header() {
        let cmd = Command::new(Operation::Grep, "x").with_output("a.c:1:x\nb.c:2:x\na.c:3:x\n");
        let (_, parser) = run(&cmd, GroupedParser::new());
        assert_eq!(parser.file_count(), 3);
        assert_eq!(parser.files().len(), parser.file_count());
        let hits: usize = parser.files().iter().map(|f| f.hits.len()).sum();
        assert_eq!(hits, parser.hit_count());
    }

    #[test]
    fn test_file_search_records() {
        let cmd = Command::new(Operation::FindFile, "main")
            .with_output("src/main.c\ntest/main_test.c\n");
        let (outcome, parser) = run(&cmd, GroupedParser::new());
        assert_eq!(outcome, Ok(ParseOutcome::Parsed(2)));
        assert_eq!(parser.file_count(), 2);
        assert!(parser.text().ends_with("\n\tsrc/main.c\n\ttest/main_test.c"));
    }

    #[test]
    fn test_rendered_text() {
        let cmd = Command::new(Operation::FindReference, "foo")
            .ignore_case(true)
            .on(database(DbConfig::default()))
            .with_output("a.c:10:    foo();\n");
        let (_, parser) = run(&cmd, GroupedParser::new());
        assert_eq!(
            parser.text(),
            "Find Reference \"foo\" (literal, ignore case) in \"/proj\"\n\ta.c\n\t\tline 10:\tfoo();"
        );
    }

    #[test]
    fn test_drive_letter_paths() {
        assert_eq!(
            split_record(r"C:\src\a.c:7:int a;"),
            Some((r"C:\src\a.c", 7, "int a;"))
        );
        assert_eq!(split_record("a.c:7:x:y"), Some(("a.c", 7, "x:y")));
        assert_eq!(split_record(":7:x"), None);
    }
}
