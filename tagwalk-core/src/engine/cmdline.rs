//! Per-operation command lines for the GTags tools

use crate::command::{Command, Operation};
use crate::config::Settings;
use std::env::consts::EXE_SUFFIX;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Config file shipped next to the tools, passed to gtags when present
pub const GTAGS_CONF: &str = "gtags.conf";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Where gtags, global and ctags live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    dir: PathBuf,
}

impl ToolPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Settings override, else `bin/` next to the running executable
    pub fn resolve(settings: &Settings) -> Self {
        if let Some(dir) = &settings.tools.dir {
            return Self::new(dir.clone());
        }
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        Self::new(exe_dir.join("bin"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn program(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{EXE_SUFFIX}"))
    }

    pub fn gtags_conf(&self) -> Option<PathBuf> {
        let conf = self.dir.join(GTAGS_CONF);
        conf.is_file().then_some(conf)
    }
}

/// Fully resolved invocation of one tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(&'static str, OsString)>,
    pub current_dir: Option<PathBuf>,
}

impl CommandLine {
    pub fn build(cmd: &Command, tools: &ToolPaths) -> Self {
        let op = cmd.operation();
        let (program, flags): (&str, &[&str]) = match op {
            Operation::CreateIndex => ("gtags", &["-c"]),
            Operation::UpdateSingleFile => ("gtags", &["-c", "--single-update"]),
            Operation::AutocompleteTag => ("global", &["-cT"]),
            Operation::AutocompleteSymbol => ("global", &["-cs"]),
            Operation::AutocompletePath => ("global", &["-cP", "--match-part=all"]),
            Operation::FindFile => ("global", &["-P"]),
            Operation::FindDefinition => ("global", &["-dT", "--result=grep"]),
            Operation::FindReference => ("global", &["-r", "--result=grep"]),
            Operation::FindSymbol => ("global", &["-s", "--result=grep"]),
            Operation::Grep | Operation::GrepLiteral => ("global", &["-g", "--result=grep"]),
            Operation::ToolVersion => ("global", &["--version"]),
            Operation::SecondaryToolVersion => ("ctags", &["--version"]),
        };

        let mut args: Vec<OsString> = flags.iter().map(OsString::from).collect();
        let config = cmd.database().map(|db| db.config()).unwrap_or_default();

        if op.is_index_write() {
            if op == Operation::UpdateSingleFile {
                args.push(cmd.tag().into());
            }
            if let Some(conf) = tools.gtags_conf() {
                args.push("--gtagsconf".into());
                args.push(conf.into_os_string());
                args.push(format!("--gtagslabel={}", config.parser.as_str()).into());
            }
        } else if !op.is_version_query() {
            args.push(cmd.tag().into());
            args.push(if cmd.is_match_case() { "-M" } else { "-i" }.into());
            if op == Operation::GrepLiteral || !cmd.is_regex() {
                args.push("--literal".into());
            }
        }

        let mut env = Vec::new();
        let mut current_dir = None;
        if !op.is_version_query() {
            if let Some(root) = cmd.db_path() {
                current_dir = Some(root.to_path_buf());
                env.push(("GTAGSROOT", root.as_os_str().to_os_string()));
            }
            if op.searches_libraries() && !cmd.skips_libs() {
                if let Some(lib_path) = config.lib_path_env() {
                    env.push(("GTAGSLIBPATH", lib_path));
                }
            }
        }

        Self {
            program: tools.program(program),
            args,
            env,
            current_dir,
        }
    }

    /// Process builder with null stdin and no console window
    pub fn to_process(&self) -> std::process::Command {
        let mut process = std::process::Command::new(&self.program);
        process.args(&self.args).stdin(Stdio::null());
        for (key, value) in &self.env {
            process.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            process.current_dir(dir);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            process.creation_flags(CREATE_NO_WINDOW);
        }
        process
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.program.display())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}
