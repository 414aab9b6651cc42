//! Tagwalk CLI - GNU Global queries from the terminal

mod progress;
mod render;

use clap::{Parser, Subcommand};
use colored::Colorize;
use progress::TerminalProgress;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tagwalk_core::database::exists_in_folder;
use tagwalk_core::{
    Command, CommandEngine, CommandStatus, Database, DatabaseRegistry, Dispatcher, FlatListParser,
    GroupedParser, LockMode, Operation, ParserLabel, Settings, TagwalkError, ToolPaths,
};

const PUMP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "tagwalk")]
#[command(about = "Cancellable GNU Global queries", long_about = None)]
struct Cli {
    /// File or directory used to locate the database (default: current dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Settings file (default: <config dir>/tagwalk/settings.toml)
    #[arg(long, global = true, env = "TAGWALK_SETTINGS")]
    settings: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Case insensitive matching
    #[arg(short, long, global = true)]
    ignore_case: bool,

    /// Treat the search text as a regular expression
    #[arg(long, global = true)]
    regex: bool,

    /// Do not search library databases
    #[arg(long, global = true)]
    skip_libs: bool,

    /// Cancel a command that runs longer than this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a new database
    Create {
        /// Project root (default: current dir)
        dir: Option<PathBuf>,

        /// Source parser: default, ctags or pygments
        #[arg(long)]
        parser: Option<ParserLabel>,
    },

    /// Re-index changed files, one at a time
    Update {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Remove a database's index files
    Delete {
        /// Database root (default: current dir)
        dir: Option<PathBuf>,
    },

    /// Find definitions of a tag
    Def { tag: String },

    /// Find references to a tag
    Ref { tag: String },

    /// Find symbols without definitions
    Symbol { tag: String },

    /// Search source text
    Grep { pattern: String },

    /// Search source text for a literal string
    GrepLiteral { text: String },

    /// Find files by name
    File { pattern: String },

    /// Complete a tag or symbol name
    Complete { prefix: String },

    /// Complete a file path
    CompletePath { prefix: String },

    /// Show GTags and Ctags versions
    Version,

    /// Show the database config
    Config,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let json = cli.json;
    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            if json {
                let error_json = serde_json::json!({
                    "code": if e.is_busy() { "busy" } else { "error" },
                    "message": e.to_string(),
                });
                eprintln!("{}", serde_json::to_string_pretty(&error_json).unwrap_or_default());
            } else {
                eprintln!("{}: {}", "Error".red(), e);
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tagwalk_core=debug" } else { "tagwalk_core=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns false when the command finished without a usable result
fn run(cli: Cli) -> tagwalk_core::Result<bool> {
    let settings = Settings::load_or_default(cli.settings.as_deref())?;
    let registry = Arc::new(DatabaseRegistry::new(settings.database.defaults.clone()));
    let dispatcher = Dispatcher::new();
    let engine = CommandEngine::new(
        Arc::clone(&registry),
        ToolPaths::resolve(&settings),
        dispatcher.handle(),
    )
    .with_progress(Arc::new(TerminalProgress::new(cli.json)));

    let app = App {
        ignore_case: cli.ignore_case || !settings.search.match_case,
        regex: cli.regex || settings.search.regex,
        skip_libs: cli.skip_libs,
        timeout: cli.timeout.map(Duration::from_secs),
        json: cli.json,
        anchor: cli.db.clone(),
        settings,
        registry,
        engine,
        dispatcher,
    };

    match cli.command {
        Commands::Create { dir, parser } => app.create(dir, parser),
        Commands::Update { files } => app.update(&files),
        Commands::Delete { dir } => app.delete(dir),
        Commands::Def { tag } => app.search(Operation::FindDefinition, tag),
        Commands::Ref { tag } => app.search(Operation::FindReference, tag),
        Commands::Symbol { tag } => app.search(Operation::FindSymbol, tag),
        Commands::Grep { pattern } => app.search(Operation::Grep, pattern),
        Commands::GrepLiteral { text } => app.search(Operation::GrepLiteral, text),
        Commands::File { pattern } => app.search(Operation::FindFile, pattern),
        Commands::Complete { prefix } => app.complete(prefix),
        Commands::CompletePath { prefix } => app.complete_path(prefix),
        Commands::Version => app.version(),
        Commands::Config => app.config(),
    }
}

struct App {
    ignore_case: bool,
    regex: bool,
    skip_libs: bool,
    timeout: Option<Duration>,
    json: bool,
    anchor: Option<PathBuf>,
    settings: Settings,
    registry: Arc<DatabaseRegistry>,
    engine: CommandEngine,
    dispatcher: Dispatcher,
}

impl App {
    fn anchor(&self) -> tagwalk_core::Result<PathBuf> {
        match &self.anchor {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Lock the database owning the anchor, falling back to the default db
    fn acquire(&self, mode: LockMode) -> tagwalk_core::Result<Arc<Database>> {
        let anchor = self.anchor()?;
        match self.registry.acquire(&anchor, mode) {
            Err(TagwalkError::DatabaseNotFound(path)) => match self.settings.default_db() {
                Some(default) => {
                    tracing::debug!(default = %default.display(), "using default database");
                    self.registry.acquire(default, mode)
                }
                None => Err(TagwalkError::DatabaseNotFound(path)),
            },
            other => other,
        }
    }

    fn query(&self, op: Operation, tag: impl Into<String>) -> Command {
        Command::new(op, tag)
            .ignore_case(self.ignore_case)
            .regex(self.regex)
            .skip_libs(self.skip_libs)
    }

    /// Run `cmd` and pump completions until it comes back
    fn execute(&self, cmd: Command) -> tagwalk_core::Result<Arc<Command>> {
        if let Some(timeout) = self.timeout {
            let cancel = cmd.cancel_token().clone();
            let spawned = std::thread::Builder::new()
                .name("tagwalk-timeout".to_string())
                .spawn(move || {
                    if !cancel.wait_timeout(timeout) {
                        tracing::info!(?timeout, "command timed out, cancelling");
                        cancel.cancel();
                    }
                });
            if let Err(e) = spawned {
                tracing::warn!(error = %e, "timeout watcher not started");
            }
        }

        let slot: Arc<Mutex<Option<Arc<Command>>>> = Arc::new(Mutex::new(None));
        let done = Arc::clone(&slot);
        self.engine.run(cmd, move |finished| {
            *done.lock().unwrap_or_else(|e| e.into_inner()) = Some(finished);
        })?;

        loop {
            if let Some(finished) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                return Ok(finished);
            }
            self.dispatcher.run_next(PUMP_INTERVAL);
        }
    }

    fn create(&self, dir: Option<PathBuf>, parser: Option<ParserLabel>) -> tagwalk_core::Result<bool> {
        let dir = match dir {
            Some(dir) => dir,
            None => self.anchor()?,
        };
        if exists_in_folder(&dir) {
            return Err(TagwalkError::DatabaseExists(dir));
        }

        let db = self.registry.register(&dir, LockMode::Write)?;
        if let Some(parser) = parser {
            let mut config = db.config();
            config.parser = parser;
            db.set_config(config);
        }

        let done = self.execute(Command::new(Operation::CreateIndex, "").on(db))?;
        if !render::report_status(&done, self.json)? {
            return Ok(false);
        }
        if self.json {
            render::print_json(&serde_json::json!({ "status": done.status(), "db": done.db_path() }))?;
        } else {
            println!("{} {}", "Created".green(), dir.display());
            print_diagnostics(&done);
        }
        Ok(true)
    }

    fn update(&self, files: &[PathBuf]) -> tagwalk_core::Result<bool> {
        let mut databases: Vec<Arc<Database>> = Vec::new();
        for file in files {
            let db = self.registry.schedule_update(file)?;
            if !databases.iter().any(|known| Arc::ptr_eq(known, &db)) {
                databases.push(db);
            }
        }

        for db in &databases {
            if !self.engine.run_scheduled_update(db)? && !db.pending_updates().is_empty() {
                return Err(TagwalkError::DatabaseBusy(db.path().to_path_buf()));
            }
        }

        while databases
            .iter()
            .any(|db| !db.pending_updates().is_empty() || db.is_locked())
        {
            self.dispatcher.run_next(PUMP_INTERVAL);
            // Restart a drain whose worker failed to start after a release
            for db in &databases {
                if !db.is_locked() && !db.pending_updates().is_empty() {
                    self.engine.run_scheduled_update(db)?;
                }
            }
        }
        self.dispatcher.run_pending();

        if self.json {
            render::print_json(&serde_json::json!({ "updated": files.len() }))?;
        } else {
            println!("{} {} file(s)", "Updated".green(), files.len());
        }
        Ok(true)
    }

    fn delete(&self, dir: Option<PathBuf>) -> tagwalk_core::Result<bool> {
        let dir = match dir {
            Some(dir) => dir,
            None => self.anchor()?,
        };
        self.registry.delete(&dir)?;
        if self.json {
            render::print_json(&serde_json::json!({ "deleted": dir }))?;
        } else {
            println!("{} {}", "Deleted".green(), dir.display());
        }
        Ok(true)
    }

    fn search(&self, op: Operation, tag: String) -> tagwalk_core::Result<bool> {
        let db = self.acquire(op.lock_mode())?;
        let cmd = self.query(op, tag).on(db).with_parser(GroupedParser::new());
        let done = self.execute(cmd)?;
        if !render::report_status(&done, self.json)? {
            return Ok(false);
        }
        match done.parser().and_then(|p| p.as_grouped()) {
            Some(parser) => render::grouped(&done, parser, self.json)?,
            None => println!("\"{}\" not found", done.tag()),
        }
        Ok(true)
    }

    /// Tag completions, then symbol completions merged into the same list
    fn complete(&self, prefix: String) -> tagwalk_core::Result<bool> {
        let db = self.acquire(LockMode::Read)?;
        let tags = self.execute(self.query(Operation::AutocompleteTag, prefix.clone()).on(db))?;
        if !render::report_status(&tags, self.json)? {
            return Ok(false);
        }

        let db = self.acquire(LockMode::Read)?;
        let cmd = self
            .query(Operation::AutocompleteSymbol, prefix)
            .on(db)
            .with_output(tags.output().to_vec())
            .with_parser(FlatListParser::new().with_dedup(true));
        self.print_list(self.execute(cmd)?)
    }

    fn complete_path(&self, prefix: String) -> tagwalk_core::Result<bool> {
        let db = self.acquire(LockMode::Read)?;
        let cmd = self
            .query(Operation::AutocompletePath, prefix)
            .on(db)
            .with_parser(FlatListParser::new());
        self.print_list(self.execute(cmd)?)
    }

    fn print_list(&self, done: Arc<Command>) -> tagwalk_core::Result<bool> {
        if !render::report_status(&done, self.json)? {
            return Ok(false);
        }
        let entries = done
            .parser()
            .and_then(|p| p.as_flat())
            .map(FlatListParser::entries)
            .unwrap_or_default();
        render::list(entries, self.json)?;
        Ok(true)
    }

    fn version(&self) -> tagwalk_core::Result<bool> {
        let mut ok = true;
        let mut versions = Vec::new();
        for op in [Operation::ToolVersion, Operation::SecondaryToolVersion] {
            let done = self.execute(Command::new(op, "").with_parser(FlatListParser::new()))?;
            if done.status() != CommandStatus::Ok {
                ok &= render::report_status(&done, self.json)?;
                continue;
            }
            let first = done
                .parser()
                .and_then(|p| p.as_flat())
                .and_then(|p| p.entries().first().cloned())
                .unwrap_or_default();
            versions.push(first);
        }
        render::list(&versions, self.json)?;
        Ok(ok)
    }

    fn config(&self) -> tagwalk_core::Result<bool> {
        let db = self.acquire(LockMode::Read)?;
        let config = db.config();
        self.registry.release(&db);
        if !self.json {
            println!("{}", format!("# {}", db.path().display()).dimmed());
        }
        render::db_config(&config, self.json)?;
        Ok(true)
    }
}

/// Tool warnings that did not stop an index build
fn print_diagnostics(done: &Command) {
    let text = done.output_text();
    let text = text.trim_end();
    if !text.is_empty() {
        eprintln!("{}", text.yellow());
    }
}
