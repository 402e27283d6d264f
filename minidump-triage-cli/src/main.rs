// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::fs::File;
use std::io::{self, BufRead, Write};
use std::ops::Deref;
use std::panic;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use minidump_triage::tracker::redmine::{RedmineClient, RedmineSession};
use minidump_triage::tracker::{authenticate_with_retry, CredentialSource, Credentials, Url};
use minidump_triage::*;
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Classify crash dumps by the owner of the code they crashed in, and
/// optionally file a ticket for each one in a Redmine project.
///
/// The call stack of each dump's crashing thread is scanned from the
/// innermost frame outwards; the first frame matched by any rule decides the
/// owner. Rules are tried in the order they are given.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// A minidump, or a directory of minidumps.
    input: Option<PathBuf>,

    /// Read settings from this JSON file. Command line values take precedence.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the effective settings to this JSON file before processing.
    #[arg(long, value_name = "FILE")]
    save_config: Option<PathBuf>,

    /// Also search subdirectories of the input directory.
    #[arg(long)]
    recursive: bool,

    /// Glob selecting dump files inside the input directory [default: *.dmp]
    #[arg(long, value_name = "GLOB")]
    pattern: Option<String>,

    /// An ownership rule, e.g. `module:exact:gfx.dll=Jane Doe`.
    ///
    /// RULE is one of exact, substring or pattern (a regular expression), and
    /// may be suffixed with `/i` to ignore case. FIELD is one of module,
    /// function, symbol (`module!function`) or source_file. Repeat to add rules;
    /// earlier rules win. Rules given here replace the rules of --config.
    #[arg(long = "rule", value_name = "FIELD:RULE:VALUE=OWNER")]
    rules: Vec<OwnershipData>,

    /// Owner of crashes no rule matches.
    #[arg(long, value_name = "NAME")]
    default_owner: Option<String>,

    /// Base URL of the Redmine instance.
    #[arg(long, value_name = "URL")]
    tracker_url: Option<Url>,

    /// Redmine project (id or identifier) tickets are filed in.
    #[arg(long, value_name = "ID")]
    project: Option<String>,

    /// File a ticket for every classified dump.
    #[arg(long)]
    create_tickets: bool,

    /// Tracker user name (prompted for if missing).
    #[arg(long)]
    user: Option<String>,

    /// Tracker password (prompted for if missing).
    #[arg(long)]
    password: Option<String>,

    /// A directory of Breakpad symbol files. Can be repeated.
    #[arg(long = "symbols-path", value_name = "DIR")]
    symbols_paths: Vec<PathBuf>,

    /// Print one JSON object per dump instead of the human-readable report.
    /// Implies --no-pause.
    #[arg(long)]
    json: bool,

    /// Don't wait for Enter after each report.
    #[arg(long)]
    no_pause: bool,

    /// Don't highlight the matched frame (also disabled by NO_COLOR).
    #[arg(long)]
    no_color: bool,

    /// Set the logging level. `RUST_LOG` directives are applied on top.
    #[arg(long, value_enum, default_value_t = Verbosity::Warn)]
    verbose: Verbosity,

    /// Where to write logs to (if unspecified, stderr is used).
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Verbosity {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Verbosity> for LevelFilter {
    fn from(verbosity: Verbosity) -> LevelFilter {
        match verbosity {
            Verbosity::Off => LevelFilter::OFF,
            Verbosity::Error => LevelFilter::ERROR,
            Verbosity::Warn => LevelFilter::WARN,
            Verbosity::Info => LevelFilter::INFO,
            Verbosity::Debug => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }
}

fn init_logging(verbosity: Verbosity, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(verbosity).into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false);
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("couldn't create log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).with_ansi(false).init();
        }
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}

/// Merge the command line into the configuration file (if any) and validate
/// the result.
fn configure(args: &Args) -> Result<Configuration, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Configuration::read(path)?,
        None => Configuration {
            dumps: None,
            ownership: OwnershipTable::new(Vec::new(), Owner::new("")),
            tracker: None,
            create_tickets: false,
            symbols_paths: Vec::new(),
        },
    };

    if let Some(input) = &args.input {
        let source = config
            .dumps
            .get_or_insert_with(|| DumpSource::new(input.clone()));
        source.path = input.clone();
    }
    if let Some(source) = &mut config.dumps {
        source.recursive |= args.recursive;
        if let Some(pattern) = &args.pattern {
            source.pattern = pattern.clone();
        }
    }

    if !args.rules.is_empty() || args.default_owner.is_some() {
        let entries = if args.rules.is_empty() {
            config.ownership.entries().to_vec()
        } else {
            args.rules.clone()
        };
        let default_owner = args
            .default_owner
            .as_deref()
            .map(Owner::new)
            .unwrap_or_else(|| config.ownership.default_owner().clone());
        config.ownership = OwnershipTable::new(entries, default_owner);
    }

    config.tracker = match (args.tracker_url.clone(), args.project.clone(), config.tracker.take()) {
        (url, project, Some(target)) => Some(TrackerTarget {
            url: url.unwrap_or(target.url),
            project: project.unwrap_or(target.project),
        }),
        (Some(url), project, None) => Some(TrackerTarget {
            url,
            project: project.unwrap_or_default(),
        }),
        (None, Some(_), None) => {
            return Err(ConfigError::BadArgument(
                "--project needs a --tracker-url".to_owned(),
            ))
        }
        (None, None, None) => None,
    };
    config.create_tickets |= args.create_tickets;

    if !args.symbols_paths.is_empty() {
        config.symbols_paths = args.symbols_paths.clone();
    }

    config.validate()?;
    Ok(config)
}

fn prompt(label: &str) -> anyhow::Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{label}: ")?;
    stderr.flush()?;

    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("couldn't read from the terminal")?;
    if read == 0 {
        bail!("no input for {label}");
    }
    let value = line.trim_end_matches(&['\r', '\n'][..]);
    if value.is_empty() {
        bail!("{label} can't be empty");
    }
    Ok(value.to_owned())
}

/// Credentials from the command line, then from the terminal.
///
/// The first attempt uses whatever the command line provided and prompts for
/// the rest; after a rejection both are asked for again.
struct TerminalCredentials {
    user: Option<String>,
    password: Option<String>,
}

impl TerminalCredentials {
    fn field(given: &Option<String>, attempt: u32, label: &str) -> Option<String> {
        match given {
            Some(value) if attempt == 0 => Some(value.clone()),
            _ => prompt(label)
                .map_err(|err| warn!("giving up on the tracker login: {err:#}"))
                .ok(),
        }
    }
}

impl CredentialSource for TerminalCredentials {
    fn next_credentials(&mut self, attempt: u32) -> Option<Credentials> {
        if attempt > 0 {
            eprintln!("Login rejected, please try again.");
        }
        let user = Self::field(&self.user, attempt, "Tracker user")?;
        let password = Self::field(&self.password, attempt, "Tracker password")?;
        Some(Credentials { user, password })
    }
}

/// Prints reports and progress to the console.
struct ConsoleObserver {
    json: bool,
    color: bool,
    pause: bool,
}

impl ConsoleObserver {
    fn wait_for_enter(&self) {
        eprint!("Press Enter to continue...");
        let _ = io::stderr().flush();
        let mut line = String::new();
        if let Err(err) = io::stdin().lock().read_line(&mut line) {
            warn!("couldn't read from the terminal: {err}");
        }
    }

    fn finish(&self, summary: &BatchSummary, total: usize) {
        if self.json {
            return;
        }
        println!(
            "Triaged {} of {} dumps: {} matched a rule, {} failed, {} tickets filed, {} not filed.",
            summary.processed,
            total,
            summary.matched,
            summary.failed,
            summary.tickets,
            summary.unfiled
        );
    }
}

impl BatchObserver for ConsoleObserver {
    fn dump_classified(&mut self, report: &DumpReport<'_>) {
        if self.json {
            println!("{}", report.to_json());
        } else if let Err(err) = report.print(&mut io::stdout().lock(), self.color) {
            warn!("couldn't print the report of {}: {err}", report.dump.display());
        }
        if self.pause {
            self.wait_for_enter();
        }
    }

    fn ticket_created(&mut self, dump: &Path, issue: &RoutedIssue) {
        if self.json {
            println!(
                "{}",
                json!({
                    "dump": dump.display().to_string(),
                    "issue": issue.id,
                    "assignee": issue.assignment.assignee().map(|assignee| &assignee.name),
                })
            );
            return;
        }
        match &issue.assignment {
            Assignment::Owner(owner) => println!("Filed issue #{} for {}", issue.id, owner.name),
            Assignment::DefaultOwner { wanted, assignee } => println!(
                "Filed issue #{} for {} ({wanted} is not a project member)",
                issue.id, assignee.name
            ),
            Assignment::Unassigned { wanted } => println!(
                "Filed issue #{} unassigned ({wanted} is not a project member)",
                issue.id
            ),
        }
        println!();
    }

    fn dump_failed(&mut self, dump: &Path, err: &TriageError) {
        if self.json {
            println!(
                "{}",
                json!({
                    "dump": dump.display().to_string(),
                    "error": err.name(),
                    "message": err.to_string(),
                })
            );
        } else {
            println!("Dump: {}\nFailed: {err}\n", dump.display());
        }
    }
}

fn exit_status(err: &TriageError) -> u8 {
    match err {
        TriageError::ConfigurationInvalid(_) => 2,
        TriageError::AuthenticationFailed => 3,
        TriageError::ProjectNotFound(_) => 4,
        TriageError::DumpUnreadable { .. } | TriageError::TrackerUnavailable(_) => 1,
    }
}

async fn run(args: &Args) -> Result<(), TriageError> {
    let config = configure(args)?;
    if let Some(path) = &args.save_config {
        config.save(path)?;
        info!("saved configuration to {}", path.display());
    }

    let source = config.dumps.as_ref().ok_or(ConfigError::NoInput)?;
    let dumps = discover_dumps(source)?;
    if dumps.is_empty() {
        warn!("no dumps matching {} in {}", source.pattern, source.path.display());
    }

    let reader = MinidumpReader::new(config.symbols_paths.clone());
    let mut observer = ConsoleObserver {
        json: args.json,
        color: use_colors(!args.no_color),
        // Pausing between dumps would interleave prompts with the JSON lines.
        pause: !config.create_tickets && !args.no_pause && !args.json,
    };

    let summary = match config.ticket_target() {
        Some(target) => {
            let mut credentials = TerminalCredentials {
                user: args.user.clone(),
                password: args.password.clone(),
            };
            let session =
                authenticate_with_retry(&RedmineClient::default(), &target.url, &mut credentials)
                    .await?;
            let context = RoutingContext::connect(session, &target.project).await?;
            let processor = BatchProcessor::new(&reader, &config.ownership)
                .with_router(TicketRouter::new(&context, &config.ownership));
            processor.run(&dumps, &mut observer).await
        }
        None => {
            BatchProcessor::<_, RedmineSession>::new(&reader, &config.ownership)
                .run(&dumps, &mut observer)
                .await
        }
    };
    observer.finish(&summary, dumps.len());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = init_logging(args.verbose, args.log_file.as_deref()) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    // Set a panic hook to redirect to the logger
    panic::set_hook(Box::new(|panic_info| {
        let (filename, line) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line()))
            .unwrap_or(("<unknown>", 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref)
            .unwrap_or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<&str>()
                    .copied()
                    .unwrap_or("<cause unknown>")
            });
        error!("Panic - A panic occurred at {}:{}: {}", filename, line, cause);
    }));

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{} - {}", err.name(), err);
            ExitCode::from(exit_status(&err))
        }
    }
}
