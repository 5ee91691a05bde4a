//! CLI command definitions and the command router.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{ArgGroup, CommandFactory, Parser, Subcommand};

use reviewtask_core::config::Config;
use reviewtask_core::model::{RepoSlug, TaskStatus};
use reviewtask_core::source::{GitHubSource, ReviewSource};
use reviewtask_core::CoreResult;

use crate::output::{Formatter, OutputFormat};

pub mod commands;

use commands::helpers::{parse_repo, RepoContext};

const ROOT_HELP_TEMPLATE: &str = "\
{about-with-newline}
Usage:
  {usage}

Available Commands:
  fetch       Fetch GitHub Pull Request reviews and generate tasks
  help        Print this message or the help of the given subcommand(s)
  init        Initialize reviewtask in the current repository
  show        Show tasks for a pull request
  update      Update the status or notes of a task

Flags:
{options}
{after-help}
";

const ROOT_EXAMPLES: &str = "\
Examples:
  reviewtask init         # Set up reviewtask in this repository
  reviewtask fetch        # Check reviews for current branch's PR
  reviewtask fetch 123    # Check reviews for PR #123
  reviewtask show         # List tasks
  reviewtask update t1-2223f392e22c51d9 --status done";

const FETCH_LONG_ABOUT: &str = "\
Fetch GitHub Pull Request reviews, save them locally, and turn actionable
review comments into tasks.

Without PR_NUMBER, the open pull request for the current branch is used.
Running fetch again is safe: tasks are matched to their source comments,
your status and notes are kept, and tasks whose comments were resolved or
deleted upstream are cancelled.";

/// reviewtask fetches GitHub Pull Request reviews and turns them into actionable tasks
#[derive(Parser, Debug)]
#[command(name = "reviewtask")]
#[command(version, long_about = None)]
#[command(help_template = ROOT_HELP_TEMPLATE, after_help = ROOT_EXAMPLES)]
pub struct Cli {
    /// Output JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// GitHub repository as owner/repo (default: the origin remote)
    #[arg(long, global = true, value_name = "OWNER/REPO", value_parser = parse_repo)]
    pub repo: Option<RepoSlug>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize reviewtask in the current repository
    Init,

    /// Fetch GitHub Pull Request reviews and generate tasks
    #[command(long_about = FETCH_LONG_ABOUT, override_usage = "reviewtask fetch [PR_NUMBER]")]
    Fetch {
        /// Pull request number (default: the PR for the current branch)
        #[arg(value_name = "PR_NUMBER")]
        pr_number: Option<u64>,
    },

    /// Show tasks for a pull request
    Show {
        /// Pull request number (default: the only PR with tasks)
        #[arg(value_name = "PR_NUMBER")]
        pr_number: Option<u64>,

        /// Only show tasks with this status
        #[arg(long)]
        status: Option<TaskStatus>,
    },

    /// Update the status or notes of a task
    #[command(group(ArgGroup::new("change").required(true).multiple(true).args(["status", "notes"])))]
    Update {
        /// Task ID (from `reviewtask show`)
        task_id: String,

        /// New status
        #[arg(long)]
        status: Option<TaskStatus>,

        /// Replace the task notes (empty string clears them)
        #[arg(long)]
        notes: Option<String>,

        /// Pull request the task belongs to (default: search all)
        #[arg(long = "pr", value_name = "PR_NUMBER")]
        pr_number: Option<u64>,
    },
}

/// Builds the review source for a fetch. Injected so tests can run the
/// router without network access.
pub trait SourceProvider {
    fn source(&self, config: &Config) -> CoreResult<Box<dyn ReviewSource>>;
}

/// Production provider: the GitHub API.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHubProvider;

impl SourceProvider for GitHubProvider {
    fn source(&self, config: &Config) -> CoreResult<Box<dyn ReviewSource>> {
        Ok(Box::new(GitHubSource::new(&config.github)?))
    }
}

/// Failure of a router invocation.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Bad arguments or unknown command.
    #[error("{0}")]
    Usage(String),
    /// The command ran and failed.
    #[error("{0:#}")]
    Failed(anyhow::Error),
}

impl CliError {
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Failed(_) => 1,
        }
    }
}

/// Result of argument parsing.
#[derive(Debug)]
pub enum Parsed {
    /// Static text to print (help or version). Nothing else runs.
    Help(String),
    Command(Cli),
}

/// Dispatches parsed arguments to command handlers.
pub struct Router {
    provider: Box<dyn SourceProvider>,
    workdir: PathBuf,
    init_logging: bool,
}

impl Router {
    #[must_use]
    pub fn new(provider: Box<dyn SourceProvider>, workdir: PathBuf) -> Self {
        Self {
            provider,
            workdir,
            init_logging: false,
        }
    }

    /// Install the tracing subscriber once a command has parsed.
    #[must_use]
    pub const fn with_logging(mut self) -> Self {
        self.init_logging = true;
        self
    }

    /// Parse `args` (including the program name).
    ///
    /// No subcommand, `--help`, and `--version` all come back as
    /// [`Parsed::Help`].
    pub fn parse<I, T>(args: I) -> Result<Parsed, CliError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match Cli::try_parse_from(args) {
            Ok(cli) if cli.command.is_none() => Ok(Parsed::Help(root_help())),
            Ok(cli) => Ok(Parsed::Command(cli)),
            Err(err) => match err.kind() {
                ErrorKind::DisplayHelp
                | ErrorKind::DisplayVersion
                | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                    Ok(Parsed::Help(err.render().to_string()))
                }
                _ => Err(CliError::Usage(usage_message(&err))),
            },
        }
    }

    /// Parse and run.
    pub fn run<I, T>(&self, args: I, out: &mut dyn Write) -> Result<(), CliError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match Self::parse(args)? {
            Parsed::Help(text) => write!(out, "{text}").map_err(|e| CliError::Failed(e.into())),
            Parsed::Command(cli) => self.execute(cli, out),
        }
    }

    /// Run a parsed command.
    pub fn execute(&self, cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
        let Some(command) = cli.command else {
            return write!(out, "{}", root_help()).map_err(|e| CliError::Failed(e.into()));
        };

        if self.init_logging {
            crate::logging::init(cli.json);
        }
        let format = Formatter::new(OutputFormat::from_json_flag(cli.json));
        let ctx = RepoContext::discover(&self.workdir, cli.repo);

        let result = match command {
            Commands::Init => commands::run_init(&ctx, format, out),
            Commands::Fetch { pr_number } => {
                commands::run_fetch(&ctx, self.provider.as_ref(), pr_number, format, out)
            }
            Commands::Show { pr_number, status } => {
                commands::run_show(&ctx, pr_number, status, format, out)
            }
            Commands::Update {
                task_id,
                status,
                notes,
                pr_number,
            } => commands::run_update(&ctx, &task_id, status, notes, pr_number, format, out),
        };
        result.map_err(CliError::Failed)
    }
}

fn root_help() -> String {
    Cli::command().render_help().to_string()
}

fn usage_message(err: &clap::Error) -> String {
    if err.kind() == ErrorKind::InvalidSubcommand {
        if let Some(ContextValue::String(name)) = err.get(ContextKind::InvalidSubcommand) {
            return format!("unknown command \"{name}\" for \"reviewtask\"");
        }
    }
    let rendered = err.render().to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).to_string()
}
