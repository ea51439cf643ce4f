use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use larder_publish::ViewKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid output format '{other}', expected one of: table, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct RunArgs {
    #[arg(
        long = "input",
        value_name = "FILE",
        required = true,
        help = "JSON lines file of source rows; repeat for several sources"
    )]
    pub inputs: Vec<PathBuf>,

    #[arg(long, help = "Override the generated run id")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ScoreArgs {
    #[arg(long, help = "Score a single brand slug")]
    pub brand: Option<String>,

    #[arg(long, help = "Order brands by remaining effort instead of slug")]
    pub by_effort: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct TransitionArgs {
    #[arg(help = "Brand slug")]
    pub brand: String,

    #[arg(long, help = "Who requests the transition (defaults to [publish].default_actor)")]
    pub actor: Option<String>,

    #[arg(long, help = "Why the transition is requested")]
    pub reason: String,

    #[arg(
        long,
        help = "Revision the entry is expected to be at; defaults to the revision read just before applying"
    )]
    pub expected_revision: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct BrandFilterArgs {
    #[arg(help = "Brand slug; all brands when omitted")]
    pub brand: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum AllowlistCommand {
    /// Add a brand: ACTIVE when its quality report passes, else PENDING
    Add(TransitionArgs),
    /// Move a PENDING brand to ACTIVE if it passes right now
    Promote(TransitionArgs),
    /// Pause an ACTIVE or PENDING brand
    Pause(TransitionArgs),
    /// Bring a PAUSED brand back as ACTIVE or PENDING
    Reactivate(TransitionArgs),
    /// Remove a brand for good
    Remove(TransitionArgs),
    /// Show allowlist entries
    Show(BrandFilterArgs),
    /// Print the transition audit log
    Audit(BrandFilterArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ViewsArgs {
    #[arg(
        long,
        default_value = "production",
        value_parser = parse_view_kind,
        help = "View to print: preview or production"
    )]
    pub kind: ViewKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Write default config and brand table files if missing
    Init,
    /// Adapt, link and commit one batch of source rows
    Run(RunArgs),
    /// Print brand quality reports
    Score(ScoreArgs),
    /// Manage the brand allowlist
    #[command(subcommand)]
    Allowlist(AllowlistCommand),
    /// Project the catalog into a new preview/production generation
    Publish,
    /// Restore the previous view generation
    Rollback,
    /// Print the current published view
    Views(ViewsArgs),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Larder catalog reconciliation engine")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .larder/"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[arg(
        long,
        global = true,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}

fn parse_view_kind(value: &str) -> Result<ViewKind, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn run_accepts_repeated_inputs_and_global_flags() {
        let cli = Cli::try_parse_from([
            "larderd",
            "run",
            "--input",
            "a.jsonl",
            "--input",
            "b.jsonl",
            "--workspace",
            "/tmp/ws",
            "--log-format",
            "json",
        ])
        .expect("run should parse");

        assert_eq!(cli.workspace, PathBuf::from("/tmp/ws"));
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(
                    args.inputs,
                    vec![PathBuf::from("a.jsonl"), PathBuf::from("b.jsonl")]
                );
                assert!(args.run_id.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_requires_an_input() {
        assert!(Cli::try_parse_from(["larderd", "run"]).is_err());
    }

    #[test]
    fn allowlist_transition_requires_reason() {
        assert!(Cli::try_parse_from(["larderd", "allowlist", "pause", "acme"]).is_err());

        let cli = Cli::try_parse_from([
            "larderd",
            "allowlist",
            "promote",
            "acme",
            "--reason",
            "coverage fixed",
            "--expected-revision",
            "3",
        ])
        .expect("promote should parse");
        match cli.command {
            Commands::Allowlist(AllowlistCommand::Promote(args)) => {
                assert_eq!(args.brand, "acme");
                assert_eq!(args.reason, "coverage fixed");
                assert_eq!(args.expected_revision, Some(3));
                assert!(args.actor.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn views_kind_and_output_parse() {
        let cli = Cli::try_parse_from(["larderd", "views", "--kind", "preview", "--output", "json"])
            .expect("views should parse");
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Views(args) => assert_eq!(args.kind, ViewKind::Preview),
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["larderd", "views", "--kind", "staging"]).is_err());
    }
}
