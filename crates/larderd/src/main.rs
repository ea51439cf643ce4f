use std::io::Write;

use anyhow::{Context, Result};
use larderd::cli::{Cli, Commands, parse_cli};
use larderd::commands::{
    run_allowlist_command, run_init_command, run_publish_command, run_rollback_command,
    run_run_command, run_score_command, run_views_command,
};
use larderd::logging::init_tracing;

fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(cli.log_format)?;
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Commands::Init) {
        std::fs::create_dir_all(&cli.workspace).with_context(|| {
            format!("failed to create workspace {}", cli.workspace.display())
        })?;
    }
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    let mut out = std::io::stdout().lock();
    let format = cli.output;
    match cli.command {
        Commands::Init => run_init_command(&workspace, &mut out),
        Commands::Run(args) => run_run_command(&workspace, args, format, &mut out),
        Commands::Score(args) => run_score_command(&workspace, args, format, &mut out),
        Commands::Allowlist(command) => {
            run_allowlist_command(&workspace, command, format, &mut out)
        }
        Commands::Publish => run_publish_command(&workspace, format, &mut out),
        Commands::Rollback => run_rollback_command(&workspace, format, &mut out),
        Commands::Views(args) => run_views_command(&workspace, args, format, &mut out),
    }?;

    out.flush().context("failed to flush output")
}
