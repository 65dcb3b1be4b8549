pub mod commands;

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "vigil",
    about = "Vigil operator CLI",
    long_about = "Inspect Vigil configuration, check relay readiness, and preview how priority labels are classified.",
    after_help = "Examples:\n  vigil doctor --json\n  vigil config\n  vigil classify critical"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, credentials, prompt template and priority floor")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Show the rank and color a priority label classifies to")]
    Classify {
        #[arg(help = "Priority label as it would arrive in an alert body")]
        label: String,
    },
}

pub fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let exit_code = execute(cli, &mut io::stdout().lock())?;
    Ok(ExitCode::from(exit_code))
}

/// Runs one command and writes its output. Returns the process exit code.
pub fn execute(cli: Cli, out: &mut impl Write) -> anyhow::Result<u8> {
    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Classify { label } => commands::classify::run(&label),
    };

    writeln!(out, "{}", result.output).context("failed to write command output")?;
    Ok(result.exit_code)
}
