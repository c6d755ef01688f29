use anyhow::Context;
use clap::Parser;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use syscommand::app::{handle_fatal_error, init_logging, AppConfig};
use syscommand::subprocess::{
    CommandBuilder, CommandError, MatchOptions, MatchSelect, MatchSource, PatternMatch,
    SystemCommand,
};
use tracing::debug;

/// Run a command and stream its output line by line
#[derive(Parser)]
#[command(name = "syscommand")]
#[command(about = "Run a command with line-aware output observation", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv adds thread ids)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a TOML file with command settings
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Report matches of this pattern on stdout
    #[arg(short = 'm', long = "match")]
    pattern: Option<Regex>,

    /// Match against each line or against the rendered output
    #[arg(long, default_value = "line")]
    match_source: MatchSource,

    /// Report the first or last occurrence per event
    #[arg(long, default_value = "first")]
    match_which: MatchSelect,

    /// Kill the command after this long (e.g. "500ms", "2s")
    #[arg(short = 'k', long, value_parser = humantime_serde::re::humantime::parse_duration)]
    kill_after: Option<Duration>,

    /// Command and its arguments
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let app = AppConfig::new(cli.verbose).with_config_path(cli.config.clone());
    init_logging(&app);

    match run(cli, &app).await {
        Ok(code) => std::process::exit(code),
        Err(e) => handle_fatal_error(e, app.verbose),
    }
}

async fn run(cli: Cli, app: &AppConfig) -> anyhow::Result<i32> {
    let config = app.command_config()?;

    let (program, args) = cli
        .command
        .split_first()
        .context("No command given")?;
    let builder = CommandBuilder::with_args(program, args.iter().map(String::as_str));
    debug!("Running: {}", builder);

    let cmd = SystemCommand::with_config(builder, config);
    cmd.stdout().on_line(|line| println!("{line}"));
    cmd.stderr().on_line(|line| eprintln!("{line}"));

    if let Some(pattern) = cli.pattern {
        let options = MatchOptions::new()
            .source(cli.match_source)
            .which(cli.match_which);
        cmd.stdout()
            .on_match(pattern, options, |m| println!("match: {}", describe(m)));
    }

    cmd.execute()
        .with_context(|| format!("Failed to start '{}'", cmd.command()))?;

    let result = match cli.kill_after {
        Some(after) => {
            tokio::select! {
                result = cmd.wait() => result,
                _ = tokio::time::sleep(after) => {
                    debug!("Killing command after {:?}", after);
                    match cmd.kill(None, true).await {
                        // Exited on its own between the deadline and the signal
                        Err(CommandError::SignalDelivery { .. }) => {}
                        other => {
                            other.context("Failed to kill command")?;
                        }
                    }
                    cmd.wait().await
                }
            }
        }
        None => cmd.wait().await,
    };

    match result {
        Ok(status) => {
            debug!("Command finished with {}", status);
            Ok(status.code().unwrap_or(1))
        }
        Err(CommandError::ExitStatusUnavailable(reason)) => {
            eprintln!("Exit status unavailable: {reason}");
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

/// Capture groups separated by spaces, or the whole match without groups.
fn describe(m: &PatternMatch) -> String {
    if m.captures.is_empty() {
        return m.matched.clone();
    }
    m.captures
        .iter()
        .map(|group| group.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}
