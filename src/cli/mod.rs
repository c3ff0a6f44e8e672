mod scenarios;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rowlock::IsolationLevel;
use scenarios::{ScenarioOptions, ScenarioResult};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rowlock")]
#[command(about = "Replays concurrent row-locking scenarios against the in-memory store")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Concurrent callers per round
    #[arg(long, global = true, default_value_t = 3)]
    attempts: usize,

    /// Processing time between read and write, in milliseconds
    #[arg(long, global = true, default_value_t = 500)]
    delay_ms: u64,

    /// read_committed or repeatable_read
    #[arg(long, global = true, default_value = "read_committed")]
    isolation: String,

    /// Print the reports as JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Book seat A15: no lock, BLOCKING, NOWAIT
    Tickets,
    /// Update a hero's age: no lock, BLOCKING, NOWAIT, SKIP_LOCKED
    Heroes,
    /// Both scenarios
    All,
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.attempts == 0 {
        bail!("--attempts must be at least 1");
    }

    let isolation: IsolationLevel = cli
        .isolation
        .parse()
        .with_context(|| format!("invalid --isolation '{}'", cli.isolation))?;

    let options = ScenarioOptions {
        attempts: cli.attempts,
        delay: Duration::from_millis(cli.delay_ms),
        isolation,
    };

    let mut results = Vec::new();
    if matches!(cli.command, Command::Tickets | Command::All) {
        results.extend(scenarios::tickets(&options).await?);
    }
    if matches!(cli.command, Command::Heroes | Command::All) {
        results.extend(scenarios::heroes(&options).await?);
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&results).context("failed to encode report")?
        );
    } else {
        results.iter().for_each(print_result);
    }
    Ok(())
}

fn print_result(result: &ScenarioResult) {
    println!("{}", "=".repeat(60));
    println!("{}", result.title);
    println!("{}", "=".repeat(60));
    println!("{}", result.report);
    println!("  final: {}", result.summary);
    println!("  {}", result.stats);
    println!();
}
