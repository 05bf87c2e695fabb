mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::run::RunArgs;

#[derive(Parser)]
#[command(
    name = "seqr",
    about = "Run shell steps through a gated, undoable command sequence",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output run reports as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log run progress and step output
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a sequence from shell steps and drive it
    Run(RunArgs),
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run(args) => cmd::run::run(args, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
