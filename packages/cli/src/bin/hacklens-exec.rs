use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;

mod cli;

use cli::SettingsArgs;

#[derive(Parser)]
#[command(name = "hacklens-exec")]
#[command(about = "HackLens code execution engine - run untrusted code in throwaway sandboxes")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a source file in a sandbox
    Run {
        /// Source file to execute ("-" reads stdin)
        file: PathBuf,

        /// Language identifier (inferred from the file extension when omitted)
        #[arg(short, long)]
        language: Option<String>,

        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// List supported languages
    Languages,
    /// Check engine connectivity and image readiness
    Check {
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Pull every language image ahead of traffic
    Prefetch {
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Remove sandboxes left behind by a crashed process
    Cleanup {
        /// Only remove sandboxes older than this many seconds
        #[arg(long, default_value = "300")]
        min_age_secs: u64,

        /// Report what would be removed without removing anything
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        settings: SettingsArgs,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match handle_command(cli.command, cli.json).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(2);
        }
    }
}

/// Returns whether the command succeeded; `Err` is reserved for operator errors
async fn handle_command(command: Commands, json: bool) -> anyhow::Result<bool> {
    match command {
        Commands::Run {
            file,
            language,
            settings,
        } => cli::run::run_command(&file, language, &settings, json).await,
        Commands::Languages => cli::engine::languages_command(json),
        Commands::Check { settings } => cli::engine::check_command(&settings, json).await,
        Commands::Prefetch { settings } => cli::engine::prefetch_command(&settings, json).await,
        Commands::Cleanup {
            min_age_secs,
            dry_run,
            settings,
        } => cli::engine::cleanup_command(min_age_secs, dry_run, &settings, json).await,
    }
}
