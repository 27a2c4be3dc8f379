use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;
mod util;

use cli::{Cli, Commands};
use commands::{cmd_clear, cmd_config, cmd_delete, cmd_list, cmd_purge, cmd_record};
use config::{Config, resolve_config_path, resolve_db_path};

#[tokio::main]
async fn main() -> Result<()> {
    human_panic::setup_panic!();

    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "gpslog", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // Logs go to stderr so listings on stdout stay machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load_from(&config_path);
    let db_path = resolve_db_path(cli.db.as_deref(), &config);
    let output = cli.output.as_deref();

    match cli.command {
        Commands::Record(args) => cmd_record(args, &db_path, &config, cli.quiet).await,
        Commands::List(args) => cmd_list(args, &db_path, output).await,
        Commands::Purge { older_than_hours } => {
            cmd_purge(older_than_hours, &db_path, &config, cli.quiet).await
        }
        Commands::Clear { yes } => cmd_clear(yes, &db_path, cli.quiet).await,
        Commands::Delete { id } => cmd_delete(&id, &db_path, cli.quiet).await,
        Commands::Config { action } => cmd_config(action, &config_path, &config),
        Commands::Completions { .. } => Ok(()),
    }
}
