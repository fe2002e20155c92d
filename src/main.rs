mod cli;

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use moex_history::config::ClientConfig;
use moex_history::records::{Record, Table};
use moex_history::IssClient;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ClientConfig::builtin(),
    };
    let client = IssClient::new(config).context("Failed to set up ISS client")?;

    match cli.command {
        Commands::Candles {
            ref security,
            ref interval,
            from,
            till,
            count,
        } => {
            let table = client
                .get_candles(security, interval, from, till, count)
                .await
                .with_context(|| format!("Failed to fetch candles for {}", security))?;
            write_table(&table, cli.output.as_deref())?;
        }
        Commands::Securities { board_group } => {
            let table = client
                .get_securities(board_group)
                .await
                .context("Failed to fetch securities")?;
            write_table(&table, cli.output.as_deref())?;
        }
    }

    Ok(())
}

fn write_table<R: Record>(table: &Table<R>, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => table
            .save_to_csv(path)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => table
            .write_csv(io::stdout().lock())
            .context("Failed to write CSV to stdout")?,
    }
    Ok(())
}
