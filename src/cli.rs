use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "moex-history")]
#[command(about = "Fetch historical candles and security listings from the Moscow Exchange ISS")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON client configuration; builtin ISS defaults when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Write CSV to this file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download candles for one security
    Candles {
        /// Security id (e.g. SBER)
        security: String,

        /// One of 1, 10, 60, D, W, M
        #[arg(short, long, default_value = "D")]
        interval: String,

        /// First day of the window (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day of the window, or the anchor for --count (YYYY-MM-DD)
        #[arg(long)]
        till: Option<NaiveDate>,

        /// Return only the most recent N candles
        #[arg(long)]
        count: Option<usize>,
    },

    /// List securities of the configured market
    Securities {
        #[arg(long)]
        board_group: Option<u32>,
    },
}
