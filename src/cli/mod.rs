//! Command-line interface.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "klipp", version, about = "Self-hosted video search: transcribe, chunk, and hybrid-search long-form video")]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server and the directory watcher
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value = "8000")]
        port: u16,
    },

    /// Register new files from the video directory
    Scan {
        /// Also run the pipeline on everything newly registered
        #[arg(long)]
        process: bool,
    },

    /// Queue every video that has no transcript yet and wait
    ProcessPending,

    /// Search the index from the command line
    Search {
        query: String,
        #[arg(short = 'k', long, default_value = "10")]
        top_k: usize,
        /// Dense-only, skip the lexical side
        #[arg(long)]
        no_fts: bool,
    },

    /// Check external tools and configuration
    Doctor,
}

pub mod commands;
