// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Conduit CLI
//!
//! Command-line interface for the Conduit byte-stream transport.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use conduit_core::Role;

mod commands;

use commands::TransportArgs;

/// Conduit - Bounded byte streams over shared memory or named pipes
#[derive(Parser)]
#[command(name = "conduit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream a file (or stdin) into the transport
    Produce {
        #[command(flatten)]
        transport: TransportArgs,

        /// Input file, stdin if omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Bytes per write
        #[arg(long, default_value_t = commands::DEFAULT_CHUNK)]
        chunk: usize,
    },

    /// Stream transport data to a file (or stdout)
    Consume {
        #[command(flatten)]
        transport: TransportArgs,

        /// Output file, stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many bytes
        #[arg(short, long)]
        bytes: Option<u64>,

        /// Bytes per read
        #[arg(long, default_value_t = commands::DEFAULT_CHUNK)]
        chunk: usize,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// Mark a stale shared memory region for removal
    Remove {
        /// Key path the region was created with
        #[arg(long)]
        path: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging. Stdout may carry the byte stream, so logs go to stderr.
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Produce {
            transport,
            input,
            chunk,
        } => {
            let config = transport.resolve(cli.config.as_deref(), Role::Producer)?;
            commands::produce::execute(&config, input.as_deref(), chunk)
        }
        Commands::Consume {
            transport,
            output,
            bytes,
            chunk,
        } => {
            let config = transport.resolve(cli.config.as_deref(), Role::Consumer)?;
            commands::consume::execute(&config, output.as_deref(), bytes, chunk)
        }
        Commands::Validate { file } => commands::validate::execute(&file),
        Commands::Remove { path } => commands::remove::execute(&path),
    }
}
