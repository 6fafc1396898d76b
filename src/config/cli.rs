//! Command-line argument definitions for runbox.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Command-line interface for runbox.
#[derive(Debug, Parser)]
#[command(name = "runbox")]
#[command(
    author,
    version,
    about = "Sandboxed execution service for code snippets"
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Container engine socket path or URL.
    #[arg(long, global = true)]
    pub engine_socket: Option<String>,

    /// Container image snippets run in.
    #[arg(long, global = true)]
    pub image: Option<String>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve the snippet-execution HTTP API.
    Serve(ServeArgs),

    /// Verify the container engine is reachable and responsive.
    Check,
}

/// Arguments for the `serve` subcommand.
#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Address to bind the HTTP listener to.
    #[arg(long)]
    pub listen: Option<String>,
}
