//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Hostkit - download, inspect and extract files through host commands
#[derive(Parser, Debug)]
#[command(name = "hostkit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to <config_dir>/hostkit/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download a URL, resuming any partial file
    Download {
        /// URL to download
        url: String,

        /// Output file (derived from the URL when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print an archive's manifest as JSON
    Info {
        /// Archive to inspect
        archive: PathBuf,
    },

    /// Extract an archive, reporting progress
    Extract {
        /// Archive to extract
        archive: PathBuf,

        /// Directory to extract into (created if missing)
        #[arg(short = 'd', long = "dir")]
        dir: Option<PathBuf>,
    },

    /// Run a command in the background and stream its output
    Run {
        /// Command line to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,

        /// Working directory for the command
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
}
