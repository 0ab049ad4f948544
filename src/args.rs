//! Command-line interface definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mailreg")]
#[command(version, about = "Bulk webmail account registration with human-in-the-loop verification")]
pub struct Cli {
    /// Path to a TOML configuration overlay (defaults to ./mailreg.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a single account end-to-end and exit.
    Register {
        /// Email local part, e.g. 'cursorjr002'.
        local: String,

        /// Registration password (shared default when omitted).
        #[arg(short, long)]
        password: Option<String>,

        /// Phone number for SMS verification.
        #[arg(short = 'm', long)]
        phone: Option<String>,
    },

    /// Register an inclusive range of accounts, e.g. user01 through user10.
    Batch {
        /// First prefix of the range, e.g. 'user01'.
        #[arg(long)]
        start: String,

        /// Last prefix of the range, e.g. 'user10'.
        #[arg(long)]
        end: String,

        /// Registration password shared by every attempt.
        #[arg(short, long)]
        password: Option<String>,

        /// Phone number shared by every attempt.
        #[arg(short = 'm', long)]
        phone: Option<String>,
    },
}
