use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(
        short,
        long,
        value_name = "FILE",
        help = "Path to the settings file (default: ~/.dxsync/config.json)"
    )]
    pub config: Option<PathBuf>,
    #[clap(short, long, help = "Print verbose diagnostic logs for debugging")]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Validate settings and external tools without touching locks or remotes")]
    Check {},
}
