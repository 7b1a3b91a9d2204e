use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "library-upgrader")]
#[command(version)]
#[command(about = "Replaces player library tracks with better-quality encodings, one checkpointed stage at a time", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long, default_value = "upgrader.toml", global = true)]
    pub config: PathBuf,

    /// Library to check against (a [libraries.<name>] table)
    #[arg(short = 'd', long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Snapshot every track in the player library
    LoadLibrary,

    /// Look up a replacement for each snapshot row and decide whether it is an upgrade
    CheckUpgrade {
        /// Snapshot to read (defaults to the current library snapshot)
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,

        /// Skip the title/artist/album comparison between files
        #[arg(long)]
        skip_tag_comparison: bool,
    },

    /// Copy or convert the upgradeable candidates into place
    #[command(alias = "convert-files")]
    Materialize {
        /// Upgrade-check checkpoint to read (defaults to the newest one)
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
    },

    /// Point the player at the materialized files
    ApplyUpdates {
        /// Materialize checkpoint to read (defaults to the newest one)
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
    },
}

/// Relative checkpoint names are looked up in the data directory.
pub fn resolve_checkpoint(data_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() || file.exists() {
        file.to_path_buf()
    } else {
        data_dir.join(file)
    }
}
