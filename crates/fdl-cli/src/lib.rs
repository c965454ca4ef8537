//! fdroid-dl - F-Droid repository mirror
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Point the tool at one or more F-Droid repositories and it mirrors their
//! index, metadata (texts, icons, screenshots) and packages into a local
//! directory tree, ready for `fdroid update`.
//!
//! # Directory Layout
//!
//! ```text
//! ./
//! ├── fdroid-dl.json   # repositories, selection rules, manual metadata
//! ├── repo/            # verified packages and source archives
//! ├── metadata/        # <appid>.yml sidecars, texts and graphics
//! └── .cache/          # normalized indexes, tmp/ for in-flight downloads
//! ```

pub mod cmd;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use fdl_core::{Layout, Settings};

#[derive(Debug, Parser)]
#[command(name = "fdroid-dl")]
#[command(author, version, about = "fdroid-dl - incremental F-Droid repository mirror")]
pub struct Cli {
    /// Enable debug level logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Location of the configuration file
    #[arg(short, long, global = true, default_value = "fdroid-dl.json")]
    pub config: PathBuf,

    /// Directory receiving the package files
    #[arg(short, long, global = true, default_value = "./repo")]
    pub repo: PathBuf,

    /// Directory receiving the metadata files
    #[arg(short, long, global = true, default_value = "./metadata")]
    pub metadata: PathBuf,

    /// Directory for cached indexes
    #[arg(long, global = true, default_value = "./.cache")]
    pub cache: PathBuf,

    #[command(flatten)]
    pub tuning: Tuning,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Directory layout selected on the command line.
    pub fn layout(&self) -> Layout {
        Layout {
            config_file: self.config.clone(),
            repo_dir: self.repo.clone(),
            metadata_dir: self.metadata.clone(),
            cache_dir: self.cache.clone(),
        }
    }
}

/// Concurrency and timeout knobs, accepted by every command.
#[derive(Debug, Args)]
pub struct Tuning {
    /// Concurrent requests per batch
    #[arg(long, global = true, env = "FDROID_DL_WORKERS", default_value_t = 10)]
    pub workers: usize,

    /// Seconds to wait for an index freshness probe
    #[arg(long, global = true, default_value_t = 10)]
    pub head_timeout: u64,

    /// Seconds to wait for an index download
    #[arg(long, global = true, default_value_t = 60)]
    pub index_timeout: u64,

    /// Seconds to wait for a package or asset download
    #[arg(long, global = true, default_value_t = 600)]
    pub download_timeout: u64,

    /// How many versions of each package to keep
    #[arg(long, global = true, default_value_t = 1, allow_negative_numbers = true)]
    pub apk_versions: i64,
}

impl Tuning {
    pub fn settings(&self) -> Settings {
        Settings {
            workers: self.workers.max(1),
            head_timeout: Duration::from_secs(self.head_timeout),
            index_timeout: Duration::from_secs(self.index_timeout),
            download_timeout: Duration::from_secs(self.download_timeout),
            apk_versions: self.apk_versions.max(1),
            ..Settings::default()
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the update phases: index, metadata, apk, src
    Update {
        /// Skip the repository index phase
        #[arg(long)]
        no_index: bool,
        /// Skip the metadata phase
        #[arg(long)]
        no_metadata: bool,
        /// Skip the package phase
        #[arg(long)]
        no_apk: bool,
        /// Skip the source archive phase
        #[arg(long)]
        no_src: bool,
    },
    /// Refresh repository indexes
    Index,
    /// Write sidecars and texts, download graphics
    Metadata,
    /// Download verified packages
    Apk,
    /// Download source archives
    Src,
}

impl Commands {
    /// Phases this command runs, in order.
    pub fn phases(&self) -> Vec<Phase> {
        match *self {
            Self::Update {
                no_index,
                no_metadata,
                no_apk,
                no_src,
            } => Phase::ALL
                .into_iter()
                .filter(|p| match p {
                    Phase::Index => !no_index,
                    Phase::Metadata => !no_metadata,
                    Phase::Apk => !no_apk,
                    Phase::Src => !no_src,
                })
                .collect(),
            Self::Index => vec![Phase::Index],
            Self::Metadata => vec![Phase::Metadata],
            Self::Apk => vec![Phase::Apk],
            Self::Src => vec![Phase::Src],
        }
    }
}

/// A single update phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Index,
    Metadata,
    Apk,
    Src,
}

impl Phase {
    pub const ALL: [Self; 4] = [Self::Index, Self::Metadata, Self::Apk, Self::Src];
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_phase_toggles_and_tuning() {
        let cli = Cli::parse_from([
            "fdroid-dl",
            "--repo",
            "/srv/repo",
            "update",
            "--no-src",
            "--workers",
            "4",
            "--apk-versions",
            "0",
        ]);
        assert!(matches!(cli.command, Commands::Update { no_src: true, no_apk: false, .. }));
        assert_eq!(cli.command.phases(), vec![Phase::Index, Phase::Metadata, Phase::Apk]);
        assert_eq!(cli.layout().repo_dir, PathBuf::from("/srv/repo"));
        let settings = cli.tuning.settings();
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.apk_versions, 1);
        assert_eq!(settings.download_timeout, Duration::from_secs(600));
    }

    #[test]
    fn parses_single_phase() {
        let cli = Cli::parse_from(["fdroid-dl", "-d", "apk", "--download-timeout", "30"]);
        assert_eq!(cli.command.phases(), vec![Phase::Apk]);
        assert!(cli.debug);
        assert_eq!(cli.tuning.settings().download_timeout, Duration::from_secs(30));
    }

    #[test]
    fn update_runs_every_phase_by_default() {
        let cli = Cli::parse_from(["fdroid-dl", "update"]);
        assert_eq!(cli.command.phases(), Phase::ALL.to_vec());
    }
}
