//! Incremental fetch-and-verify pipeline for app-store repository mirrors.
//!
//! The stages run in this order for every pass over the configured sources:
//!
//! ```text
//! FreshnessChecker -> IndexFetcher -> IndexParser -> IndexStore (cache)
//!     -> PackageSelector -> VerifiedDownloader
//! ```
//!
//! [`mirror::Mirror`] wires the stages together into the `index`, `metadata`,
//! `apk` and `src` phases.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod freshness;
pub mod index;
pub mod io;
pub mod metadata;
pub mod mirror;
pub mod paths;
pub mod selector;
pub mod sidecar;
pub mod store;

pub use config::{ConfigStore, MirrorConfig, RepositorySettings, RepositorySource, Settings};
pub use error::MirrorError;
pub use io::client::{HashingHttpClient, human_size};
pub use io::download::{DownloadOutcome, DownloadSummary, VerifiedDownloader};
pub use mirror::{Mirror, PhaseSummary};
pub use paths::Layout;

/// User Agent string sent with every request.
pub const USER_AGENT: &str = concat!("fdroid-dl/", env!("CARGO_PKG_VERSION"));
