//! Cheap change detection for repository indexes.
//!
//! Every repository is probed with a HEAD request against `index-v1.jar`.
//! Repositories answering 404 get a second round against the legacy
//! `index.jar`. A repository is refreshed when its fingerprint moved or its
//! cache file disappeared.

use std::path::PathBuf;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::config::RepositorySource;
use crate::index::IndexFormat;
use crate::io::client::{HashingHttpClient, Probe, ScopeOptions};

/// Partition of the probed repositories, as indices into the input slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreshnessReport {
    /// Changed, served as `index-v1.jar`.
    pub new_format: Vec<usize>,
    /// Changed, served only as the legacy `index.jar`.
    pub legacy_format: Vec<usize>,
    /// Fingerprint unchanged and the cache is present.
    pub unchanged: Vec<usize>,
    /// Probe failed; an error record is attached.
    pub errored: Vec<usize>,
}

impl FreshnessReport {
    /// Indices needing a download in `format`.
    pub fn stale(&self, format: IndexFormat) -> &[usize] {
        match format {
            IndexFormat::Json => &self.new_format,
            IndexFormat::Xml => &self.legacy_format,
        }
    }
}

/// Probes repositories and updates their fingerprint and error state.
#[derive(Debug, Clone)]
pub struct FreshnessChecker {
    client: HashingHttpClient,
    timeout: Duration,
    cache_dir: PathBuf,
}

impl FreshnessChecker {
    /// Create a checker probing with `timeout` and looking for caches in `cache_dir`.
    pub fn new(client: HashingHttpClient, timeout: Duration, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            timeout,
            cache_dir: cache_dir.into(),
        }
    }

    /// Probe every source and classify it.
    ///
    /// Sources that fail with anything but 404 get an error record and are
    /// left out of every list but [`FreshnessReport::errored`]. A successful
    /// probe clears a previous error.
    pub async fn check(&self, sources: &mut [RepositorySource]) -> FreshnessReport {
        let mut report = FreshnessReport::default();

        let all: Vec<usize> = (0..sources.len()).collect();
        let missing = self.round(sources, &all, IndexFormat::Json, &mut report).await;
        let missing = self
            .round(sources, &missing, IndexFormat::Xml, &mut report)
            .await;
        for idx in missing {
            let source = &mut sources[idx];
            tracing::error!("{}: no index found", source.url());
            source.set_error(404, "no index-v1.jar or index.jar found");
            report.errored.push(idx);
        }

        report.new_format.sort_unstable();
        report.legacy_format.sort_unstable();
        report.unchanged.sort_unstable();
        report.errored.sort_unstable();
        report
    }

    /// Probe `targets` in `format`, returning the ones that answered 404.
    async fn round(
        &self,
        sources: &mut [RepositorySource],
        targets: &[usize],
        format: IndexFormat,
        report: &mut FreshnessReport,
    ) -> Vec<usize> {
        let jobs: Vec<(usize, String, ScopeOptions)> = targets
            .iter()
            .map(|&idx| (idx, sources[idx].index_url(format), sources[idx].scope()))
            .collect();

        let client = &self.client;
        let timeout = self.timeout;
        let probes: Vec<(usize, Probe)> = stream::iter(jobs)
            .map(|(idx, url, scope)| async move {
                (idx, client.probe(&url, scope.scope(), timeout).await)
            })
            .buffer_unordered(client.workers())
            .collect()
            .await;

        let mut not_found = Vec::new();
        for (idx, probe) in probes {
            let source = &mut sources[idx];
            match probe {
                Probe::Found(fingerprint) => {
                    source.clear_error();
                    let cached = source.cache_path(&self.cache_dir).is_file();
                    if cached && source.fingerprint() == Some(fingerprint.as_str()) {
                        tracing::info!("CACHE hit {}", source.url());
                        report.unchanged.push(idx);
                    } else {
                        tracing::info!("CACHE miss {} ({format})", source.url());
                        source.set_fingerprint(Some(fingerprint));
                        match format {
                            IndexFormat::Json => report.new_format.push(idx),
                            IndexFormat::Xml => report.legacy_format.push(idx),
                        }
                    }
                }
                Probe::NotFound => not_found.push(idx),
                Probe::Failed { code, message } => {
                    tracing::error!("{} ({code}): {message}", source.index_url(format));
                    source.set_error(code, message);
                    report.errored.push(idx);
                }
            }
        }
        not_found
    }
}
