//! Concurrent downloads with content-hash verification.
//!
//! Every body is streamed into a private temporary file in the staging
//! directory. Only after the digest matches is the file renamed onto its
//! destination, so a partial or corrupt transfer never appears under the
//! final name and never clobbers an existing good copy.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fdl_schema::HashAlgorithm;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Method;
use tempfile::TempPath;
use thiserror::Error;

use crate::error::MirrorError;
use crate::io::client::{HashingHttpClient, ScopeOptions, human_size, stream_body};
use crate::io::hashing;

/// Failure of a single transfer.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Transport failure or timeout.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server answered with a non-2xx status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The received body does not match the catalog digest.
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Digest published in the catalog.
        expected: String,
        /// Digest of the received body.
        actual: String,
    },

    /// A blocking worker panicked or was cancelled.
    #[error("worker failed: {0}")]
    Join(String),
}

/// Digest a download must match before it is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedHash {
    /// Hex digest.
    pub hash: String,
    /// Algorithm the digest was computed with.
    pub algorithm: HashAlgorithm,
}

/// One queued transfer.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Source URL.
    pub url: String,
    /// Final location of the verified file.
    pub destination: PathBuf,
    /// Per-request ceiling.
    pub timeout: Duration,
    /// Digest to verify; `None` places the body unverified.
    pub expected: Option<ExpectedHash>,
    /// Credentials and TLS settings of the owning repository.
    pub scope: ScopeOptions,
}

/// Result of one transfer, in completion order.
#[derive(Debug)]
pub struct DownloadOutcome {
    /// `true` if the destination now holds the verified body.
    pub success: bool,
    /// Source URL.
    pub url: String,
    /// Final location.
    pub destination: PathBuf,
    /// Bytes received.
    pub bytes: u64,
    /// `bytes` rendered for humans.
    pub human_size: String,
    /// Wall time of the transfer, including verification.
    pub elapsed: Duration,
    /// Why the transfer failed.
    pub error: Option<MirrorError>,
}

/// Aggregate counters for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Transfers that placed a file.
    pub ok: usize,
    /// Transfers that failed.
    pub failed: usize,
    /// Items satisfied without a transfer.
    pub skipped: usize,
    /// Bytes received by successful transfers.
    pub bytes: u64,
}

impl DownloadSummary {
    /// Count one outcome.
    pub fn record(&mut self, outcome: &DownloadOutcome) {
        if outcome.success {
            self.ok += 1;
            self.bytes += outcome.bytes;
        } else {
            self.failed += 1;
        }
    }

    /// Add another batch's counters.
    pub fn merge(&mut self, other: DownloadSummary) {
        self.ok += other.ok;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
    }
}

/// Queue of verified downloads executed on a bounded pool.
#[derive(Debug)]
pub struct VerifiedDownloader {
    client: HashingHttpClient,
    staging: PathBuf,
    queue: Vec<DownloadJob>,
}

impl VerifiedDownloader {
    /// Create a downloader staging bodies under `staging`.
    ///
    /// `staging` should be on the same filesystem as the destinations.
    pub fn new(client: HashingHttpClient, staging: impl Into<PathBuf>) -> Self {
        Self {
            client,
            staging: staging.into(),
            queue: Vec::new(),
        }
    }

    /// Enqueue a download with default request scope.
    pub fn download(
        &mut self,
        url: &str,
        destination: impl Into<PathBuf>,
        timeout: Duration,
        expected: Option<ExpectedHash>,
    ) {
        self.enqueue(DownloadJob {
            url: url.to_string(),
            destination: destination.into(),
            timeout,
            expected,
            scope: ScopeOptions::default(),
        });
    }

    /// Enqueue a fully specified job.
    pub fn enqueue(&mut self, job: DownloadJob) {
        self.queue.push(job);
    }

    /// Number of queued jobs.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Run every queued job, yielding one outcome per job as transfers finish.
    ///
    /// The queue is drained; jobs enqueued afterwards belong to the next call.
    pub fn results(&mut self) -> BoxStream<'static, DownloadOutcome> {
        let jobs = std::mem::take(&mut self.queue);
        let client = self.client.clone();
        let staging = self.staging.clone();
        let workers = client.workers();
        stream::iter(jobs)
            .map(move |job| run(client.clone(), staging.clone(), job))
            .buffer_unordered(workers)
            .boxed()
    }

    /// Run every queued job, logging each outcome, and return the counters.
    pub async fn drain(&mut self) -> DownloadSummary {
        let mut summary = DownloadSummary::default();
        let mut results = self.results();
        while let Some(outcome) = results.next().await {
            match &outcome.error {
                None => tracing::info!(
                    "{} [{}] ({:.2?})",
                    outcome.destination.display(),
                    outcome.human_size,
                    outcome.elapsed
                ),
                Some(err) => tracing::warn!("{}: {err}", outcome.url),
            }
            summary.record(&outcome);
        }
        summary
    }
}

async fn run(client: HashingHttpClient, staging: PathBuf, job: DownloadJob) -> DownloadOutcome {
    let start = Instant::now();
    let result = transfer(&client, &staging, &job).await;
    let (success, bytes, error) = match result {
        Ok(bytes) => (true, bytes, None),
        Err(e) => (false, 0, Some(MirrorError::from_download(&job.url, e))),
    };
    DownloadOutcome {
        success,
        url: job.url,
        destination: job.destination,
        bytes,
        human_size: human_size(bytes),
        elapsed: start.elapsed(),
        error,
    }
}

async fn transfer(
    client: &HashingHttpClient,
    staging: &Path,
    job: &DownloadJob,
) -> Result<u64, DownloadError> {
    let resp = client
        .request(Method::GET, &job.url, job.scope.scope(), job.timeout)
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(DownloadError::Status(resp.status().as_u16()));
    }

    tokio::fs::create_dir_all(staging).await?;
    let (file, temp_path) = tempfile::Builder::new()
        .prefix(".fdl-")
        .tempfile_in(staging)?
        .into_parts();
    let mut file = tokio::fs::File::from_std(file);
    let bytes = stream_body(resp, &mut file).await?;
    drop(file);

    if let Some(expected) = &job.expected {
        let path = temp_path.to_path_buf();
        let algorithm = expected.algorithm;
        let actual = tokio::task::spawn_blocking(move || hashing::hash_file(&path, algorithm))
            .await
            .map_err(|e| DownloadError::Join(e.to_string()))??;
        if !actual.eq_ignore_ascii_case(expected.hash.trim()) {
            // temp_path is removed on drop
            return Err(DownloadError::HashMismatch {
                expected: expected.hash.clone(),
                actual,
            });
        }
    }

    place(temp_path, &job.destination).await?;
    Ok(bytes)
}

/// Move a verified temp file onto `dest`.
async fn place(temp: TempPath, dest: &Path) -> Result<(), DownloadError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || persist(temp, &dest))
        .await
        .map_err(|e| DownloadError::Join(e.to_string()))??;
    Ok(())
}

fn persist(temp: TempPath, dest: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o644))?;
    }

    match temp.persist(dest) {
        Ok(()) => Ok(()),
        Err(e) if e.error.kind() == io::ErrorKind::CrossesDevices => {
            // Staging is on another volume: copy next to the destination, then rename.
            let parent = dest
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let mut sibling = tempfile::Builder::new()
                .prefix(".fdl-")
                .suffix(".part")
                .tempfile_in(parent)?;
            io::copy(&mut std::fs::File::open(&e.path)?, sibling.as_file_mut())?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                sibling
                    .as_file()
                    .set_permissions(std::fs::Permissions::from_mode(0o644))?;
            }
            sibling.persist(dest).map_err(|e| e.error)?;
            Ok(())
        }
        Err(e) => Err(e.error),
    }
}
