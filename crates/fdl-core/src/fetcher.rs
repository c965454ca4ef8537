//! Index archive retrieval.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fdl_schema::{CatalogIndex, IndexError};
use futures::stream::{self, StreamExt};
use reqwest::Url;

use crate::config::{RepositorySource, Settings};
use crate::error::{MirrorError, NO_STATUS_CODE, status_of};
use crate::index::{IndexFormat, normalize_paths, parse_document};
use crate::io::archive::extract_member_from_file;
use crate::io::client::{HashingHttpClient, ScopeOptions, human_size, stream_body};
use crate::io::download::DownloadError;
use crate::paths::write_atomic;

/// Everything needed to fetch one index, detached from the source.
struct FetchJob {
    idx: usize,
    url: String,
    base: Url,
    source_id: String,
    locale: String,
    scope: ScopeOptions,
    cache: PathBuf,
}

/// A freshly fetched and cached index.
#[derive(Debug, Clone)]
pub struct FetchedIndex {
    /// The normalized index.
    pub index: CatalogIndex,
    /// Size of the archive that was downloaded.
    pub bytes: u64,
}

/// Downloads, decodes and caches repository indexes.
#[derive(Debug, Clone)]
pub struct IndexFetcher {
    client: HashingHttpClient,
    timeout: Duration,
    cache_dir: PathBuf,
    staging: PathBuf,
}

impl IndexFetcher {
    /// Create a fetcher writing caches to `cache_dir` and staging archives in `staging`.
    pub fn new(
        client: HashingHttpClient,
        timeout: Duration,
        cache_dir: impl Into<PathBuf>,
        staging: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            timeout,
            cache_dir: cache_dir.into(),
            staging: staging.into(),
        }
    }

    /// Fetch the `format` index of every source in `selected`.
    ///
    /// Returns the indexes that were fetched and cached. A network failure
    /// attaches an error record to the source. Every failure forgets the
    /// fingerprint recorded by the freshness check, so the next run fetches
    /// again instead of trusting the old cache file.
    pub async fn fetch(
        &self,
        sources: &mut [RepositorySource],
        selected: &[usize],
        format: IndexFormat,
        settings: &Settings,
    ) -> Vec<FetchedIndex> {
        let mut jobs = Vec::with_capacity(selected.len());
        for &idx in selected {
            let source = &mut sources[idx];
            match source.base_url() {
                Ok(base) => jobs.push(FetchJob {
                    idx,
                    url: source.index_url(format),
                    base,
                    source_id: source.id().to_string(),
                    locale: source.default_locale(settings).to_string(),
                    scope: source.scope(),
                    cache: source.cache_path(&self.cache_dir),
                }),
                Err(e) => {
                    tracing::error!("{e}");
                    source.set_error(NO_STATUS_CODE, e.to_string());
                }
            }
        }

        let results: Vec<_> = stream::iter(jobs)
            .map(|job| async move {
                let start = Instant::now();
                let result = self.fetch_one(&job, format).await;
                (job.idx, job.url, result, start.elapsed())
            })
            .buffer_unordered(self.client.workers())
            .collect()
            .await;

        let mut fetched = Vec::new();
        for (idx, url, result, elapsed) in results {
            let source = &mut sources[idx];
            match result {
                Ok((index, bytes)) => {
                    tracing::info!(
                        "UPDATED {} - {url} [{elapsed:.2?}] ({})",
                        index.repo_name().unwrap_or(source.url()),
                        human_size(bytes)
                    );
                    source.settings.format = Some(format.to_string());
                    fetched.push(FetchedIndex { index, bytes });
                }
                Err(MirrorError::RepositoryUnreachable { code, message, .. }) => {
                    tracing::error!("{url} ({code}): {message}");
                    source.set_error(code, message);
                    // the new fingerprint was never backed by a cache write
                    source.set_fingerprint(None);
                }
                Err(e) => {
                    tracing::error!("{e}");
                    source.set_fingerprint(None);
                }
            }
        }
        fetched
    }

    async fn fetch_one(
        &self,
        job: &FetchJob,
        format: IndexFormat,
    ) -> Result<(CatalogIndex, u64), MirrorError> {
        let unreachable_at = |code: u16, message: String| MirrorError::RepositoryUnreachable {
            url: job.url.clone(),
            code,
            message,
        };

        let resp = self
            .client
            .get(&job.url, job.scope.scope(), self.timeout)
            .await
            .map_err(|e| {
                let (code, message) = status_of(&e);
                unreachable_at(code, message)
            })?;

        tokio::fs::create_dir_all(&self.staging).await?;
        let (file, archive) = tempfile::Builder::new()
            .prefix(".fdl-")
            .suffix(".jar")
            .tempfile_in(&self.staging)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let bytes = match stream_body(resp, &mut file).await {
            Ok(n) => n,
            Err(DownloadError::Http(e)) => {
                let (code, message) = status_of(&e);
                return Err(unreachable_at(code, message));
            }
            Err(e) => return Err(MirrorError::DownloadFailed {
                url: job.url.clone(),
                source: e,
            }),
        };
        drop(file);

        let malformed = |source: IndexError| MirrorError::IndexMalformed {
            url: job.url.clone(),
            source,
        };
        let (member, data) = extract_member_from_file(archive.to_path_buf(), format.members())
            .await
            .map_err(malformed)?;
        tracing::debug!("{}: extracted {member} ({})", job.url, human_size(data.len() as u64));

        let mut index = parse_document(&data, &job.locale).map_err(malformed)?;
        index.source_id.clone_from(&job.source_id);
        normalize_paths(&mut index, &job.base);
        write_cache(&job.cache, &index).await?;
        Ok((index, bytes))
    }
}

/// Serialize `index` to `path` atomically, off the async runtime.
async fn write_cache(path: &Path, index: &CatalogIndex) -> Result<(), MirrorError> {
    let json = serde_json::to_vec(index)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &json))
        .await
        .map_err(|e| MirrorError::Io(std::io::Error::other(e)))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositorySettings;
    use crate::index::json::tests::SAMPLE as JSON_SAMPLE;
    use crate::index::xml::tests::SAMPLE as XML_SAMPLE;
    use crate::io::archive::tests::jar;
    use crate::io::archive::{JSON_MEMBER, XML_MEMBER};
    use mockito::Server;

    fn fetcher(root: &Path) -> IndexFetcher {
        IndexFetcher::new(
            HashingHttpClient::new(4).unwrap(),
            Duration::from_secs(5),
            root.join(".cache"),
            root.join(".cache/tmp"),
        )
    }

    #[tokio::test]
    async fn fetches_parses_and_caches() {
        let mut server = Server::new_async().await;
        let archive = jar(&[(JSON_MEMBER, JSON_SAMPLE.as_bytes())]);
        let _json = server
            .mock("GET", "/a/index-v1.jar")
            .with_body(&archive)
            .create_async()
            .await;
        let _xml = server
            .mock("GET", "/b/index.jar")
            .with_body(jar(&[(XML_MEMBER, XML_SAMPLE.as_bytes())]))
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let fetcher = fetcher(tmp.path());
        let settings = Settings::default();
        let mut sources = vec![
            RepositorySource::new(&format!("{}/a/", server.url()), RepositorySettings::default()),
            RepositorySource::new(&format!("{}/b/", server.url()), RepositorySettings::default()),
        ];

        let json = fetcher
            .fetch(&mut sources, &[0], IndexFormat::Json, &settings)
            .await;
        let xml = fetcher
            .fetch(&mut sources, &[1], IndexFormat::Xml, &settings)
            .await;
        assert_eq!(json.len(), 1);
        assert_eq!(xml.len(), 1);
        assert_eq!(json[0].bytes, archive.len() as u64);
        let json = &json[0].index;
        assert_eq!(json.source_id, sources[0].id());
        assert!(json.normalized);
        assert_eq!(
            json.packages_for("org.demo.one")[0].apk_name.as_deref(),
            Some(format!("{}/a/org.demo.one_3.apk", server.url()).as_str())
        );
        assert_eq!(sources[1].settings.format.as_deref(), Some("xml"));

        let cache = sources[0].cache_path(&tmp.path().join(".cache"));
        let cached: CatalogIndex =
            serde_json::from_slice(&std::fs::read(cache).unwrap()).unwrap();
        assert_eq!(&cached, json);
    }

    #[tokio::test]
    async fn failures_are_classified() {
        let mut server = Server::new_async().await;
        let _down = server
            .mock("GET", "/down/index-v1.jar")
            .with_status(503)
            .create_async()
            .await;
        let _bad = server
            .mock("GET", "/bad/index-v1.jar")
            .with_body(jar(&[(JSON_MEMBER, b"{\"apps\": 5}")]))
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let mut sources = vec![
            RepositorySource::new(&format!("{}/down/", server.url()), RepositorySettings::default()),
            RepositorySource::new(&format!("{}/bad/", server.url()), RepositorySettings::default()),
        ];
        sources[0].set_fingerprint(Some("fp-down".into()));
        sources[1].set_fingerprint(Some("fp".into()));

        let fetched = fetcher(tmp.path())
            .fetch(&mut sources, &[0, 1], IndexFormat::Json, &Settings::default())
            .await;
        assert!(fetched.is_empty());
        assert_eq!(sources[0].error().map(|e| e.code), Some(503));
        assert_eq!(sources[0].fingerprint(), None);
        assert!(!sources[1].is_errored());
        assert_eq!(sources[1].fingerprint(), None);
        assert!(!sources[1].cache_path(&tmp.path().join(".cache")).exists());
    }
}
