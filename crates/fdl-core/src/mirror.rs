//! The update phases.
//!
//! Each phase is one pass over the configured repositories and ends with a
//! single summary line:
//!
//! ```text
//! UPDATED apk: files(12) errors(1) skipped(40) [98.2 MB] (14.03s)
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use fdl_schema::{GraphicKind, ScreenshotKind};
use futures::stream::{self, StreamExt};

use crate::config::{ConfigStore, RepositorySource, Settings};
use crate::error::MirrorError;
use crate::fetcher::IndexFetcher;
use crate::freshness::FreshnessChecker;
use crate::index::IndexFormat;
use crate::io::client::{HashingHttpClient, human_size};
use crate::io::download::{DownloadJob, DownloadSummary, VerifiedDownloader};
use crate::io::hashing::file_matches;
use crate::metadata::{AppMetadata, MetadataCatalog};
use crate::paths::{AppPaths, Layout, is_file, safe_file_name, write_atomic};
use crate::selector::PackageSelector;
use crate::sidecar::write_sidecar;
use crate::store::IndexStore;

/// Counters of one finished phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSummary {
    /// `index`, `metadata`, `apk` or `src`.
    pub phase: &'static str,
    /// Item counters.
    pub counts: DownloadSummary,
    /// Wall time of the phase.
    pub elapsed: Duration,
}

impl PhaseSummary {
    fn finish(phase: &'static str, counts: DownloadSummary, start: Instant) -> Self {
        let summary = Self {
            phase,
            counts,
            elapsed: start.elapsed(),
        };
        tracing::info!("{summary}");
        summary
    }
}

impl fmt::Display for PhaseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UPDATED {}: files({}) errors({}) skipped({}) [{}] ({:.2?})",
            self.phase,
            self.counts.ok,
            self.counts.failed,
            self.counts.skipped,
            human_size(self.counts.bytes),
            self.elapsed
        )
    }
}

/// Runs the update phases against one directory layout.
#[derive(Debug, Clone)]
pub struct Mirror {
    layout: Layout,
    settings: Settings,
    client: HashingHttpClient,
}

impl Mirror {
    /// Create a mirror with a connection pool sized to `settings.workers`.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Configuration`] if the HTTP client cannot be built.
    pub fn new(layout: Layout, settings: Settings) -> Result<Self, MirrorError> {
        let client = HashingHttpClient::new(settings.workers)
            .map_err(|e| MirrorError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            layout,
            settings,
            client,
        })
    }

    /// Directory layout.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Runtime settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn downloader(&self) -> VerifiedDownloader {
        VerifiedDownloader::new(self.client.clone(), self.layout.staging_dir())
    }

    fn load_store(&self, sources: &[RepositorySource]) -> IndexStore {
        IndexStore::load(&self.layout.cache_dir, sources)
    }

    /// Refresh the cached index of every repository whose index changed.
    pub async fn update_index(&self, config: &mut ConfigStore) -> PhaseSummary {
        let start = Instant::now();
        tracing::info!("UPDATING index files");

        let checker = FreshnessChecker::new(
            self.client.clone(),
            self.settings.head_timeout,
            &self.layout.cache_dir,
        );
        let fetcher = IndexFetcher::new(
            self.client.clone(),
            self.settings.index_timeout,
            &self.layout.cache_dir,
            self.layout.staging_dir(),
        );

        let sources = config.sources_mut();
        let report = checker.check(sources).await;
        let mut counts = DownloadSummary {
            skipped: report.unchanged.len(),
            failed: report.errored.len(),
            ..DownloadSummary::default()
        };
        for format in [IndexFormat::Json, IndexFormat::Xml] {
            let stale = report.stale(format);
            if stale.is_empty() {
                continue;
            }
            let fetched = fetcher.fetch(sources, stale, format, &self.settings).await;
            counts.failed += stale.len() - fetched.len();
            counts.ok += fetched.len();
            counts.bytes += fetched.iter().map(|f| f.bytes).sum::<u64>();
        }
        PhaseSummary::finish("index", counts, start)
    }

    /// Write sidecars and localized texts, and download graphics.
    ///
    /// Manual overrides collected on the way are written back to `config`.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Configuration`] if an override has no id.
    pub async fn update_metadata(&self, config: &mut ConfigStore) -> Result<PhaseSummary, MirrorError> {
        let start = Instant::now();
        tracing::info!("UPDATING metadata");

        let store = self.load_store(config.sources());
        let mut catalog = MetadataCatalog::from_overrides(&config.metadata)?;
        catalog.load_indices(&store);

        let mut counts = DownloadSummary::default();
        let mut downloader = self.downloader();
        let selector = PackageSelector::new(config.sources(), &store, &self.settings);
        for (source, app_id) in selector.all_apps(false) {
            if !source.metadata_download(&self.settings) {
                continue;
            }
            let Some(app) = catalog.get(app_id) else {
                tracing::debug!("{app_id}: no metadata");
                continue;
            };
            let Some(paths) = self.layout.app_paths(app_id) else {
                tracing::warn!("{}: unusable application id {app_id:?}, skipping", source.url());
                counts.failed += 1;
                continue;
            };
            let locales = locale_dirs(app, &paths);
            match write_texts(app, &paths, &locales) {
                Ok(written) => counts.ok += written,
                Err(e) => {
                    tracing::warn!("{app_id}: {e}");
                    counts.failed += 1;
                }
            }
            for job in self.asset_jobs(source, app, &locales) {
                downloader.enqueue(job);
            }
        }
        counts.merge(downloader.drain().await);

        config.metadata.extend(catalog.overrides());
        Ok(PhaseSummary::finish("metadata", counts, start))
    }

    /// Unverified downloads for the graphics and screenshots of `app`.
    fn asset_jobs(
        &self,
        source: &RepositorySource,
        app: &AppMetadata,
        locales: &[(&str, PathBuf)],
    ) -> Vec<DownloadJob> {
        let job = |url: &str, destination: PathBuf| DownloadJob {
            url: url.to_string(),
            destination,
            timeout: self.settings.download_timeout,
            expected: None,
            scope: source.scope(),
        };

        let mut jobs = Vec::new();
        for (locale, dir) in locales {
            let assets = app.localized(locale);
            for kind in GraphicKind::ALL {
                if let Some(url) = assets.graphic(kind) {
                    let name = format!("{}.png", kind.as_str());
                    jobs.push(job(url, dir.join("images").join(name)));
                }
            }
            for kind in ScreenshotKind::ALL {
                for url in assets.screenshots(kind) {
                    match safe_file_name(url) {
                        Some(name) => jobs.push(job(url, dir.join(kind.as_str()).join(name))),
                        None => tracing::warn!("{}: no file name in {url}", app.id()),
                    }
                }
            }
        }
        jobs
    }

    /// Download the retained packages of every selected app.
    ///
    /// A package already on disk with the expected digest is not fetched.
    pub async fn update_apk(&self, config: &ConfigStore) -> PhaseSummary {
        let start = Instant::now();
        tracing::info!("UPDATING apk files");

        let store = self.load_store(config.sources());
        let jobs = PackageSelector::new(config.sources(), &store, &self.settings)
            .select_packages(&self.layout.repo_dir);
        tracing::info!("found ({}) apk files to download", jobs.len());

        let checked: Vec<(DownloadJob, bool)> = stream::iter(jobs)
            .map(|job| async move {
                let satisfied = already_verified(&job).await;
                (job, satisfied)
            })
            .buffer_unordered(self.client.workers())
            .collect()
            .await;

        let mut counts = DownloadSummary::default();
        let mut downloader = self.downloader();
        for (job, satisfied) in checked {
            if satisfied {
                tracing::info!("hash verified {}", job.destination.display());
                counts.skipped += 1;
            } else {
                downloader.enqueue(job);
            }
        }
        counts.merge(downloader.drain().await);
        PhaseSummary::finish("apk", counts, start)
    }

    /// Download the source archives of the retained packages.
    ///
    /// Archives already on disk are not fetched again.
    pub async fn update_src(&self, config: &ConfigStore) -> PhaseSummary {
        let start = Instant::now();
        tracing::info!("UPDATING src files");

        let store = self.load_store(config.sources());
        let jobs = PackageSelector::new(config.sources(), &store, &self.settings)
            .select_sources(&self.layout.repo_dir);

        let mut counts = DownloadSummary::default();
        let mut downloader = self.downloader();
        for job in jobs {
            if is_file(&job.destination) {
                tracing::debug!("exists {}", job.destination.display());
                counts.skipped += 1;
            } else {
                downloader.enqueue(job);
            }
        }
        counts.merge(downloader.drain().await);
        PhaseSummary::finish("src", counts, start)
    }
}

/// Locale tags of `app` paired with their directories; unusable tags are
/// logged and left out.
fn locale_dirs<'a>(app: &'a AppMetadata, paths: &AppPaths) -> Vec<(&'a str, PathBuf)> {
    app.locales()
        .into_iter()
        .filter_map(|locale| match paths.locale_dir(locale) {
            Some(dir) => Some((locale, dir)),
            None => {
                tracing::warn!("{}: unusable locale {locale:?}, skipping", app.id());
                None
            }
        })
        .collect()
}

/// Write the YAML sidecar and the per-locale text files of `app`.
fn write_texts(
    app: &AppMetadata,
    paths: &AppPaths,
    locales: &[(&str, PathBuf)],
) -> Result<usize, MirrorError> {
    write_sidecar(&paths.sidecar, app)?;
    let mut written = 1;
    for (locale, dir) in locales {
        for (name, text) in [
            ("full_description.txt", app.full_description(locale)),
            ("short_description.txt", app.short_description(locale)),
            ("title.txt", app.title(locale)),
        ] {
            if let Some(text) = text {
                write_atomic(&dir.join(name), text.as_bytes())?;
                written += 1;
            }
        }
    }
    Ok(written)
}

/// `true` if the destination of `job` already holds the expected content.
async fn already_verified(job: &DownloadJob) -> bool {
    let Some(expected) = job.expected.clone() else {
        return false;
    };
    if !is_file(&job.destination) {
        return false;
    }
    let path = job.destination.clone();
    tokio::task::spawn_blocking(move || file_matches(&path, &expected.hash, expected.algorithm))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::archive::JSON_MEMBER;
    use crate::io::archive::tests::jar;
    use crate::io::hashing::sha1_hex;
    use fdl_schema::CatalogIndex;
    use mockito::{Server, ServerGuard};
    use serde_json::json;

    const APK: &[u8] = b"apk body";

    struct Fixture {
        _tmp: tempfile::TempDir,
        mirror: Mirror,
        config_path: PathBuf,
    }

    fn fixture(repos: serde_json::Value) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout {
            config_file: tmp.path().join("fdroid-dl.json"),
            repo_dir: tmp.path().join("repo"),
            metadata_dir: tmp.path().join("metadata"),
            cache_dir: tmp.path().join(".cache"),
        };
        layout.prepare().unwrap();
        std::fs::write(
            &layout.config_file,
            serde_json::to_string(&json!({"f-droid": repos, "metadata": {}})).unwrap(),
        )
        .unwrap();
        let settings = Settings {
            head_timeout: Duration::from_secs(5),
            index_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(5),
            ..Settings::default()
        };
        Fixture {
            config_path: layout.config_file.clone(),
            mirror: Mirror::new(layout, settings).unwrap(),
            _tmp: tmp,
        }
    }

    fn index_json(app: &str, version: i64) -> String {
        json!({
            "repo": {"name": "Demo"},
            "apps": [{
                "packageName": app,
                "license": "MIT",
                "localized": {"en-US": {
                    "name": "Demo", "summary": "Short", "icon": "icon.png",
                    "phoneScreenshots": ["s1.png"]
                }}
            }],
            "packages": {app: [{
                "versionCode": version,
                "apkName": format!("{app}_{version}.apk"),
                "hash": sha1_hex("apk body"),
                "hashType": "sha1"
            }]}
        })
        .to_string()
    }

    /// HEAD answering with `etag`, GET answering with `status` and `body`.
    async fn serve_index(
        server: &mut ServerGuard,
        path: &str,
        etag: &str,
        status: usize,
        body: &str,
    ) -> Vec<mockito::Mock> {
        vec![
            server
                .mock("HEAD", format!("{path}index-v1.jar").as_str())
                .with_header("etag", etag)
                .with_header("last-modified", "Tue, 01 Jan 2019 00:00:00 GMT")
                .create_async()
                .await,
            server
                .mock("GET", format!("{path}index-v1.jar").as_str())
                .with_status(status)
                .with_body(jar(&[(JSON_MEMBER, body.as_bytes())]))
                .expect(1)
                .create_async()
                .await,
        ]
    }

    async fn serve_repo(server: &mut ServerGuard, path: &str, app: &str) -> Vec<mockito::Mock> {
        serve_index(server, path, "\"1\"", 200, &index_json(app, 1)).await
    }

    fn cached_versions(fx: &Fixture, config: &ConfigStore, app: &str) -> Vec<i64> {
        let cache = config.sources()[0].cache_path(&fx.mirror.layout().cache_dir);
        let index: CatalogIndex = serde_json::from_slice(&std::fs::read(cache).unwrap()).unwrap();
        index.packages_for(app).iter().map(|p| p.version_code).collect()
    }

    #[tokio::test]
    async fn unchanged_index_is_fetched_once() {
        let mut server = Server::new_async().await;
        let mocks = serve_repo(&mut server, "/repo/", "org.demo").await;
        let fx = fixture(json!({format!("{}/repo/", server.url()): {"apps": ["*"]}}));

        let mut config = ConfigStore::open(&fx.config_path).unwrap();
        let first = fx.mirror.update_index(&mut config).await;
        assert_eq!((first.counts.ok, first.counts.skipped), (1, 0));
        let second = fx.mirror.update_index(&mut config).await;
        assert_eq!((second.counts.ok, second.counts.skipped), (0, 1));
        config.close().unwrap();

        mocks[1].assert_async().await;
    }

    #[tokio::test]
    async fn failed_fetch_is_retried_on_the_next_run() {
        let mut server = Server::new_async().await;
        let fx = fixture(json!({format!("{}/repo/", server.url()): {"apps": ["*"]}}));
        let mut config = ConfigStore::open(&fx.config_path).unwrap();

        let first = serve_repo(&mut server, "/repo/", "org.demo").await;
        assert_eq!(fx.mirror.update_index(&mut config).await.counts.ok, 1);
        for mock in &first {
            mock.remove_async().await;
        }

        let changed = index_json("org.demo", 2);
        let down = serve_index(&mut server, "/repo/", "\"2\"", 503, &changed).await;
        assert_eq!(fx.mirror.update_index(&mut config).await.counts.failed, 1);
        assert!(config.sources()[0].is_errored());
        assert_eq!(cached_versions(&fx, &config, "org.demo"), vec![1]);
        for mock in &down {
            mock.remove_async().await;
        }

        let up = serve_index(&mut server, "/repo/", "\"2\"", 200, &changed).await;
        let third = fx.mirror.update_index(&mut config).await;
        assert_eq!((third.counts.ok, third.counts.skipped), (1, 0));
        assert!(!config.sources()[0].is_errored());
        assert_eq!(cached_versions(&fx, &config, "org.demo"), vec![2]);
        up[1].assert_async().await;
        config.close().unwrap();
    }

    #[tokio::test]
    async fn unreachable_repository_does_not_block_others() {
        let mut server = Server::new_async().await;
        let _mocks = serve_repo(&mut server, "/good/", "org.demo").await;
        let _down = server
            .mock("HEAD", "/down/index-v1.jar")
            .with_status(500)
            .create_async()
            .await;
        let apk = server
            .mock("GET", "/good/org.demo_1.apk")
            .with_body(APK)
            .expect(1)
            .create_async()
            .await;
        let fx = fixture(json!({
            format!("{}/down/", server.url()): {"apps": ["*"]},
            format!("{}/good/", server.url()): {"apps": ["org.demo"]},
        }));

        let mut config = ConfigStore::open(&fx.config_path).unwrap();
        let index = fx.mirror.update_index(&mut config).await;
        assert_eq!((index.counts.ok, index.counts.failed), (1, 1));

        let summary = fx.mirror.update_apk(&config).await;
        assert_eq!((summary.counts.ok, summary.counts.failed), (1, 0));
        assert_eq!(summary.counts.bytes, APK.len() as u64);
        assert_eq!(
            std::fs::read(fx.mirror.layout().repo_dir.join("org.demo_1.apk")).unwrap(),
            APK
        );
        apk.assert_async().await;

        let errored: Vec<_> = config.sources().iter().filter(|s| s.is_errored()).collect();
        assert_eq!(errored.len(), 1);
        assert!(errored[0].url().ends_with("/down/"));
    }

    #[tokio::test]
    async fn verified_package_is_not_downloaded_again() {
        let mut server = Server::new_async().await;
        let _mocks = serve_repo(&mut server, "/repo/", "org.demo").await;
        let apk = server
            .mock("GET", "/repo/org.demo_1.apk")
            .expect(0)
            .create_async()
            .await;
        let fx = fixture(json!({format!("{}/repo/", server.url()): {"apps": ["org.demo"]}}));
        std::fs::write(fx.mirror.layout().repo_dir.join("org.demo_1.apk"), APK).unwrap();

        let mut config = ConfigStore::open(&fx.config_path).unwrap();
        fx.mirror.update_index(&mut config).await;
        let summary = fx.mirror.update_apk(&config).await;
        assert_eq!(summary.counts.skipped, 1);
        assert_eq!(summary.counts.ok, 0);
        apk.assert_async().await;
    }

    #[tokio::test]
    async fn metadata_phase_writes_sidecar_texts_and_assets() {
        let mut server = Server::new_async().await;
        let _mocks = serve_repo(&mut server, "/repo/", "org.demo").await;
        let _icon = server
            .mock("GET", "/repo/org.demo/en-US/icon.png")
            .with_body("icon")
            .create_async()
            .await;
        let _shot = server
            .mock("GET", "/repo/org.demo/en-US/phoneScreenshots/s1.png")
            .with_body("shot")
            .create_async()
            .await;
        let fx = fixture(json!({format!("{}/repo/", server.url()): {"apps": ["all"]}}));

        let mut config = ConfigStore::open(&fx.config_path).unwrap();
        fx.mirror.update_index(&mut config).await;
        let summary = fx.mirror.update_metadata(&mut config).await.unwrap();
        assert_eq!(summary.counts.failed, 0);

        let meta = &fx.mirror.layout().metadata_dir;
        let sidecar = std::fs::read_to_string(meta.join("org.demo.yml")).unwrap();
        assert!(sidecar.contains("License: MIT"));
        assert_eq!(
            std::fs::read_to_string(meta.join("org.demo/en-US/title.txt")).unwrap(),
            "Demo"
        );
        assert_eq!(
            std::fs::read_to_string(meta.join("org.demo/en-US/short_description.txt")).unwrap(),
            "Short"
        );
        assert_eq!(
            std::fs::read(meta.join("org.demo/en-US/images/icon.png")).unwrap(),
            b"icon"
        );
        assert_eq!(
            std::fs::read(meta.join("org.demo/en-US/phoneScreenshots/s1.png")).unwrap(),
            b"shot"
        );
    }

    #[tokio::test]
    async fn metadata_names_from_the_index_stay_inside_the_mirror() {
        let mut server = Server::new_async().await;
        let hostile = json!({
            "repo": {"name": "Hostile"},
            "apps": [
                {"packageName": "../../escaped", "license": "MIT"},
                {"packageName": "org.demo", "license": "MIT", "localized": {
                    "en-US": {"name": "Demo"},
                    "../../../loc": {"name": "Out"}
                }}
            ],
            "packages": {}
        })
        .to_string();
        let _mocks = serve_index(&mut server, "/repo/", "\"1\"", 200, &hostile).await;
        let fx = fixture(json!({format!("{}/repo/", server.url()): {"apps": ["*"]}}));

        let mut config = ConfigStore::open(&fx.config_path).unwrap();
        fx.mirror.update_index(&mut config).await;
        let summary = fx.mirror.update_metadata(&mut config).await.unwrap();
        assert_eq!(summary.counts.failed, 1);

        let meta = &fx.mirror.layout().metadata_dir;
        let root = meta.parent().unwrap();
        assert!(!root.join("escaped.yml").exists());
        assert!(!root.parent().unwrap().join("escaped.yml").exists());
        assert!(!root.join("loc").exists());
        assert!(meta.join("org.demo.yml").is_file());
        assert_eq!(
            std::fs::read_to_string(meta.join("org.demo/en-US/title.txt")).unwrap(),
            "Demo"
        );
    }

    #[test]
    fn summary_line() {
        let summary = PhaseSummary {
            phase: "apk",
            counts: DownloadSummary {
                ok: 2,
                failed: 1,
                skipped: 3,
                bytes: 1536,
            },
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(
            summary.to_string(),
            "UPDATED apk: files(2) errors(1) skipped(3) [1.5 KB] (1.50s)"
        );
    }
}
