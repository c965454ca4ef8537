//! Persisted configuration and runtime settings.
//!
//! The configuration document is JSON:
//!
//! ```json
//! {
//!   "f-droid": {
//!     "https://f-droid.org/repo/": { "apps": ["org.fdroid.fdroid"] }
//!   },
//!   "metadata": {}
//! }
//! ```
//!
//! [`ConfigStore`] loads it on open and writes it back on close. Fields the
//! pipeline does not know about are carried through unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::MirrorError;
use crate::index::IndexFormat;
use crate::io::client::ScopeOptions;
use crate::io::hashing::sha1_hex;
use crate::paths::write_atomic;

/// Repository configured when no configuration file exists yet.
pub const DEFAULT_REPOSITORY: &str = "https://f-droid.org/repo/";
/// Application selected in [`DEFAULT_REPOSITORY`] by default.
pub const DEFAULT_APP: &str = "org.fdroid.fdroid";
/// Locale used for legacy XML texts unless overridden.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Runtime knobs shared by every phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Concurrent requests per batch.
    pub workers: usize,
    /// Ceiling for freshness probes.
    pub head_timeout: Duration,
    /// Ceiling for index archive downloads.
    pub index_timeout: Duration,
    /// Ceiling for package and asset downloads.
    pub download_timeout: Duration,
    /// Newest versions to keep per application.
    pub apk_versions: i64,
    /// Download source archives unless a repository says otherwise.
    pub src_download: bool,
    /// Download metadata unless a repository says otherwise.
    pub metadata_download: bool,
    /// Locale for legacy XML texts unless a repository says otherwise.
    pub default_locale: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 10,
            head_timeout: Duration::from_secs(10),
            index_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(600),
            apk_versions: 1,
            src_download: false,
            metadata_download: true,
            default_locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

/// Persistent error marker of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// HTTP status, or 600 when no response was received.
    pub code: u16,
    /// Human-readable reason.
    pub msg: String,
}

/// Per-repository settings as stored under `f-droid.<url>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Selection rules: application ids, `*`/`.*`/`all`, or `regex:<pattern>`.
    #[serde(default, deserialize_with = "one_or_many")]
    pub apps: Vec<String>,

    /// Basic-auth `[user, password]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Vec<String>>,

    /// Verify TLS certificates (default `true`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_verify: Option<bool>,

    /// Retention count override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<i64>,

    /// Source archive download override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_download: Option<bool>,

    /// Metadata download override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_download: Option<bool>,

    /// Locale override for legacy XML texts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_locale: Option<String>,

    /// Last seen freshness fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Set while the repository is unreachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,

    /// Format of the last successfully fetched index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Keys we do not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null(()),
    }
    Ok(match OneOrMany::deserialize(d)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Null(()) => Vec::new(),
    })
}

/// Canonical base URL of a repository.
///
/// Query and fragment are dropped, a trailing index file name is removed and
/// a trailing `/` is enforced.
pub fn canonical_url(url: &str) -> String {
    let mut base = match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    };
    for suffix in ["index.xml", "index.jar", "index-v1.jar", "index-v1.json"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped.to_string();
        }
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base
}

/// One configured remote catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositorySource {
    url: String,
    id: String,
    /// Persisted settings, mutated in place by the pipeline.
    pub settings: RepositorySettings,
}

impl RepositorySource {
    /// Create a source, canonicalizing `url` and deriving its id.
    pub fn new(url: &str, mut settings: RepositorySettings) -> Self {
        let url = canonical_url(url);
        // derived, never trusted from disk
        settings.extra.remove("id");
        Self {
            id: sha1_hex(&url),
            url,
            settings,
        }
    }

    /// Canonical base URL, always ending in `/`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// SHA-1 of the canonical URL.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Base URL as a parsed [`Url`].
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Configuration`] if the URL is not absolute.
    pub fn base_url(&self) -> Result<Url, MirrorError> {
        Url::parse(&self.url)
            .map_err(|e| MirrorError::Configuration(format!("invalid repository url {}: {e}", self.url)))
    }

    /// URL of the index archive for `format`.
    pub fn index_url(&self, format: IndexFormat) -> String {
        format!("{}{}", self.url, format.archive_name())
    }

    /// Location of the normalized index cache: `<cache_dir>/<id>.cache`.
    pub fn cache_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(format!("{}.cache", self.id))
    }

    /// Selection rules.
    pub fn apps(&self) -> &[String] {
        &self.settings.apps
    }

    /// Credentials, honoured only when exactly user and password are given.
    pub fn auth(&self) -> Option<(&str, &str)> {
        match self.settings.auth.as_deref() {
            Some([user, pass]) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Whether TLS certificates are verified.
    pub fn ssl_verify(&self) -> bool {
        self.settings.ssl_verify.unwrap_or(true)
    }

    /// Owned request scope for this repository.
    pub fn scope(&self) -> ScopeOptions {
        ScopeOptions {
            auth: self
                .auth()
                .map(|(u, p)| (u.to_string(), p.to_string())),
            insecure: !self.ssl_verify(),
        }
    }

    /// Stored freshness fingerprint.
    pub fn fingerprint(&self) -> Option<&str> {
        self.settings.hash.as_deref()
    }

    /// Replace the stored fingerprint.
    pub fn set_fingerprint(&mut self, fingerprint: Option<String>) {
        self.settings.hash = fingerprint;
    }

    /// The error record, if the repository is currently unreachable.
    pub fn error(&self) -> Option<&ErrorRecord> {
        self.settings.error.as_ref()
    }

    /// `true` while an error record is attached.
    pub fn is_errored(&self) -> bool {
        self.settings.error.is_some()
    }

    /// Attach an error record; the repository is skipped until cleared.
    pub fn set_error(&mut self, code: u16, msg: impl Into<String>) {
        self.settings.error = Some(ErrorRecord {
            code,
            msg: msg.into(),
        });
    }

    /// Remove the error record.
    pub fn clear_error(&mut self) {
        self.settings.error = None;
    }

    /// Retention count: per-repository override or global; values below 1 become 1.
    pub fn retention(&self, settings: &Settings) -> usize {
        let versions = self.settings.versions.unwrap_or(settings.apk_versions);
        usize::try_from(versions.max(1)).unwrap_or(1)
    }

    /// Whether source archives are downloaded.
    pub fn src_download(&self, settings: &Settings) -> bool {
        self.settings.src_download.unwrap_or(settings.src_download)
    }

    /// Whether metadata is downloaded.
    pub fn metadata_download(&self, settings: &Settings) -> bool {
        self.settings
            .metadata_download
            .unwrap_or(settings.metadata_download)
    }

    /// Locale for legacy XML texts.
    pub fn default_locale<'a>(&'a self, settings: &'a Settings) -> &'a str {
        self.settings
            .default_locale
            .as_deref()
            .unwrap_or(&settings.default_locale)
    }
}

/// On-disk form of the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Repositories keyed by URL.
    #[serde(rename = "f-droid", default)]
    pub sources: BTreeMap<String, RepositorySettings>,

    /// Manual metadata overrides keyed by application id.
    #[serde(default)]
    pub metadata: BTreeMap<String, Map<String, Value>>,

    /// Keys we do not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MirrorConfig {
    /// The configuration used when no file exists.
    pub fn with_defaults() -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(
            DEFAULT_REPOSITORY.to_string(),
            RepositorySettings {
                apps: vec![DEFAULT_APP.to_string()],
                ..RepositorySettings::default()
            },
        );
        Self {
            sources,
            ..Self::default()
        }
    }
}

/// Loaded configuration with a guaranteed write-back.
///
/// Call [`ConfigStore::close`] to save and observe errors. A store that is
/// dropped without being closed still saves, logging any failure.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    sources: Vec<RepositorySource>,
    /// Manual metadata overrides keyed by application id.
    pub metadata: BTreeMap<String, Map<String, Value>>,
    extra: Map<String, Value>,
    closed: bool,
}

impl ConfigStore {
    /// Load the configuration at `path`, or the defaults if it does not exist.
    ///
    /// Repository keys are canonicalized; entries that collapse to the same
    /// URL are merged, later keys winning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MirrorError> {
        let path = path.into();
        let config = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            tracing::info!(
                "{} not found, starting from defaults",
                path.display()
            );
            MirrorConfig::with_defaults()
        };
        Ok(Self::from_config(path, config))
    }

    fn from_config(path: PathBuf, config: MirrorConfig) -> Self {
        let mut sources: Vec<RepositorySource> = Vec::new();
        for (url, settings) in config.sources {
            let source = RepositorySource::new(&url, settings);
            match sources.iter_mut().find(|s| s.id == source.id) {
                Some(existing) => *existing = source,
                None => sources.push(source),
            }
        }
        Self {
            path,
            sources,
            metadata: config.metadata,
            extra: config.extra,
            closed: false,
        }
    }

    /// Path the configuration is saved to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured repositories.
    pub fn sources(&self) -> &[RepositorySource] {
        &self.sources
    }

    /// Configured repositories, mutable.
    pub fn sources_mut(&mut self) -> &mut Vec<RepositorySource> {
        &mut self.sources
    }

    /// Snapshot of the document as it would be saved.
    pub fn to_config(&self) -> MirrorConfig {
        MirrorConfig {
            sources: self
                .sources
                .iter()
                .map(|s| (s.url.clone(), s.settings.clone()))
                .collect(),
            metadata: self.metadata.clone(),
            extra: self.extra.clone(),
        }
    }

    /// Write the configuration atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self) -> Result<(), MirrorError> {
        let text = serde_json::to_string_pretty(&self.to_config())?;
        write_atomic(&self.path, text.as_bytes())?;
        tracing::debug!("saved {}", self.path.display());
        Ok(())
    }

    /// Save and release the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the save fails.
    pub fn close(mut self) -> Result<(), MirrorError> {
        self.closed = true;
        self.save()
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.save() {
                tracing::error!("failed to save {}: {e}", self.path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_repository_urls() {
        assert_eq!(
            canonical_url("https://f-droid.org/repo/index-v1.jar?x=1"),
            "https://f-droid.org/repo/"
        );
        assert_eq!(canonical_url("https://f-droid.org/repo"), "https://f-droid.org/repo/");
        assert_eq!(
            canonical_url("https://example.org/fdroid/repo/index.xml"),
            "https://example.org/fdroid/repo/"
        );
        assert_eq!(canonical_url("https://example.org"), "https://example.org/");
    }

    #[test]
    fn id_is_sha1_of_canonical_url() {
        let a = RepositorySource::new("https://f-droid.org/repo", RepositorySettings::default());
        let b = RepositorySource::new(
            "https://f-droid.org/repo/index.jar",
            RepositorySettings::default(),
        );
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), sha1_hex("https://f-droid.org/repo/"));
        assert_eq!(a.index_url(IndexFormat::Json), "https://f-droid.org/repo/index-v1.jar");
        assert_eq!(a.index_url(IndexFormat::Xml), "https://f-droid.org/repo/index.jar");
        assert_eq!(
            a.cache_path(Path::new(".cache")),
            PathBuf::from(format!(".cache/{}.cache", a.id()))
        );
    }

    #[test]
    fn settings_fall_back_to_globals() {
        let raw = r#"{"apps": "org.demo", "auth": ["user"], "versions": 0, "ssl_verify": false}"#;
        let settings: RepositorySettings = serde_json::from_str(raw).unwrap();
        let source = RepositorySource::new("https://demo.example/repo/", settings);
        let globals = Settings::default();

        assert_eq!(source.apps(), ["org.demo".to_string()]);
        assert_eq!(source.auth(), None);
        assert_eq!(source.retention(&globals), 1);
        assert!(!source.ssl_verify());
        assert!(source.scope().insecure);
        assert!(source.metadata_download(&globals));
        assert!(!source.src_download(&globals));
        assert_eq!(source.default_locale(&globals), "en-US");

        let with_auth: RepositorySettings =
            serde_json::from_str(r#"{"auth": ["user", "pass"], "versions": 3}"#).unwrap();
        let source = RepositorySource::new("https://demo.example/repo/", with_auth);
        assert_eq!(source.auth(), Some(("user", "pass")));
        assert_eq!(source.retention(&globals), 3);
    }

    #[test]
    fn missing_file_yields_defaults_and_close_saves() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fdroid-dl.json");

        let store = ConfigStore::open(&path).unwrap();
        assert_eq!(store.sources().len(), 1);
        assert_eq!(store.sources()[0].url(), DEFAULT_REPOSITORY);
        assert_eq!(store.sources()[0].apps(), [DEFAULT_APP.to_string()]);
        store.close().unwrap();

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            saved["f-droid"][DEFAULT_REPOSITORY]["apps"],
            serde_json::json!([DEFAULT_APP])
        );
        assert!(saved["metadata"].is_object());
    }

    #[test]
    fn unknown_keys_and_errors_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fdroid-dl.json");
        std::fs::write(
            &path,
            r#"{
                "f-droid": {
                    "https://demo.example/repo": {"apps": ["*"], "id": "stale", "comment": "keep me"},
                    "https://demo.example/repo/index.jar": {"apps": ["all"], "hash": "h1"}
                },
                "metadata": {"org.demo": {"license": "MIT"}},
                "version": 2
            }"#,
        )
        .unwrap();

        {
            let mut store = ConfigStore::open(&path).unwrap();
            assert_eq!(store.sources().len(), 1);
            let source = &mut store.sources_mut()[0];
            assert_eq!(source.apps(), ["all".to_string()]);
            assert_eq!(source.fingerprint(), Some("h1"));
            source.set_error(600, "connection refused");
            // dropped without close: still saved
        }

        let store = ConfigStore::open(&path).unwrap();
        let source = &store.sources()[0];
        assert!(source.is_errored());
        assert_eq!(source.error().map(|e| e.code), Some(600));
        assert_eq!(store.metadata["org.demo"]["license"], "MIT");
        assert_eq!(store.to_config().extra["version"], 2);
        assert!(!source.settings.extra.contains_key("id"));
        store.close().unwrap();
    }
}
