//! Normalized catalog index.
//!
//! Both wire formats a repository may publish (the `index-v1.json` document
//! and the legacy `index.xml` document) are decoded into [`CatalogIndex`].
//! Field names follow the JSON format so a cached index round-trips through
//! `serde_json` without translation. Keys we do not model are kept in the
//! `extra` side-table of each record and written back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::lenient;

/// Errors produced while decoding an index document.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The JSON document (or a cached index) could not be decoded.
    #[error("invalid JSON index: {0}")]
    Json(#[from] serde_json::Error),

    /// The XML document could not be decoded.
    #[error("invalid XML index: {0}")]
    Xml(String),

    /// The index archive could not be read.
    #[error("invalid index archive: {0}")]
    Archive(String),

    /// None of the expected members were found in the index archive.
    #[error("index archive has no member named {0}")]
    MissingMember(String),

    /// A date field did not match `YYYY-MM-DD`.
    #[error("invalid date '{value}' in field {field}")]
    InvalidDate {
        /// Name of the offending field.
        field: &'static str,
        /// The raw text that failed to parse.
        value: String,
    },

    /// The document was empty.
    #[error("empty index document")]
    Empty,
}

/// One repository's catalog, normalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogIndex {
    /// Identifier of the repository this index belongs to.
    #[serde(rename = "_source", default, skip_serializing_if = "String::is_empty")]
    pub source_id: String,

    /// Set once every relative asset path has been rewritten to an absolute URL.
    #[serde(rename = "_normalized", default, skip_serializing_if = "std::ops::Not::not")]
    pub normalized: bool,

    /// Repository self-description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepoMeta>,

    /// Install/uninstall requests published by the repository.
    #[serde(default)]
    pub requests: Requests,

    /// Application records.
    #[serde(default)]
    pub apps: Vec<AppRecord>,

    /// Package records keyed by application id, each list in document order.
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<PackageRecord>>,

    /// Top-level keys we do not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogIndex {
    /// Create an empty index owned by `source_id`.
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Self::default()
        }
    }

    /// Iterate over every application id in document order.
    pub fn app_ids(&self) -> impl Iterator<Item = &str> {
        self.apps.iter().map(|a| a.package_name.as_str())
    }

    /// Find an application record by id.
    pub fn app(&self, id: &str) -> Option<&AppRecord> {
        self.apps.iter().find(|a| a.package_name == id)
    }

    /// Package records for an application, empty if the id is unknown.
    pub fn packages_for(&self, id: &str) -> &[PackageRecord] {
        self.packages.get(id).map_or(&[], Vec::as_slice)
    }

    /// Declared repository name, if any.
    pub fn repo_name(&self) -> Option<&str> {
        self.repo.as_ref().and_then(|r| r.name.as_deref())
    }

    /// Total number of package records across all applications.
    pub fn package_count(&self) -> usize {
        self.packages.values().map(Vec::len).sum()
    }
}

/// The `repo` block of an index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMeta {
    /// Declared repository name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Publication timestamp.
    #[serde(default, deserialize_with = "lenient::opt_int", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Index format version.
    #[serde(default, deserialize_with = "lenient::opt_int", skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,

    /// Maximum age in days before clients should consider the index stale.
    #[serde(default, deserialize_with = "lenient::opt_int", skip_serializing_if = "Option::is_none")]
    pub maxage: Option<i64>,

    /// Repository icon file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Canonical address the repository advertises for itself.
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Mirror base URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<String>,

    /// Keys we do not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Install/uninstall requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requests {
    /// Application ids the repository asks clients to install.
    #[serde(default)]
    pub install: Vec<String>,
    /// Application ids the repository asks clients to remove.
    #[serde(default)]
    pub uninstall: Vec<String>,
}

/// Descriptive record for one application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    /// Application id.
    #[serde(default)]
    pub package_name: String,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// One-line summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Long description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Icon file name (URL once normalized).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Category names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    /// Anti-feature tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anti_features: Vec<String>,

    /// Author name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    /// Author e-mail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,

    /// Author web site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_web_site: Option<String>,

    /// Project web site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_site: Option<String>,

    /// Source repository URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,

    /// Issue tracker URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_tracker: Option<String>,

    /// Changelog URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,

    /// License identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Donation URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donate: Option<String>,

    /// Bitcoin address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitcoin: Option<String>,

    /// Litecoin address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub litecoin: Option<String>,

    /// Flattr id.
    #[serde(rename = "flattrID", alias = "flattr", default, skip_serializing_if = "Option::is_none")]
    pub flattr_id: Option<String>,

    /// Liberapay id.
    #[serde(rename = "liberapayID", alias = "liberapay", default, skip_serializing_if = "Option::is_none")]
    pub liberapay_id: Option<String>,

    /// Version name the repository recommends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_version_name: Option<String>,

    /// Version code the repository recommends.
    #[serde(default, deserialize_with = "lenient::opt_int", skip_serializing_if = "Option::is_none")]
    pub suggested_version_code: Option<i64>,

    /// When the application was first added.
    #[serde(default, deserialize_with = "lenient::opt_int", skip_serializing_if = "Option::is_none")]
    pub added: Option<i64>,

    /// When the application was last updated.
    #[serde(default, deserialize_with = "lenient::opt_int", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,

    /// Per-locale texts and graphics, keyed by locale tag.
    #[serde(default)]
    pub localized: BTreeMap<String, LocalizedAssets>,

    /// Keys we do not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Single-file graphics a locale may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicKind {
    /// Launcher icon.
    Icon,
    /// Store feature graphic.
    FeatureGraphic,
    /// Store promo graphic.
    PromoGraphic,
    /// TV banner.
    TvBanner,
}

impl GraphicKind {
    /// All graphic kinds in a stable order.
    pub const ALL: [Self; 4] = [
        Self::Icon,
        Self::FeatureGraphic,
        Self::PromoGraphic,
        Self::TvBanner,
    ];

    /// Key of this graphic in a localized record.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Icon => "icon",
            Self::FeatureGraphic => "featureGraphic",
            Self::PromoGraphic => "promoGraphic",
            Self::TvBanner => "tvBanner",
        }
    }
}

/// Screenshot categories a locale may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenshotKind {
    /// Phone screenshots.
    Phone,
    /// 7" tablet screenshots.
    SevenInch,
    /// 10" tablet screenshots.
    TenInch,
    /// TV screenshots.
    Tv,
    /// Wearable screenshots.
    Wear,
}

impl ScreenshotKind {
    /// All screenshot kinds in a stable order.
    pub const ALL: [Self; 5] = [
        Self::Phone,
        Self::SevenInch,
        Self::TenInch,
        Self::Tv,
        Self::Wear,
    ];

    /// Key of this list in a localized record, also used as directory name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phoneScreenshots",
            Self::SevenInch => "sevenInchScreenshots",
            Self::TenInch => "tenInchScreenshots",
            Self::Tv => "tvScreenshots",
            Self::Wear => "wearScreenshots",
        }
    }
}

/// Localized texts and graphics of one application for one locale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedAssets {
    /// Localized title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Full description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Release notes for the current version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whats_new: Option<String>,

    /// Icon file name (URL once normalized).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Feature graphic file name (URL once normalized).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_graphic: Option<String>,

    /// Promo graphic file name (URL once normalized).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_graphic: Option<String>,

    /// TV banner file name (URL once normalized).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tv_banner: Option<String>,

    /// Phone screenshot file names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phone_screenshots: Vec<String>,

    /// 7" tablet screenshot file names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seven_inch_screenshots: Vec<String>,

    /// 10" tablet screenshot file names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ten_inch_screenshots: Vec<String>,

    /// TV screenshot file names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tv_screenshots: Vec<String>,

    /// Wearable screenshot file names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wear_screenshots: Vec<String>,

    /// Keys we do not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LocalizedAssets {
    /// The graphic of the given kind.
    pub fn graphic(&self, kind: GraphicKind) -> Option<&str> {
        match kind {
            GraphicKind::Icon => self.icon.as_deref(),
            GraphicKind::FeatureGraphic => self.feature_graphic.as_deref(),
            GraphicKind::PromoGraphic => self.promo_graphic.as_deref(),
            GraphicKind::TvBanner => self.tv_banner.as_deref(),
        }
    }

    /// Mutable access to the graphic of the given kind.
    pub fn graphic_mut(&mut self, kind: GraphicKind) -> &mut Option<String> {
        match kind {
            GraphicKind::Icon => &mut self.icon,
            GraphicKind::FeatureGraphic => &mut self.feature_graphic,
            GraphicKind::PromoGraphic => &mut self.promo_graphic,
            GraphicKind::TvBanner => &mut self.tv_banner,
        }
    }

    /// The screenshot list of the given kind.
    pub fn screenshots(&self, kind: ScreenshotKind) -> &[String] {
        match kind {
            ScreenshotKind::Phone => &self.phone_screenshots,
            ScreenshotKind::SevenInch => &self.seven_inch_screenshots,
            ScreenshotKind::TenInch => &self.ten_inch_screenshots,
            ScreenshotKind::Tv => &self.tv_screenshots,
            ScreenshotKind::Wear => &self.wear_screenshots,
        }
    }

    /// Mutable access to the screenshot list of the given kind.
    pub fn screenshots_mut(&mut self, kind: ScreenshotKind) -> &mut Vec<String> {
        match kind {
            ScreenshotKind::Phone => &mut self.phone_screenshots,
            ScreenshotKind::SevenInch => &mut self.seven_inch_screenshots,
            ScreenshotKind::TenInch => &mut self.ten_inch_screenshots,
            ScreenshotKind::Tv => &mut self.tv_screenshots,
            ScreenshotKind::Wear => &mut self.wear_screenshots,
        }
    }
}

/// A permission request: fully-qualified name and optional max SDK level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission(pub String, pub Option<Value>);

/// One distributable artifact version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    /// Owning application id.
    #[serde(default)]
    pub package_name: String,

    /// Binary path (URL once normalized).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apk_name: Option<String>,

    /// Source archive path (URL once normalized).
    #[serde(rename = "srcname", default, skip_serializing_if = "Option::is_none")]
    pub src_name: Option<String>,

    /// Declared version name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,

    /// Monotonic version code, 0 when absent.
    #[serde(default, deserialize_with = "lenient::int")]
    pub version_code: i64,

    /// Hex content hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Name of the algorithm `hash` was computed with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_type: Option<String>,

    /// Declared size in bytes.
    #[serde(default, deserialize_with = "lenient::opt_u64", skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Minimum platform level.
    #[serde(default, deserialize_with = "lenient::opt_int", skip_serializing_if = "Option::is_none")]
    pub min_sdk_version: Option<i64>,

    /// Target platform level.
    #[serde(default, deserialize_with = "lenient::opt_int", skip_serializing_if = "Option::is_none")]
    pub target_sdk_version: Option<i64>,

    /// Signature digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,

    /// When this version was added.
    #[serde(default, deserialize_with = "lenient::opt_int", skip_serializing_if = "Option::is_none")]
    pub added: Option<i64>,

    /// Requested permissions.
    #[serde(rename = "uses-permission", default, skip_serializing_if = "Vec::is_empty")]
    pub uses_permission: Vec<Permission>,

    /// Keys we do not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "repo": {"name": "Demo", "timestamp": 1500000000000, "address": "https://demo.example/repo", "mirrors": ["https://mirror.example/repo"]},
        "requests": {"install": [], "uninstall": []},
        "apps": [{
            "packageName": "org.demo.app",
            "suggestedVersionCode": "12",
            "categories": ["System"],
            "flattrID": "1234",
            "localized": {"en-US": {"name": "Demo", "phoneScreenshots": ["1.png"], "video": "https://v"}},
            "openCollective": "demo"
        }],
        "packages": {"org.demo.app": [
            {"packageName": "org.demo.app", "versionCode": 12, "apkName": "demo_12.apk", "hash": "ab", "hashType": "sha256",
             "uses-permission": [["android.permission.INTERNET", null], ["android.permission.WAKE_LOCK", 22]], "nativecode": ["arm64-v8a"]}
        ]}
    }"#;

    #[test]
    fn decodes_and_keeps_unknown_keys() {
        let idx: CatalogIndex = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(idx.repo_name(), Some("Demo"));
        assert_eq!(idx.app_ids().collect::<Vec<_>>(), vec!["org.demo.app"]);

        let app = idx.app("org.demo.app").unwrap();
        assert_eq!(app.suggested_version_code, Some(12));
        assert_eq!(app.flattr_id.as_deref(), Some("1234"));
        assert_eq!(app.extra.get("openCollective"), Some(&Value::from("demo")));
        let en = &app.localized["en-US"];
        assert_eq!(en.screenshots(ScreenshotKind::Phone), ["1.png".to_string()]);
        assert!(en.extra.contains_key("video"));

        let pkgs = idx.packages_for("org.demo.app");
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].version_code, 12);
        assert_eq!(pkgs[0].uses_permission.len(), 2);
        assert!(pkgs[0].extra.contains_key("nativecode"));
        assert!(idx.packages_for("missing").is_empty());
    }

    #[test]
    fn cache_form_preserves_markers_and_extras() {
        let mut idx: CatalogIndex = serde_json::from_str(SAMPLE).unwrap();
        idx.source_id = "abc".to_string();
        idx.normalized = true;

        let text = serde_json::to_string(&idx).unwrap();
        let back: CatalogIndex = serde_json::from_str(&text).unwrap();
        assert_eq!(back, idx);
        assert!(text.contains("\"_normalized\":true"));
        assert!(text.contains("\"nativecode\""));
    }
}
