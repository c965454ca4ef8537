//! Mirror directory layout and file placement.
//!
//! Application ids, locale tags and file names come from remote indexes.
//! They only become path components after passing [`is_plain_component`] or
//! [`safe_file_name`].

use std::io;
use std::path::{Path, PathBuf};

/// On-disk layout of a mirror.
///
/// All directories are relative to the working directory unless overridden
/// on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Persisted configuration document.
    pub config_file: PathBuf,
    /// Downloaded packages and source archives.
    pub repo_dir: PathBuf,
    /// YAML sidecars, localized texts and graphics.
    pub metadata_dir: PathBuf,
    /// Normalized index caches.
    pub cache_dir: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("fdroid-dl.json"),
            repo_dir: PathBuf::from("repo"),
            metadata_dir: PathBuf::from("metadata"),
            cache_dir: PathBuf::from(".cache"),
        }
    }
}

impl Layout {
    /// Staging directory for in-flight downloads: `<cache>/tmp`.
    ///
    /// Lives next to the cache so a finished download can be renamed into
    /// place without crossing a filesystem boundary in the common setup.
    pub fn staging_dir(&self) -> PathBuf {
        self.cache_dir.join("tmp")
    }

    /// Create every directory of the layout.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn prepare(&self) -> io::Result<()> {
        for dir in [
            &self.repo_dir,
            &self.metadata_dir,
            &self.cache_dir,
            &self.staging_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(parent) = self.config_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Metadata locations of one application, or `None` if `app_id` is not
    /// a plain path component.
    pub fn app_paths(&self, app_id: &str) -> Option<AppPaths> {
        is_plain_component(app_id).then(|| AppPaths {
            sidecar: self.metadata_dir.join(format!("{app_id}.yml")),
            dir: self.metadata_dir.join(app_id),
        })
    }
}

/// Where the metadata of one application lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// YAML sidecar: `<metadata>/<appid>.yml`.
    pub sidecar: PathBuf,
    /// Texts and graphics: `<metadata>/<appid>/`.
    pub dir: PathBuf,
}

impl AppPaths {
    /// `<metadata>/<appid>/<locale>`, or `None` for a locale tag that is not
    /// a plain path component.
    pub fn locale_dir(&self, locale: &str) -> Option<PathBuf> {
        is_plain_component(locale).then(|| self.dir.join(locale))
    }
}

/// `true` for an id or locale tag usable as a single directory entry.
///
/// Accepts ASCII letters, digits and `._-+@` with no leading dot and no
/// `..`, so separators and hidden names are rejected.
pub fn is_plain_component(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+' | '@'))
}

/// Extract the final path segment of a URL, ignoring query and fragment.
pub fn filename_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or("");
    path.split('/').next_back().unwrap_or("")
}

/// The file name a download of `url` is stored under, if it has a usable one.
///
/// URLs ending in `/`, or whose last segment is `.`, `..` or holds a
/// backslash, have none.
pub fn safe_file_name(url: &str) -> Option<&str> {
    let name = filename_from_url(url);
    let usable = !name.is_empty() && name != "." && name != ".." && !name.contains(['\\', '\0']);
    usable.then_some(name)
}

/// Atomically replace `path` with `contents`.
///
/// The data is written to a temporary file in the same directory and then
/// renamed over the destination, so readers never observe a partial file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the write or
/// rename fails.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new().prefix(".fdl-").tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Returns `true` if `path` names an existing regular file.
pub fn is_file(path: &Path) -> bool {
    path.metadata().is_ok_and(|m| m.is_file())
}
