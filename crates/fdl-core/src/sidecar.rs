//! Per-application YAML metadata files (`<metadata>/<appid>.yml`).
//!
//! Only the keys below are written, and only when the application has a
//! value for them. Anything else already in the file is left alone.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::error::MirrorError;
use crate::metadata::AppMetadata;
use crate::paths::write_atomic;

/// YAML key and the metadata fields it is filled from, first match wins.
const FIELDS: [(&str, &[&str]); 14] = [
    ("Categories", &["categories"]),
    ("AuthorName", &["authorName"]),
    ("AuthorEmail", &["authorEmail"]),
    ("License", &["license"]),
    ("WebSite", &["webSite"]),
    ("SourceCode", &["sourceCode"]),
    ("IssueTracker", &["issueTracker"]),
    ("Changelog", &["changelog"]),
    ("Donate", &["donate"]),
    ("FlattrID", &["flattrID", "flattr"]),
    ("LiberapayID", &["liberapayID", "liberapay"]),
    ("Bitcoin", &["bitcoin"]),
    ("Litecoin", &["litecoin"]),
    ("AntiFeatures", &["antiFeatures"]),
];

/// Write or refresh the sidecar of `app` at `path`.
///
/// # Errors
///
/// Returns an error if an existing file is not valid YAML or the write fails.
pub fn write_sidecar(path: &Path, app: &AppMetadata) -> Result<(), MirrorError> {
    let mut doc = match std::fs::read_to_string(path) {
        Ok(text) => match serde_yaml::from_str::<Option<Mapping>>(&text)? {
            Some(map) => map,
            None => Mapping::new(),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Mapping::new(),
        Err(e) => return Err(e.into()),
    };

    for (key, candidates) in FIELDS {
        if let Some(value) = candidates.iter().find_map(|c| app.get(c)) {
            doc.insert(Value::from(key), serde_yaml::to_value(value)?);
        }
    }

    write_atomic(path, serde_yaml::to_string(&doc)?.as_bytes())?;
    Ok(())
}
