//! Index document decoding.
//!
//! [`parse_json`] and [`parse_xml`] produce the same [`CatalogIndex`] shape;
//! nothing downstream needs to know which wire format a repository served.

pub mod json;
pub mod normalize;
pub mod xml;

use fdl_schema::{CatalogIndex, IndexError};

use crate::io::archive::{JSON_MEMBER, XML_MEMBER};

pub use json::parse_json;
pub use normalize::normalize_paths;
pub use xml::parse_xml;

/// Which index archive a repository is fetched through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// `index-v1.jar` holding `index-v1.json`.
    Json,
    /// `index.jar` holding `index.xml`.
    Xml,
}

impl IndexFormat {
    /// Archive file name relative to the repository base URL.
    pub fn archive_name(self) -> &'static str {
        match self {
            Self::Json => "index-v1.jar",
            Self::Xml => "index.jar",
        }
    }

    /// Archive members to try, preferred first.
    pub fn members(self) -> &'static [&'static str] {
        match self {
            Self::Json => &[JSON_MEMBER, XML_MEMBER],
            Self::Xml => &[XML_MEMBER, JSON_MEMBER],
        }
    }
}

impl std::fmt::Display for IndexFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Xml => "xml",
        })
    }
}

/// Decode a document of either kind, sniffing the format from its first byte.
///
/// # Errors
///
/// Returns [`IndexError::Empty`] for a blank document, otherwise whatever the
/// selected decoder reports.
pub fn parse_document(bytes: &[u8], default_locale: &str) -> Result<CatalogIndex, IndexError> {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        None => Err(IndexError::Empty),
        Some(&b'<') => parse_xml(body, default_locale),
        Some(_) => parse_json(body),
    }
}
