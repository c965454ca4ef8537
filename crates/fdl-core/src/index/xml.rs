//! Legacy `index.xml` decoding.
//!
//! The document is read into a small element tree, then fields are pulled
//! out with [`XmlPath`] expressions:
//!
//! ```text
//! repo[@timestamp]      attribute of a child element
//! package/hash[@type]   attribute of a nested element
//! added:date            element text run through a named transform
//! ```
//!
//! The transform after `:` is one of a closed set ([`Transform`]); there is
//! no expression evaluation.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use fdl_schema::{
    AppRecord, CatalogIndex, IndexError, LocalizedAssets, PackageRecord, Permission, RepoMeta,
    Requests,
};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

const PERMISSION_NAMESPACE: &str = "android.permission.";

/// A parsed XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Tag name.
    pub name: String,
    /// Attributes in document order.
    pub attrs: Vec<(String, String)>,
    /// Concatenated, trimmed text content.
    pub text: String,
    /// Child elements in document order.
    pub children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, IndexError> {
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| IndexError::Xml(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| IndexError::Xml(e.to_string()))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attrs,
            ..Self::default()
        })
    }

    /// Attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Children with the given tag name.
    pub fn children_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First descendant reached by following `steps` child by child.
    pub fn find(&self, steps: &[String]) -> Option<&Element> {
        steps
            .iter()
            .try_fold(self, |node, step| node.children_named(step).next())
    }

    /// Every descendant reached by following `steps`, in document order.
    pub fn find_all(&self, steps: &[String]) -> Vec<&Element> {
        let mut nodes = vec![self];
        for step in steps {
            nodes = nodes
                .into_iter()
                .flat_map(|n| n.children_named(step))
                .collect();
        }
        nodes
    }
}

/// Read a whole document into an element tree and return its root.
///
/// # Errors
///
/// Returns [`IndexError::Xml`] on malformed markup and [`IndexError::Empty`]
/// if the document has no root element.
pub fn parse_tree(bytes: &[u8]) -> Result<Element, IndexError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;
    let mut buf = Vec::new();
    let xml_err = |e: quick_xml::Error| IndexError::Xml(e.to_string());

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| IndexError::Xml("unbalanced end tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape().map_err(xml_err)?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(String::from_utf8_lossy(&data.into_inner()).trim());
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(IndexError::Xml("unexpected end of document".to_string()));
    }
    root.ok_or(IndexError::Empty)
}

/// Post-processing applied to an extracted raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Use the value as is.
    Identity,
    /// `YYYY-MM-DD` to seconds since the epoch (UTC midnight).
    EpochDate,
}

impl Transform {
    fn from_name(name: &str) -> Result<Self, IndexError> {
        match name {
            "date" => Ok(Self::EpochDate),
            "" | "text" => Ok(Self::Identity),
            other => Err(IndexError::Xml(format!("unknown transform '{other}'"))),
        }
    }
}

/// A field locator: element path, optional attribute, optional transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlPath {
    steps: Vec<String>,
    attr: Option<String>,
    transform: Transform,
}

impl XmlPath {
    /// Parse `path/to/tag[@attr]:transform`; every part but the path is optional.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Xml`] for an unknown transform or a malformed
    /// attribute selector.
    pub fn parse(expr: &str) -> Result<Self, IndexError> {
        let (path, transform) = match expr.split_once(':') {
            Some((path, name)) => (path, Transform::from_name(name.trim())?),
            None => (expr, Transform::Identity),
        };
        let path = path.trim().trim_start_matches("./");
        let (path, attr) = match path.split_once("[@") {
            Some((path, rest)) => {
                let attr = rest
                    .strip_suffix(']')
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| IndexError::Xml(format!("bad attribute selector in '{expr}'")))?;
                (path, Some(attr.to_string()))
            }
            None => (path, None),
        };
        let steps = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_string)
            .collect();
        Ok(Self {
            steps,
            attr,
            transform,
        })
    }

    /// Raw trimmed value at this path, before the transform.
    pub fn raw<'a>(&self, node: &'a Element) -> Option<&'a str> {
        let target = node.find(&self.steps)?;
        let value = match &self.attr {
            Some(attr) => target.attr(attr)?,
            None => target.text.as_str(),
        };
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    }

    /// Every raw value matched by this path, in document order.
    pub fn raw_all<'a>(&self, node: &'a Element) -> Vec<&'a str> {
        node.find_all(&self.steps)
            .into_iter()
            .filter_map(|target| match &self.attr {
                Some(attr) => target.attr(attr),
                None => Some(target.text.as_str()),
            })
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// Value as a string.
    pub fn string(&self, node: &Element) -> Option<String> {
        self.raw(node).map(str::to_string)
    }

    /// Value as an integer, after the transform.
    ///
    /// Values that are not numeric (or not valid dates) yield `Ok(None)`
    /// for plain fields and [`IndexError::InvalidDate`] for date fields.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidDate`] when a date transform fails.
    pub fn int(&self, node: &Element, field: &'static str) -> Result<Option<i64>, IndexError> {
        let Some(raw) = self.raw(node) else {
            return Ok(None);
        };
        match self.transform {
            Transform::Identity => Ok(raw.parse().ok()),
            Transform::EpochDate => epoch_date(field, raw).map(Some),
        }
    }
}

/// `YYYY-MM-DD` to seconds since the epoch at UTC midnight.
///
/// # Errors
///
/// Returns [`IndexError::InvalidDate`] if the value is not a calendar date.
pub fn epoch_date(field: &'static str, value: &str) -> Result<i64, IndexError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| IndexError::InvalidDate {
            field,
            value: value.to_string(),
        })
}

/// Compiled field locators, parsed once per document.
struct Fields {
    paths: BTreeMap<&'static str, XmlPath>,
}

impl Fields {
    fn new(exprs: &[(&'static str, &'static str)]) -> Result<Self, IndexError> {
        let mut paths = BTreeMap::new();
        for (field, expr) in exprs {
            paths.insert(*field, XmlPath::parse(expr)?);
        }
        Ok(Self { paths })
    }

    fn path(&self, field: &'static str) -> Option<&XmlPath> {
        self.paths.get(field)
    }

    fn string(&self, node: &Element, field: &'static str) -> Option<String> {
        self.path(field).and_then(|p| p.string(node))
    }

    /// Integer field; an unparsable date is logged and dropped.
    fn int(&self, node: &Element, field: &'static str) -> Option<i64> {
        let path = self.path(field)?;
        match path.int(node, field) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("{e}");
                None
            }
        }
    }

    fn list(&self, node: &Element, field: &'static str) -> Vec<String> {
        self.string(node, field)
            .map(|v| split_list(&v))
            .unwrap_or_default()
    }
}

const REPO_FIELDS: &[(&str, &str)] = &[
    ("timestamp", "repo[@timestamp]"),
    ("version", "repo[@version]"),
    ("maxage", "repo[@maxage]"),
    ("name", "repo[@name]"),
    ("icon", "repo[@icon]"),
    ("address", "repo[@address]"),
    ("url", "repo[@url]"),
    ("description", "repo/description"),
    ("mirror", "repo/mirror"),
    ("install", "install[@packageName]"),
    ("uninstall", "uninstall[@packageName]"),
];

const APP_FIELDS: &[(&str, &str)] = &[
    ("id", "id"),
    ("authorEmail", "email"),
    ("authorName", "author"),
    ("webSite", "web"),
    ("bitcoin", "bitcoin"),
    ("donate", "donate"),
    ("flattr", "flattr"),
    ("liberapay", "liberapay"),
    ("litecoin", "litecoin"),
    ("categories", "categories"),
    ("antiFeatures", "antifeatures"),
    ("suggestedVersionName", "marketversion"),
    ("suggestedVersionCode", "marketvercode"),
    ("issueTracker", "tracker"),
    ("changelog", "changelog"),
    ("license", "license"),
    ("name", "name"),
    ("sourceCode", "source"),
    ("added", "added:date"),
    ("lastUpdated", "lastupdated:date"),
    ("icon", "icon"),
    ("description", "desc"),
    ("summary", "summary"),
];

const PACKAGE_FIELDS: &[(&str, &str)] = &[
    ("added", "added:date"),
    ("apkName", "apkname"),
    ("srcname", "srcname"),
    ("hash", "hash"),
    ("hashType", "hash[@type]"),
    ("minSdkVersion", "sdkver"),
    ("targetSdkVersion", "targetSdkVersion"),
    ("sig", "sig"),
    ("versionName", "version"),
    ("versionCode", "versioncode"),
    ("size", "size"),
    ("permissions", "permissions"),
];

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn qualify_permission(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{PERMISSION_NAMESPACE}{name}")
    }
}

/// Decode a legacy XML index.
///
/// Short description and description land in `localized[default_locale]`.
///
/// # Errors
///
/// Returns an error if the markup is malformed or a field locator is invalid.
pub fn parse_xml(bytes: &[u8], default_locale: &str) -> Result<CatalogIndex, IndexError> {
    let root = parse_tree(bytes)?;
    let repo_fields = Fields::new(REPO_FIELDS)?;
    let app_fields = Fields::new(APP_FIELDS)?;
    let pkg_fields = Fields::new(PACKAGE_FIELDS)?;

    let mut index = CatalogIndex::default();

    if root.children_named("repo").next().is_some() {
        index.repo = Some(RepoMeta {
            timestamp: repo_fields.int(&root, "timestamp"),
            version: repo_fields.int(&root, "version"),
            maxage: repo_fields.int(&root, "maxage"),
            name: repo_fields.string(&root, "name"),
            icon: repo_fields.string(&root, "icon"),
            address: repo_fields
                .string(&root, "address")
                .or_else(|| repo_fields.string(&root, "url")),
            description: repo_fields.string(&root, "description"),
            mirrors: raw_all(&repo_fields, &root, "mirror"),
            ..RepoMeta::default()
        });
    }
    index.requests = Requests {
        install: raw_all(&repo_fields, &root, "install"),
        uninstall: raw_all(&repo_fields, &root, "uninstall"),
    };

    for node in root.children_named("application") {
        let Some(id) = app_fields
            .string(node, "id")
            .or_else(|| {
                node.attr("id")
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
            })
        else {
            tracing::debug!("skipping application without id");
            continue;
        };

        let packages = node
            .children_named("package")
            .map(|pkg| parse_package(&pkg_fields, pkg, &id))
            .collect();
        index.packages.insert(id.clone(), packages);

        let app = parse_application(&app_fields, node, id, default_locale);
        let shell = AppRecord {
            localized: app.localized.clone(),
            ..AppRecord::default()
        };
        if app != shell {
            index.apps.push(app);
        }
    }

    Ok(index)
}

fn raw_all(fields: &Fields, node: &Element, field: &'static str) -> Vec<String> {
    fields
        .path(field)
        .map(|p| p.raw_all(node).into_iter().map(str::to_string).collect())
        .unwrap_or_default()
}

fn parse_application(
    fields: &Fields,
    node: &Element,
    id: String,
    default_locale: &str,
) -> AppRecord {
    let web = fields.string(node, "webSite");
    let mut localized = BTreeMap::new();
    localized.insert(
        default_locale.to_string(),
        LocalizedAssets {
            description: fields.string(node, "description"),
            summary: fields.string(node, "summary"),
            ..LocalizedAssets::default()
        },
    );
    AppRecord {
        package_name: id,
        author_email: fields.string(node, "authorEmail"),
        author_name: fields.string(node, "authorName"),
        author_web_site: web.clone(),
        web_site: web,
        bitcoin: fields.string(node, "bitcoin"),
        donate: fields.string(node, "donate"),
        flattr_id: fields.string(node, "flattr"),
        liberapay_id: fields.string(node, "liberapay"),
        litecoin: fields.string(node, "litecoin"),
        categories: fields.list(node, "categories"),
        anti_features: fields.list(node, "antiFeatures"),
        suggested_version_name: fields.string(node, "suggestedVersionName"),
        suggested_version_code: fields.int(node, "suggestedVersionCode"),
        issue_tracker: fields.string(node, "issueTracker"),
        changelog: fields.string(node, "changelog"),
        license: fields.string(node, "license"),
        name: fields.string(node, "name"),
        source_code: fields.string(node, "sourceCode"),
        added: fields.int(node, "added"),
        last_updated: fields.int(node, "lastUpdated"),
        icon: fields.string(node, "icon"),
        localized,
        ..AppRecord::default()
    }
}

fn parse_package(fields: &Fields, node: &Element, app_id: &str) -> PackageRecord {
    let uses_permission = fields
        .list(node, "permissions")
        .iter()
        .map(|p| Permission(qualify_permission(p), None))
        .collect();
    PackageRecord {
        package_name: app_id.to_string(),
        added: fields.int(node, "added"),
        apk_name: fields.string(node, "apkName"),
        src_name: fields.string(node, "srcname"),
        hash: fields.string(node, "hash"),
        hash_type: fields.string(node, "hashType"),
        min_sdk_version: fields.int(node, "minSdkVersion"),
        target_sdk_version: fields.int(node, "targetSdkVersion"),
        sig: fields.string(node, "sig"),
        version_name: fields.string(node, "versionName"),
        version_code: fields.int(node, "versionCode").unwrap_or(0),
        size: fields
            .int(node, "size")
            .and_then(|s| u64::try_from(s).ok()),
        uses_permission,
        ..PackageRecord::default()
    }
}
