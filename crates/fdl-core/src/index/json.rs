//! `index-v1.json` decoding.

use fdl_schema::{CatalogIndex, IndexError};

/// Decode a JSON index.
///
/// # Errors
///
/// Returns [`IndexError::Json`] if the document does not match the schema.
pub fn parse_json(bytes: &[u8]) -> Result<CatalogIndex, IndexError> {
    let mut index: CatalogIndex = serde_json::from_slice(bytes)?;
    for (app_id, packages) in &mut index.packages {
        for pkg in packages.iter_mut().filter(|p| p.package_name.is_empty()) {
            pkg.package_name.clone_from(app_id);
        }
    }
    Ok(index)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"{
        "repo": {"name": "Demo Repo", "timestamp": 1500000000, "version": 19, "maxage": 14,
                 "icon": "fdroid-icon.png", "address": "https://demo.example/repo",
                 "description": "A demo & test repository.", "mirrors": ["https://mirror.example/repo"]},
        "requests": {"install": ["org.demo.one"], "uninstall": []},
        "apps": [
            {"packageName": "org.demo.one", "name": "Demo One", "icon": "org.demo.one.3.png",
             "categories": ["System", "Development"], "suggestedVersionCode": "3",
             "localized": {"en-US": {"summary": "First demo", "featureGraphic": "feature.png",
                                     "phoneScreenshots": ["1.png", "2.png"]}}},
            {"packageName": "org.demo.two", "name": "Demo Two"}
        ],
        "packages": {
            "org.demo.one": [
                {"packageName": "org.demo.one", "versionCode": 3, "versionName": "1.2",
                 "apkName": "org.demo.one_3.apk", "srcname": "org.demo.one_3_src.tar.gz",
                 "hash": "aa11", "hashType": "sha256", "size": 1024},
                {"versionCode": 2, "apkName": "org.demo.one_2.apk", "hash": "bb22", "hashType": "sha256"}
            ]
        }
    }"#;

    #[test]
    fn decodes_document() {
        let idx = parse_json(SAMPLE.as_bytes()).unwrap();
        assert_eq!(idx.repo_name(), Some("Demo Repo"));
        assert_eq!(idx.apps.len(), 2);
        assert_eq!(idx.package_count(), 2);
        let pkgs = idx.packages_for("org.demo.one");
        assert_eq!(pkgs[1].package_name, "org.demo.one");
        assert_eq!(pkgs[1].version_code, 2);
    }

    #[test]
    fn rejects_wrong_shapes() {
        assert!(matches!(
            parse_json(br#"{"apps": {"not": "a list"}}"#),
            Err(IndexError::Json(_))
        ));
        assert!(parse_json(b"{").is_err());
    }
}
