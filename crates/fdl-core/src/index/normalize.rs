//! Relative asset path rewriting.
//!
//! Catalogs publish file names relative to the repository base URL. After
//! [`normalize_paths`] every URL-valued field of the index is absolute:
//!
//! | field                        | joined path                        |
//! |------------------------------|------------------------------------|
//! | `apkName`, `srcname`         | `<file>`                           |
//! | app `icon`                   | `icons/<file>`                     |
//! | localized graphics           | `<appid>/<locale>/<file>`          |
//! | localized screenshots        | `<appid>/<locale>/<kind>/<file>`   |

use fdl_schema::{CatalogIndex, GraphicKind, ScreenshotKind};
use reqwest::Url;

fn join(base: &Url, prefix: &str, file: &str) -> String {
    if Url::parse(file).is_ok() {
        return file.to_string();
    }
    let path = format!("{prefix}{file}");
    base.join(&path).map_or(path, |u| u.to_string())
}

fn join_in_place(base: &Url, field: &mut Option<String>, prefix: &str) {
    if let Some(value) = field.as_mut() {
        *value = join(base, prefix, value);
    }
}

/// Rewrite every relative asset path of `index` against `base`.
///
/// Runs at most once per index: the `normalized` marker is set on the first
/// call and later calls return immediately.
pub fn normalize_paths(index: &mut CatalogIndex, base: &Url) {
    if index.normalized {
        return;
    }
    index.normalized = true;

    for pkg in index.packages.values_mut().flatten() {
        join_in_place(base, &mut pkg.apk_name, "");
        join_in_place(base, &mut pkg.src_name, "");
    }

    for app in &mut index.apps {
        join_in_place(base, &mut app.icon, "icons/");
        let app_id = app.package_name.clone();
        for (locale, assets) in &mut app.localized {
            let prefix = format!("{app_id}/{locale}/");
            for kind in GraphicKind::ALL {
                join_in_place(base, assets.graphic_mut(kind), &prefix);
            }
            for kind in ScreenshotKind::ALL {
                let prefix = format!("{prefix}{}/", kind.as_str());
                for shot in assets.screenshots_mut(kind) {
                    *shot = join(base, &prefix, shot);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::json::parse_json;
    use crate::index::json::tests::SAMPLE;

    fn base() -> Url {
        Url::parse("https://demo.example/repo/").unwrap()
    }

    #[test]
    fn rewrites_all_asset_paths() {
        let mut idx = parse_json(SAMPLE.as_bytes()).unwrap();
        normalize_paths(&mut idx, &base());

        let pkg = &idx.packages_for("org.demo.one")[0];
        assert_eq!(
            pkg.apk_name.as_deref(),
            Some("https://demo.example/repo/org.demo.one_3.apk")
        );
        assert_eq!(
            pkg.src_name.as_deref(),
            Some("https://demo.example/repo/org.demo.one_3_src.tar.gz")
        );

        let app = idx.app("org.demo.one").unwrap();
        assert_eq!(
            app.icon.as_deref(),
            Some("https://demo.example/repo/icons/org.demo.one.3.png")
        );
        let en = &app.localized["en-US"];
        assert_eq!(
            en.feature_graphic.as_deref(),
            Some("https://demo.example/repo/org.demo.one/en-US/feature.png")
        );
        assert_eq!(
            en.phone_screenshots,
            vec![
                "https://demo.example/repo/org.demo.one/en-US/phoneScreenshots/1.png".to_string(),
                "https://demo.example/repo/org.demo.one/en-US/phoneScreenshots/2.png".to_string(),
            ]
        );
        assert!(idx.normalized);
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let mut once = parse_json(SAMPLE.as_bytes()).unwrap();
        normalize_paths(&mut once, &base());
        let mut twice = once.clone();
        normalize_paths(&mut twice, &base());
        assert_eq!(once, twice);
    }

    #[test]
    fn absolute_paths_are_kept() {
        let mut idx = parse_json(
            br#"{"packages": {"a": [{"apkName": "https://cdn.example/a_1.apk"}]}}"#,
        )
        .unwrap();
        normalize_paths(&mut idx, &base());
        assert_eq!(
            idx.packages_for("a")[0].apk_name.as_deref(),
            Some("https://cdn.example/a_1.apk")
        );
    }
}
