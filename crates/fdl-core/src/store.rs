//! On-disk cache of normalized indexes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use fdl_schema::CatalogIndex;

use crate::config::RepositorySource;
use crate::error::MirrorError;
use crate::index::normalize_paths;

/// Indexes of the configured repositories, keyed by source id.
#[derive(Debug, Clone, Default)]
pub struct IndexStore {
    cache_dir: PathBuf,
    indices: BTreeMap<String, CatalogIndex>,
}

impl IndexStore {
    /// Empty store reading from `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            indices: BTreeMap::new(),
        }
    }

    /// Load the cache of every non-errored source.
    ///
    /// Missing or unreadable caches are logged and skipped; the next index
    /// phase will fetch them again.
    pub fn load(cache_dir: impl Into<PathBuf>, sources: &[RepositorySource]) -> Self {
        let mut store = Self::new(cache_dir);
        for source in sources.iter().filter(|s| !s.is_errored()) {
            if let Err(e) = store.load_source(source) {
                tracing::warn!("{}: cached index unavailable: {e}", source.url());
            }
        }
        store
    }

    fn load_source(&mut self, source: &RepositorySource) -> Result<(), MirrorError> {
        let path = source.cache_path(&self.cache_dir);
        let bytes = std::fs::read(&path)?;
        let mut index: CatalogIndex = serde_json::from_slice(&bytes)?;
        index.source_id = source.id().to_string();
        normalize_paths(&mut index, &source.base_url()?);
        tracing::debug!("loaded {} ({} apps)", path.display(), index.apps.len());
        self.insert(index);
        Ok(())
    }

    /// Add or replace an index.
    pub fn insert(&mut self, index: CatalogIndex) {
        self.indices.insert(index.source_id.clone(), index);
    }

    /// Index of the source with `id`.
    pub fn get(&self, id: &str) -> Option<&CatalogIndex> {
        self.indices.get(id)
    }

    /// Every loaded index.
    pub fn iter(&self) -> impl Iterator<Item = &CatalogIndex> {
        self.indices.values()
    }

    /// Number of loaded indexes.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// `true` if nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositorySettings;
    use crate::index::json::parse_json;
    use crate::index::json::tests::SAMPLE;

    #[test]
    fn loads_only_healthy_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let healthy = RepositorySource::new("https://a.example/repo/", RepositorySettings::default());
        let mut broken = RepositorySource::new("https://b.example/repo/", RepositorySettings::default());
        let missing = RepositorySource::new("https://c.example/repo/", RepositorySettings::default());

        let raw = serde_json::to_vec(&parse_json(SAMPLE.as_bytes()).unwrap()).unwrap();
        std::fs::write(healthy.cache_path(tmp.path()), &raw).unwrap();
        std::fs::write(broken.cache_path(tmp.path()), &raw).unwrap();
        broken.set_error(500, "down");

        let store = IndexStore::load(tmp.path(), &[healthy.clone(), broken, missing]);
        assert_eq!(store.len(), 1);
        let idx = store.get(healthy.id()).unwrap();
        assert!(idx.normalized);
        assert_eq!(
            idx.packages_for("org.demo.one")[0].apk_name.as_deref(),
            Some("https://a.example/repo/org.demo.one_3.apk")
        );
    }
}
