//! Application metadata assembled from manual overrides and indexes.
//!
//! A record starts from the overrides kept in the configuration's `metadata`
//! table. Every index that lists the application is then merged in. Values
//! already present win, so an operator's edit is never replaced by what a
//! repository publishes.

use std::collections::BTreeMap;

use fdl_schema::{AppRecord, CatalogIndex, LocalizedAssets};
use serde_json::{Map, Value};

use crate::error::MirrorError;
use crate::selector::SelectionRule;
use crate::store::IndexStore;

/// Recursively copy `source` over `dest`.
///
/// Nested objects are merged key by key; every other value in `source`
/// replaces the one in `dest`. Lists are replaced, never concatenated.
pub fn merge_json(source: &Map<String, Value>, dest: &mut Map<String, Value>) {
    for (key, value) in source {
        match (value, dest.get_mut(key)) {
            (Value::Object(src), Some(Value::Object(dst))) => merge_json(src, dst),
            (Value::Object(src), _) => {
                let mut node = Map::new();
                merge_json(src, &mut node);
                dest.insert(key.clone(), Value::Object(node));
            }
            (other, _) => {
                dest.insert(key.clone(), other.clone());
            }
        }
    }
}

/// Descriptive record for one application.
#[derive(Debug, Clone, PartialEq)]
pub struct AppMetadata {
    id: String,
    store: Map<String, Value>,
    overrides: Map<String, Value>,
}

impl AppMetadata {
    /// Build a record from manual `overrides` and optional index data.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Configuration`] if `id` is empty.
    pub fn new(
        id: &str,
        overrides: Map<String, Value>,
        index_entry: Option<Map<String, Value>>,
    ) -> Result<Self, MirrorError> {
        if id.trim().is_empty() {
            return Err(MirrorError::Configuration(
                "application metadata without an id".into(),
            ));
        }
        let mut store = index_entry.unwrap_or_default();
        merge_json(&overrides, &mut store);
        Ok(Self {
            id: id.to_string(),
            store,
            overrides,
        })
    }

    /// Build a record from an index application entry.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Configuration`] if the entry has no package
    /// name.
    pub fn from_record(record: &AppRecord) -> Result<Self, MirrorError> {
        let entry = match serde_json::to_value(record)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(&record.package_name, Map::new(), Some(entry))
    }

    /// Application id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enrich with another record; values already present win.
    pub fn merge(&mut self, other: &AppMetadata) {
        let mut merged = other.store.clone();
        merge_json(&self.store, &mut merged);
        self.store = merged;
    }

    /// Apply a manual edit. The edit wins and is kept as an override.
    pub fn update(&mut self, patch: &Map<String, Value>) {
        merge_json(patch, &mut self.store);
        merge_json(patch, &mut self.overrides);
    }

    /// Manual overrides, as written back to the configuration.
    pub fn overrides(&self) -> &Map<String, Value> {
        &self.overrides
    }

    /// Raw value of a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.store.get(key).filter(|v| !v.is_null())
    }

    /// Locale tags with localized data.
    pub fn locales(&self) -> Vec<&str> {
        match self.store.get("localized") {
            Some(Value::Object(map)) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Texts and graphics of `locale`; empty if the locale is unknown or malformed.
    pub fn localized(&self, locale: &str) -> LocalizedAssets {
        self.store
            .get("localized")
            .and_then(|l| l.get(locale))
            .and_then(|v| match serde_json::from_value(v.clone()) {
                Ok(assets) => Some(assets),
                Err(e) => {
                    tracing::warn!("{}: unreadable locale {locale}: {e}", self.id);
                    None
                }
            })
            .unwrap_or_default()
    }

    /// Localized display name.
    pub fn title(&self, locale: &str) -> Option<String> {
        self.localized(locale).name
    }

    /// Localized one-line summary.
    pub fn short_description(&self, locale: &str) -> Option<String> {
        self.localized(locale).summary
    }

    /// Localized long description.
    pub fn full_description(&self, locale: &str) -> Option<String> {
        self.localized(locale).description
    }
}

/// Every known [`AppMetadata`], keyed by application id.
#[derive(Debug, Clone, Default)]
pub struct MetadataCatalog {
    apps: BTreeMap<String, AppMetadata>,
}

impl MetadataCatalog {
    /// Seed from the configuration's manual overrides.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Configuration`] for an override without an id.
    pub fn from_overrides(overrides: &BTreeMap<String, Map<String, Value>>) -> Result<Self, MirrorError> {
        let mut catalog = Self::default();
        for (id, fields) in overrides {
            catalog.add(AppMetadata::new(id, fields.clone(), None)?);
        }
        Ok(catalog)
    }

    /// Add a record, merging into an existing one with the same id.
    pub fn add(&mut self, app: AppMetadata) {
        match self.apps.get_mut(app.id()) {
            Some(existing) => existing.merge(&app),
            None => {
                self.apps.insert(app.id.clone(), app);
            }
        }
    }

    /// Merge in every application entry of `index`; returns how many were merged.
    pub fn load_index(&mut self, index: &CatalogIndex) -> usize {
        let mut count = 0;
        for record in &index.apps {
            match AppMetadata::from_record(record) {
                Ok(app) => {
                    self.add(app);
                    count += 1;
                }
                Err(e) => tracing::debug!("{}: skipping app entry: {e}", index.source_id),
            }
        }
        count
    }

    /// Merge in every loaded index.
    pub fn load_indices(&mut self, store: &IndexStore) {
        for index in store.iter() {
            let count = self.load_index(index);
            tracing::info!("loaded index: {} apps: {count}", index.source_id);
        }
    }

    /// Record for `id`.
    pub fn get(&self, id: &str) -> Option<&AppMetadata> {
        self.apps.get(id)
    }

    /// Mutable record for `id`.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut AppMetadata> {
        self.apps.get_mut(id)
    }

    /// Records selected by `rule`.
    pub fn find_all(&self, rule: &SelectionRule) -> Vec<&AppMetadata> {
        self.apps
            .iter()
            .filter(|(id, _)| rule.matches(id))
            .map(|(_, app)| app)
            .collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Manual overrides of every record that has any.
    pub fn overrides(&self) -> BTreeMap<String, Map<String, Value>> {
        self.apps
            .iter()
            .filter(|(_, app)| !app.overrides.is_empty())
            .map(|(id, app)| (id.clone(), app.overrides.clone()))
            .collect()
    }
}
