//! Application and package selection.
//!
//! Each repository lists selection rules. A rule is resolved against the
//! ids of that repository's index; the packages of every resolved id are then
//! pooled across all healthy repositories, ranked newest first and cut to the
//! retention count.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use fdl_schema::{CatalogIndex, HashAlgorithm, PackageRecord};
use regex::{Regex, RegexBuilder};

use crate::config::{RepositorySource, Settings};
use crate::io::download::{DownloadJob, ExpectedHash};
use crate::paths::safe_file_name;
use crate::store::IndexStore;

/// One parsed selection rule.
#[derive(Debug, Clone)]
pub enum SelectionRule {
    /// `*`, `.*` or `all`.
    All,
    /// `regex:<pattern>`: case-insensitive, anchored at the start only.
    Pattern(Regex),
    /// A literal application id.
    Exact(String),
}

impl SelectionRule {
    /// Parse a rule as written in the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a `regex:` rule does not compile.
    pub fn parse(rule: &str) -> Result<Self, regex::Error> {
        let rule = rule.trim();
        if let Some(pattern) = rule.strip_prefix("regex:") {
            // prefix match: `regex:a\.b` also selects `a.bcd`
            let regex = RegexBuilder::new(&format!("^(?:{pattern})"))
                .case_insensitive(true)
                .dot_matches_new_line(true)
                .build()?;
            return Ok(Self::Pattern(regex));
        }
        Ok(match rule {
            "*" | ".*" | "all" => Self::All,
            id => Self::Exact(id.to_string()),
        })
    }

    /// Whether `id` is selected.
    pub fn matches(&self, id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Pattern(regex) => regex.is_match(id),
            Self::Exact(exact) => exact == id,
        }
    }

    /// The subset of `ids` this rule selects, in input order.
    pub fn resolve<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        ids.into_iter().filter(|id| self.matches(id)).collect()
    }
}

/// Parse every rule of `source`, logging and dropping invalid ones.
pub fn rules_of(source: &RepositorySource) -> Vec<SelectionRule> {
    source
        .apps()
        .iter()
        .filter_map(|raw| match SelectionRule::parse(raw) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!("{}: ignoring selection rule {raw:?}: {e}", source.url());
                None
            }
        })
        .collect()
}

/// A package record together with the repository that published it.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Publishing repository.
    pub source: &'a RepositorySource,
    /// The record.
    pub record: &'a PackageRecord,
}

/// Resolves selection rules against the cached indexes.
#[derive(Debug, Clone, Copy)]
pub struct PackageSelector<'a> {
    sources: &'a [RepositorySource],
    store: &'a IndexStore,
    settings: &'a Settings,
}

impl<'a> PackageSelector<'a> {
    /// Create a selector over `sources` and their cached indexes.
    pub fn new(sources: &'a [RepositorySource], store: &'a IndexStore, settings: &'a Settings) -> Self {
        Self {
            sources,
            store,
            settings,
        }
    }

    /// Healthy sources that have an index.
    fn active(&self) -> impl Iterator<Item = (&'a RepositorySource, &'a CatalogIndex)> + 'a {
        let store = self.store;
        self.sources
            .iter()
            .filter(|s| !s.is_errored())
            .filter_map(move |s| store.get(s.id()).map(|idx| (s, idx)))
    }

    /// Every `(source, app id)` pair selected by a rule.
    ///
    /// Rules see the ids of the index's app entries and of its package lists.
    ///
    /// With `dupes == false` an id selected by several sources is reported
    /// once, for the first source in configuration order.
    pub fn all_apps(&self, dupes: bool) -> Vec<(&'a RepositorySource, &'a str)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (source, index) in self.active() {
            let mut per_source = BTreeSet::new();
            for rule in rules_of(source) {
                for id in rule.resolve(index.app_ids().chain(index.packages.keys().map(String::as_str))) {
                    if per_source.insert(id) && (dupes || seen.insert(id)) {
                        out.push((source, id));
                    }
                }
            }
        }
        out
    }

    /// Every record of `app_id` across all healthy sources, in encounter order.
    pub fn candidates(&self, app_id: &str) -> Vec<Candidate<'a>> {
        self.active()
            .flat_map(|(source, index)| {
                index
                    .packages_for(app_id)
                    .iter()
                    .map(move |record| Candidate { source, record })
            })
            .collect()
    }

    /// The `retention` newest records of `app_id`, minus those failing `eligible`.
    ///
    /// Truncation happens before the eligibility filter, so an ineligible
    /// record still takes up a retention slot.
    pub fn ranked(
        &self,
        app_id: &str,
        retention: usize,
        eligible: impl Fn(&PackageRecord) -> bool,
    ) -> Vec<Candidate<'a>> {
        let mut pool = self.candidates(app_id);
        // stable: equal version codes keep encounter order
        pool.sort_by(|a, b| b.record.version_code.cmp(&a.record.version_code));
        pool.truncate(retention.max(1));
        pool.retain(|c| eligible(c.record));
        pool
    }

    /// Selected app ids with the retention count that applies to each.
    ///
    /// An id selected by several sources keeps the largest of their counts.
    fn selected(&self, include: impl Fn(&RepositorySource) -> bool) -> BTreeMap<&'a str, usize> {
        let mut apps: BTreeMap<&str, usize> = BTreeMap::new();
        for (source, id) in self.all_apps(true) {
            if !include(source) {
                continue;
            }
            let retention = source.retention(self.settings);
            apps.entry(id)
                .and_modify(|r| *r = (*r).max(retention))
                .or_insert(retention);
        }
        apps
    }

    /// Verified download jobs for the retained packages of every selected app.
    ///
    /// Records without `apkName`, `hash` or `hashType` are not eligible.
    pub fn select_packages(&self, repo_dir: &Path) -> Vec<DownloadJob> {
        let mut jobs = Vec::new();
        for (app_id, retention) in self.selected(|_| true) {
            for c in self.ranked(app_id, retention, |r| {
                r.apk_name.is_some() && r.hash.is_some() && r.hash_type.is_some()
            }) {
                let (Some(url), Some(hash), Some(kind)) =
                    (&c.record.apk_name, &c.record.hash, &c.record.hash_type)
                else {
                    continue;
                };
                let algorithm = match kind.parse::<HashAlgorithm>() {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!("{url}: {e}");
                        continue;
                    }
                };
                jobs.extend(self.job(c.source, url, repo_dir, Some(ExpectedHash {
                    hash: hash.clone(),
                    algorithm,
                })));
            }
        }
        dedup_destinations(jobs)
    }

    /// Unverified jobs for the source archives of the retained packages.
    ///
    /// Only apps selected by a source with source downloads enabled count.
    pub fn select_sources(&self, repo_dir: &Path) -> Vec<DownloadJob> {
        let mut jobs = Vec::new();
        for (app_id, retention) in self.selected(|s| s.src_download(self.settings)) {
            for c in self.ranked(app_id, retention, |r| r.src_name.is_some()) {
                if let Some(url) = &c.record.src_name {
                    jobs.extend(self.job(c.source, url, repo_dir, None));
                }
            }
        }
        dedup_destinations(jobs)
    }

    /// Job storing `url` as `<repo_dir>/<basename>`; `None` if the URL has
    /// no usable file name.
    fn job(
        &self,
        source: &RepositorySource,
        url: &str,
        repo_dir: &Path,
        expected: Option<ExpectedHash>,
    ) -> Option<DownloadJob> {
        let Some(name) = safe_file_name(url) else {
            tracing::warn!("{}: no file name in {url}", source.url());
            return None;
        };
        Some(DownloadJob {
            url: url.to_string(),
            destination: repo_dir.join(name),
            timeout: self.settings.download_timeout,
            expected,
            scope: source.scope(),
        })
    }
}

/// Drop later jobs writing to a destination already claimed.
fn dedup_destinations(jobs: Vec<DownloadJob>) -> Vec<DownloadJob> {
    let mut seen = HashSet::new();
    jobs.into_iter()
        .filter(|j| seen.insert(j.destination.clone()))
        .collect()
}
