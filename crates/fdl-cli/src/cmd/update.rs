//! Update command

use anyhow::{Context, Result};
use fdl_core::{ConfigStore, Layout, Mirror, PhaseSummary, Settings};

use crate::Phase;

/// Run `phases` in order against the configuration at `layout.config_file`.
///
/// The configuration is saved afterwards even if a phase fails, so fetched
/// fingerprints and error records survive.
pub async fn update(layout: Layout, settings: Settings, phases: &[Phase]) -> Result<Vec<PhaseSummary>> {
    layout
        .prepare()
        .context("Failed to create mirror directories")?;
    let mut config = ConfigStore::open(&layout.config_file)
        .with_context(|| format!("Failed to load {}", layout.config_file.display()))?;
    tracing::debug!(
        "{} repositories configured in {}",
        config.sources().len(),
        config.path().display()
    );

    let mirror = Mirror::new(layout, settings)?;
    let result = run(&mirror, &mut config, phases).await;
    let saved = config.close().context("Failed to save configuration");
    let summaries = result?;
    saved?;
    Ok(summaries)
}

async fn run(mirror: &Mirror, config: &mut ConfigStore, phases: &[Phase]) -> Result<Vec<PhaseSummary>> {
    let mut summaries = Vec::with_capacity(phases.len());
    for phase in phases {
        let summary = match phase {
            Phase::Index => mirror.update_index(config).await,
            Phase::Metadata => mirror
                .update_metadata(config)
                .await
                .context("Metadata update failed")?,
            Phase::Apk => mirror.update_apk(config).await,
            Phase::Src => mirror.update_src(config).await,
        };
        summaries.push(summary);
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_run_saves_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout {
            config_file: tmp.path().join("fdroid-dl.json"),
            repo_dir: tmp.path().join("repo"),
            metadata_dir: tmp.path().join("metadata"),
            cache_dir: tmp.path().join(".cache"),
        };
        std::fs::write(
            &layout.config_file,
            r#"{"f-droid": {"http://127.0.0.1:1/repo": {"apps": ["*"]}}, "metadata": {}}"#,
        )
        .unwrap();

        let summaries = update(layout.clone(), Settings::default(), &[Phase::Index, Phase::Apk])
            .await
            .unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].counts.failed, 1);
        assert_eq!(summaries[1].counts.ok, 0);

        let saved = std::fs::read_to_string(&layout.config_file).unwrap();
        assert!(saved.contains("\"code\": 600"), "{saved}");
        assert!(layout.staging_dir().is_dir());
    }
}
