//! The `cadence.toml` run file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use llm::AnthropicConfig;
use pipeline::{RunConfig, StepCatalog};
use sources::SourcesConfig;

/// Environment variable holding the generation API key.
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Top-level run file. Every table is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceFile {
    /// Pipeline settings.
    pub run: RunConfig,
    /// Generation service settings.
    pub llm: AnthropicConfig,
    /// Upstream data providers.
    pub sources: SourcesConfig,
}

impl CadenceFile {
    /// Parses and validates a run file.
    pub fn parse(text: &str) -> Result<Self> {
        let file: Self = toml::from_str(text).context("run file is not valid TOML")?;
        file.run.validate(&StepCatalog::standard())?;
        Ok(file)
    }

    /// Reads, parses and validates the run file at `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("loading {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let file = CadenceFile::parse("").unwrap();
        assert_eq!(file, CadenceFile::default());
    }

    #[test]
    fn tables_override_defaults() {
        let file = CadenceFile::parse(
            r#"
            [run.calendar]
            duration_weeks = 6
            platforms = ["LinkedIn", "Newsletter"]

            [run.retry]
            max_retries = 1

            [llm]
            model = "claude-haiku-4-5"

            [sources]
            dir = "./upstream"
            keys = ["strategy", "keywords"]
            "#,
        )
        .unwrap();
        assert_eq!(file.run.calendar.duration_weeks, 6);
        assert_eq!(file.run.calendar.posts_per_week, 3);
        assert_eq!(file.run.retry.max_retries, 1);
        assert_eq!(file.llm.model, "claude-haiku-4-5");
        assert_eq!(file.sources.keys().len(), 2);
    }

    #[test]
    fn invalid_run_settings_are_rejected() {
        let err = CadenceFile::parse("[run.calendar]\nduration_weeks = 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("duration_weeks"));

        let err = CadenceFile::parse("[run.executor]\nfallback_allowed = true\n").unwrap_err();
        assert!(format!("{err:#}").contains("fallback"));
    }
}
