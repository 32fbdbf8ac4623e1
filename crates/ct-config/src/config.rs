//! Configuration loading and conversion.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ct_core::time::duration_from_days;
use ct_core::{CategorySets, ColumnNames, ConfigurationError, TransformConfig};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Survey transform configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Input column names. Default: `Site`, `DateTime`, `Species`.
    pub columns: ColumnNames,

    /// Species that open a survey.
    pub primary: Vec<String>,

    /// Species recorded as events.
    pub secondary: Vec<String>,

    /// Species that censor a survey. Default: every observed species that
    /// is neither primary nor secondary.
    pub tertiary: Option<Vec<String>>,

    /// Administrative cap on survey length, in days. Default: 30.
    pub survey_duration_days: f64,

    /// Study end date (RFC 3339). Default: the latest detection.
    pub survey_end_date: Option<DateTime<Utc>>,

    /// Reject tables whose site rows are interleaved. Default: false.
    pub require_grouped_sites: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            columns: ColumnNames::default(),
            primary: Vec::new(),
            secondary: Vec::new(),
            tertiary: None,
            survey_duration_days: 30.0,
            survey_end_date: None,
            require_grouped_sites: false,
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources win: defaults, the user config file, `config_path`,
    /// then `CT_*` environment variables (`__` separates nested keys).
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("CT_").split("__"));

        let config: Self = figment.extract()?;
        tracing::debug!(?config, "loaded configuration");
        Ok(config)
    }

    /// Converts into a validated [`TransformConfig`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a non-positive, NaN or
    /// unrepresentable duration, blank species labels, an empty primary
    /// set and overlapping category sets.
    pub fn to_transform_config(&self) -> Result<TransformConfig, ConfigurationError> {
        let days = self.survey_duration_days;
        if days.is_nan() || days <= 0.0 {
            return Err(ConfigurationError::NonPositiveDuration {
                value: days.to_string(),
            });
        }
        let survey_duration =
            duration_from_days(days).ok_or_else(|| ConfigurationError::DurationOutOfRange {
                value: days.to_string(),
            })?;

        let categories = CategorySets::from_labels(
            self.primary.iter().cloned(),
            self.secondary.iter().cloned(),
            self.tertiary.clone(),
        )?;

        let mut config = TransformConfig::new(categories, survey_duration)
            .with_columns(self.columns.clone());
        config.survey_end_date = self.survey_end_date;
        config.require_grouped_sites = self.require_grouped_sites;
        config.validate()?;
        Ok(config)
    }
}

/// Returns the platform-specific config directory for ct.
///
/// On Linux: `~/.config/ct`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ct"))
}
