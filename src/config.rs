use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use tracing::debug;

use crate::error::ConfigError;
use crate::hw::{
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_DELAY, DEFAULT_NOTIFICATION_TIMEOUT,
    DEFAULT_SCAN_ATTEMPTS, DEFAULT_SCAN_DELAY, DEFAULT_SCAN_WINDOW, LinkSettings, RetryPolicy,
};

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_FRIENDLY_NAME: &str = "am43blinds";

fn default_friendly_name() -> String {
    DEFAULT_FRIENDLY_NAME.to_string()
}

/// One configured cover.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoverConfig {
    mac: String,
    #[serde(default = "default_friendly_name")]
    friendly_name: String,
}

impl CoverConfig {
    #[must_use]
    pub fn new(mac: impl Into<String>, friendly_name: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            friendly_name: friendly_name.into(),
        }
    }

    #[must_use]
    pub fn mac(&self) -> &str {
        &self.mac
    }

    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }
}

/// Optional link timing overrides; unset values keep the built-in defaults.
#[serde_as]
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    connect_attempts: Option<u32>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    connect_delay: Option<humantime::Duration>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    notification_timeout: Option<humantime::Duration>,
    scan_attempts: Option<u32>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    scan_delay: Option<humantime::Duration>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    scan_window: Option<humantime::Duration>,
}

impl LinkConfig {
    /// Resolves the effective link settings.
    #[must_use]
    pub fn settings(&self) -> LinkSettings {
        let duration = |value: Option<humantime::Duration>, fallback: Duration| {
            value.map_or(fallback, Duration::from)
        };

        LinkSettings::builder()
            .connect_retry(RetryPolicy::new(
                self.connect_attempts.unwrap_or(DEFAULT_CONNECT_ATTEMPTS),
                duration(self.connect_delay, DEFAULT_CONNECT_DELAY),
            ))
            .scan_retry(RetryPolicy::new(
                self.scan_attempts.unwrap_or(DEFAULT_SCAN_ATTEMPTS),
                duration(self.scan_delay, DEFAULT_SCAN_DELAY),
            ))
            .scan_window(duration(self.scan_window, DEFAULT_SCAN_WINDOW))
            .notification_timeout(duration(
                self.notification_timeout,
                DEFAULT_NOTIFICATION_TIMEOUT,
            ))
            .build()
    }
}

/// Cover fleet configuration keyed by slug.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Am43Config {
    #[serde(default)]
    covers: BTreeMap<String, CoverConfig>,
    #[serde(default)]
    link: LinkConfig,
}

impl Am43Config {
    /// Parses and validates a JSON configuration document.
    ///
    /// ```
    /// let config = am43::Am43Config::from_json(
    ///     r#"{ "covers": { "office": { "mac": "02:00:00:00:00:01" } } }"#,
    /// )?;
    /// assert_eq!("am43blinds", config.cover("office")?.friendly_name());
    /// # Ok::<(), am43::ConfigError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the document is not valid JSON or fails
    /// validation.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading cover configuration");
        let document = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&document)
    }

    /// Returns the per-user default configuration path.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform has no home directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let project_dirs =
            ProjectDirs::from("", "", "am43").ok_or(ConfigError::NoConfigLocation)?;
        Ok(project_dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Builds a configuration from `slug=MAC` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error when a pair is malformed or no pair is given.
    pub fn from_inline<I, S>(covers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let config = Self::default().with_inline_covers(covers)?;
        config.validate()?;
        Ok(config)
    }

    /// Adds or replaces covers from `slug=MAC` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error when a pair is malformed.
    pub fn with_inline_covers<I, S>(mut self, covers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in covers {
            let value = value.as_ref();
            let Some((slug, mac)) = value.split_once('=') else {
                return Err(ConfigError::InvalidInlineCover {
                    value: value.to_string(),
                });
            };
            let (slug, mac) = (slug.trim(), mac.trim());
            if slug.is_empty() {
                return Err(ConfigError::InvalidInlineCover {
                    value: value.to_string(),
                });
            }
            self.covers
                .insert(slug.to_string(), CoverConfig::new(mac, DEFAULT_FRIENDLY_NAME));
        }
        Ok(self)
    }

    /// Checks that at least one cover is configured and every MAC is set.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.covers.is_empty() {
            return Err(ConfigError::NoCovers);
        }
        if let Some((slug, _)) = self
            .covers
            .iter()
            .find(|(_, cover)| cover.mac.trim().is_empty())
        {
            return Err(ConfigError::EmptyMac { slug: slug.clone() });
        }
        Ok(())
    }

    /// Looks up one cover by slug.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCover`] when the slug is not configured.
    pub fn cover(&self, slug: &str) -> Result<&CoverConfig, ConfigError> {
        self.covers
            .get(slug)
            .ok_or_else(|| ConfigError::UnknownCover {
                slug: slug.to_string(),
            })
    }

    /// Iterates over covers in slug order.
    pub fn covers(&self) -> impl Iterator<Item = (&str, &CoverConfig)> {
        self.covers
            .iter()
            .map(|(slug, cover)| (slug.as_str(), cover))
    }

    #[must_use]
    pub fn link(&self) -> &LinkConfig {
        &self.link
    }
}
