//! Widget configuration
//!
//! Values come from the environment (`NEARBY_MAPS_*`) or a TOML file. The API
//! key is checked when the script URL is built, before any load is attempted.

use crate::error::ConfigError;
use crate::loader::ScriptUrl;
use crate::types::Coordinate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the maps API key
pub const ENV_API_KEY: &str = "NEARBY_MAPS_API_KEY";
/// Environment variable overriding the script base URL
pub const ENV_SCRIPT_URL: &str = "NEARBY_MAPS_SCRIPT_URL";
/// Environment variable overriding the fetch timeout
pub const ENV_FETCH_TIMEOUT: &str = "NEARBY_MAPS_FETCH_TIMEOUT_SECS";

const DEFAULT_SCRIPT_BASE: &str = "https://maps.googleapis.com/maps/api/js";

/// Map UI controls shown by the SDK
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapControls {
    /// Map type switcher
    pub map_type: bool,
    /// Fullscreen button
    pub fullscreen: bool,
    /// Street view pegman
    pub street_view: bool,
}

/// Widget configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Maps API key
    pub api_key: Option<String>,
    /// Script endpoint without query string
    pub script_base_url: String,
    /// Global callback the script invokes once loaded
    pub callback_name: String,
    /// Script fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    /// Centre used until the current user has a position
    pub default_center: Coordinate,
    /// Initial zoom level
    pub zoom: u8,
    /// SDK controls
    pub controls: MapControls,
    /// Lifecycle trace capacity
    pub trace_capacity: usize,
}

impl WidgetConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With API key
    #[inline]
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// With fetch timeout, rounded up to whole seconds
    #[inline]
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self
    }

    /// Read configuration from the process environment
    ///
    /// # Errors
    /// - `ConfigError::InvalidValue` if the timeout is not a positive integer
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through a variable lookup function
    ///
    /// # Errors
    /// - `ConfigError::InvalidValue` if the timeout is not a positive integer
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.api_key = lookup(ENV_API_KEY);
        if let Some(base) = lookup(ENV_SCRIPT_URL) {
            config.script_base_url = base;
        }
        if let Some(raw) = lookup(ENV_FETCH_TIMEOUT) {
            config.fetch_timeout_secs =
                raw.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        field: "fetch_timeout_secs",
                        message: e.to_string(),
                    })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML
    ///
    /// # Errors
    /// - `ConfigError::Parse` on malformed TOML
    /// - `ConfigError::InvalidValue` on out-of-range values
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Unreadable` if the file cannot be read
    /// - see [`WidgetConfig::from_toml_str`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check field ranges
    ///
    /// # Errors
    /// - `ConfigError::InvalidValue` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fetch_timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        if !self.default_center.is_valid() {
            return Err(ConfigError::InvalidValue {
                field: "default_center",
                message: format!("{} is out of range", self.default_center),
            });
        }
        if self.zoom > 22 {
            return Err(ConfigError::InvalidValue {
                field: "zoom",
                message: format!("{} exceeds 22", self.zoom),
            });
        }
        Ok(())
    }

    /// Fetch timeout as a duration
    #[inline]
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Build the script URL carrying the API key
    ///
    /// # Errors
    /// - `ConfigError::MissingApiKey` if no non-blank key is configured
    /// - `ConfigError::InvalidApiKey` if the key is not URL-safe
    pub fn script_url(&self) -> Result<ScriptUrl, ConfigError> {
        let key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidApiKey);
        }

        Ok(ScriptUrl::new(format!(
            "{}?key={}&callback={}",
            self.script_base_url, key, self.callback_name
        )))
    }

    /// Copy with the API key masked, for display
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.api_key = copy.api_key.map(|_| "****".to_string());
        copy
    }
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            script_base_url: DEFAULT_SCRIPT_BASE.to_string(),
            callback_name: "initMap".to_string(),
            fetch_timeout_secs: 10,
            default_center: Coordinate::FALLBACK,
            zoom: 12,
            controls: MapControls::default(),
            trace_capacity: 256,
        }
    }
}
