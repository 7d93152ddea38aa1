//! Error types for the map widget
//!
//! Provides the error taxonomy surfaced at the widget boundary:
//! - Configuration problems detected before any load attempt
//! - Script load failures and timeouts
//! - Map SDK failures during map or marker creation
//! - Out-of-order use of sessions and marker sets

use crate::types::{ContainerId, Coordinate, UserId};
use crate::widget::WidgetPhase;
use std::path::PathBuf;
use std::time::Duration;

/// Main widget error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum WidgetError {
    /// Required configuration is missing or malformed
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// External script could not be loaded
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// Mapping SDK failed to create the map or a marker
    #[error("init error: {0}")]
    Init(#[from] InitError),

    /// Operation invoked out of order
    #[error("precondition violated: {0}")]
    Precondition(#[from] PreconditionViolation),
}

impl WidgetError {
    /// Classification used by the errored presentation state
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Load(_) => ErrorKind::Load,
            Self::Init(_) => ErrorKind::Init,
            Self::Precondition(_) => ErrorKind::Precondition,
        }
    }

    /// Check if error is a configuration problem rather than a transient failure
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Check if error is retried automatically
    ///
    /// Always `false`: recovery is a manual deactivate/reactivate cycle.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Human-readable message for the errored view
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(e) => format!("Map is not configured: {e}"),
            Self::Load(e) => format!("Map failed to load: {e}"),
            Self::Init(e) => format!("Map could not be displayed: {e}"),
            Self::Precondition(e) => format!("Internal map error: {e}"),
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorKind {
    /// Configuration error
    Configuration,
    /// Script load error
    Load,
    /// Map SDK error
    Init,
    /// Programming error
    Precondition,
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// No API key configured
    #[error("maps API key is not configured")]
    MissingApiKey,

    /// API key contains characters that cannot be placed in the script URL
    #[error("maps API key contains invalid characters")]
    InvalidApiKey,

    /// Invalid value for a configuration field
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    /// Config file could not be read
    #[error("cannot read config file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    /// Config file could not be parsed
    #[error("invalid config: {0}")]
    Parse(String),
}

/// Script load errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// Fetch reported a failure
    #[error("network error: {reason}")]
    Network { reason: String },

    /// Fetch did not settle in time
    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    /// Loader went away before the fetch settled
    #[error("script load abandoned")]
    Abandoned,
}

/// Mapping SDK errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InitError {
    /// Coordinate outside the valid range or not finite
    #[error("malformed coordinate {coordinate} for {target}")]
    MalformedCoordinate { target: String, coordinate: Coordinate },

    /// Container element does not exist
    #[error("container not found: {0}")]
    ContainerMissing(ContainerId),

    /// Map creation failed inside the SDK
    #[error("map creation failed: {0}")]
    MapCreation(String),

    /// Marker operation failed inside the SDK
    #[error("marker for {user} failed: {message}")]
    Marker { user: UserId, message: String },
}

impl InitError {
    /// Create marker error
    pub fn marker(user: &UserId, message: impl Into<String>) -> Self {
        Self::Marker {
            user: user.clone(),
            message: message.into(),
        }
    }
}

/// Programming errors: operations invoked out of order
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PreconditionViolation {
    /// Phase change not permitted by the widget state machine
    #[error("illegal phase transition {from:?} -> {to:?}")]
    IllegalTransition { from: WidgetPhase, to: WidgetPhase },

    /// Container already bound to a live session
    #[error("container {0} already has a live session")]
    ContainerInUse(ContainerId),

    /// Marker set failed mid-sync and must be torn down
    #[error("marker set is poisoned: {0}")]
    PoisonedMarkerSet(String),
}

/// Errors reported by a [`crate::sdk::MapSdk`] implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdkError {
    /// Container element does not exist
    #[error("no such container")]
    NoContainer,

    /// Handle does not refer to a live object
    #[error("unknown handle {0}")]
    UnknownHandle(u64),

    /// Coordinate rejected
    #[error("invalid coordinate")]
    InvalidCoordinate,

    /// Any other SDK failure
    #[error("{0}")]
    Other(String),
}

/// Errors reported by a [`crate::loader::ScriptFetcher`] implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct FetchError {
    /// Human-readable reason
    pub reason: String,
}

impl FetchError {
    /// Create fetch error
    #[inline]
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
