//! Mapping SDK capability interface
//!
//! The widget never reaches for SDK objects directly. Everything it needs
//! from a mapping library goes through [`MapSdk`], so the session and marker
//! logic run unchanged against the browser SDK or the headless backend.

use crate::config::MapControls;
use crate::error::SdkError;
use crate::types::{ContainerId, Coordinate, UserId};
use std::sync::Arc;

/// Handle to a live map instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapHandle(pub u64);

/// Handle to a live marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerHandle(pub u64);

/// Options for map creation
#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    /// Initial centre
    pub center: Coordinate,
    /// Initial zoom level
    pub zoom: u8,
    /// Visible controls
    pub controls: MapControls,
}

/// Visual marker style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum MarkerStyle {
    /// The local operator
    SelfUser,
    /// Any other active user
    Other,
}

impl MarkerStyle {
    /// Icon override, `None` for the SDK default pin
    #[inline]
    #[must_use]
    pub fn icon(self) -> Option<&'static str> {
        match self {
            Self::SelfUser => Some("https://maps.google.com/mapfiles/ms/icons/blue-dot.png"),
            Self::Other => None,
        }
    }
}

/// Options for marker creation and in-place update
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerOptions {
    /// Identity the marker represents
    pub tag: UserId,
    /// Position
    pub position: Coordinate,
    /// Hover title
    pub title: String,
    /// Style
    pub style: MarkerStyle,
}

/// Click listener attached to a marker
pub type ClickListener = Arc<dyn Fn() + Send + Sync>;

/// Capabilities the widget needs from a mapping library
#[async_trait::async_trait]
pub trait MapSdk: Send + Sync {
    /// Create a map bound to a container; resolves when the SDK finishes init
    async fn create_map(
        &self,
        container: &ContainerId,
        options: &MapOptions,
    ) -> Result<MapHandle, SdkError>;

    /// Detach a map from its container
    fn destroy_map(&self, map: MapHandle) -> Result<(), SdkError>;

    /// Move the map centre
    fn set_center(&self, map: MapHandle, center: Coordinate) -> Result<(), SdkError>;

    /// Create a marker on a map
    fn create_marker(&self, map: MapHandle, options: &MarkerOptions)
        -> Result<MarkerHandle, SdkError>;

    /// Update a marker in place
    fn update_marker(&self, marker: MarkerHandle, options: &MarkerOptions) -> Result<(), SdkError>;

    /// Remove a marker
    fn destroy_marker(&self, marker: MarkerHandle) -> Result<(), SdkError>;

    /// Attach a click listener to a marker
    fn attach_click_listener(
        &self,
        marker: MarkerHandle,
        listener: ClickListener,
    ) -> Result<(), SdkError>;
}
