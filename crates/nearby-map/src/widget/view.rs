use crate::error::ErrorKind;
use crate::markers::MarkerSnapshot;
use crate::types::{Coordinate, User};
use serde::Serialize;

/// Inbound props, replaced wholesale by the host on every change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidgetProps {
    /// The local operator; `None` before login
    pub current_user: Option<User>,
    /// Users to display
    pub active_users: Vec<User>,
    /// Visibility gate
    pub is_active: bool,
}

impl WidgetProps {
    /// Create active props
    #[inline]
    #[must_use]
    pub fn active(current_user: Option<User>, active_users: Vec<User>) -> Self {
        Self {
            current_user,
            active_users,
            is_active: true,
        }
    }

    /// With the gate set to `is_active`
    #[inline]
    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Position of the current user, if known
    #[inline]
    #[must_use]
    pub fn self_location(&self) -> Option<Coordinate> {
        self.current_user.as_ref().and_then(|u| u.location)
    }
}

/// Presentation state of the widget
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WidgetView {
    /// Gate off
    Hidden,
    /// Loading placeholder
    Loading,
    /// Live map
    Map {
        /// Map centre
        center: Coordinate,
        /// Rendered markers
        markers: Vec<MarkerSnapshot>,
    },
    /// Error banner
    Errored {
        /// Classification, configuration errors shown distinctly
        kind: ErrorKind,
        /// Human-readable message
        message: String,
    },
}

impl WidgetView {
    /// Check if a live map is shown
    #[inline]
    #[must_use]
    pub fn is_map(&self) -> bool {
        matches!(self, Self::Map { .. })
    }
}
