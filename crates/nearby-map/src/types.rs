//! Core types for the map widget
//!
//! Defines the values the widget reads but never mutates:
//! - User identities and coordinates
//! - Roster snapshots supplied by the host
//! - Container and session identifiers

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque, stable user identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create new user identity
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for UserId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Geographic coordinate in floating-point degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude, -90 to 90
    pub lat: f64,
    /// Longitude, -180 to 180
    pub lng: f64,
}

impl Coordinate {
    /// Fallback map centre used before the current user has a position fix
    pub const FALLBACK: Coordinate = Coordinate {
        lat: 37.7749,
        lng: -122.4194,
    };

    /// Create new coordinate (unchecked)
    #[inline]
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check that both components are finite and in range
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lat, self.lng)
    }
}

/// A user as supplied by the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Stable identity
    pub id: UserId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Last known position, `None` before the first fix
    #[serde(default)]
    pub location: Option<Coordinate>,
}

impl User {
    /// Create new user without a position
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: None,
        }
    }

    /// With a known position
    #[inline]
    #[must_use]
    pub fn at(mut self, lat: f64, lng: f64) -> Self {
        self.location = Some(Coordinate::new(lat, lng));
        self
    }
}

/// Snapshot of users to display plus the distinguished self user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    /// Active users, in host order
    pub users: Vec<User>,
    /// The local operator, if known
    pub self_user: Option<User>,
}

impl Roster {
    /// Create new roster
    #[inline]
    #[must_use]
    pub fn new(users: Vec<User>, self_user: Option<User>) -> Self {
        Self { users, self_user }
    }

    /// Identity of the self user
    #[inline]
    #[must_use]
    pub fn self_id(&self) -> Option<&UserId> {
        self.self_user.as_ref().map(|u| &u.id)
    }
}

/// Identifier of a host element a map can be bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Create new container identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique session identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Generate new session ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_validity() {
        assert!(Coordinate::FALLBACK.is_valid());
        assert!(Coordinate::new(90.0, -180.0).is_valid());
        assert!(!Coordinate::new(90.5, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, 181.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn user_deserializes_without_location() {
        let user: User = serde_json::from_str(r#"{"id":"u7","name":"Ada"}"#).unwrap();
        assert_eq!(user.id.as_str(), "u7");
        assert!(user.location.is_none());

        let located: User =
            serde_json::from_str(r#"{"id":"u8","location":{"lat":1.5,"lng":2.5}}"#).unwrap();
        assert_eq!(located.location, Some(Coordinate::new(1.5, 2.5)));
        assert_eq!(located.name, "");
    }

    #[test]
    fn roster_self_id() {
        let roster = Roster::new(vec![], Some(User::new("me", "Me")));
        assert_eq!(roster.self_id(), Some(&UserId::new("me")));
        assert!(Roster::default().self_id().is_none());
    }
}
