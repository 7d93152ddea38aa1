//! Map session
//!
//! One live binding of a map instance to a container, together with the
//! markers rendered on it. Creating a session requires a [`ScriptReady`]
//! proof and an exclusive container lease; destroying it consumes the
//! session, so a destroyed handle cannot be used again.

use crate::error::{InitError, PreconditionViolation, SdkError, WidgetError};
use crate::loader::ScriptReady;
use crate::markers::{MarkerDiff, MarkerSet, SelectRouter};
use crate::sdk::{MapHandle, MapOptions, MapSdk};
use crate::types::{ContainerId, Coordinate, Roster, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Registry of containers bound to a live session
#[derive(Debug, Clone, Default)]
pub struct ContainerLeases {
    inner: Arc<DashMap<ContainerId, SessionId>>,
}

impl ContainerLeases {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a container for a session
    ///
    /// # Errors
    /// - `PreconditionViolation::ContainerInUse` if another session holds it
    pub fn claim(
        &self,
        container: &ContainerId,
        session: SessionId,
    ) -> Result<ContainerLease, PreconditionViolation> {
        match self.inner.entry(container.clone()) {
            Entry::Occupied(_) => Err(PreconditionViolation::ContainerInUse(container.clone())),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(ContainerLease {
                    leases: self.clone(),
                    container: container.clone(),
                    session,
                })
            }
        }
    }

    /// Session currently holding a container
    #[inline]
    #[must_use]
    pub fn holder(&self, container: &ContainerId) -> Option<SessionId> {
        self.inner.get(container).map(|entry| *entry.value())
    }

    /// Number of containers with a live session
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.inner.len()
    }
}

/// Exclusive claim on a container, released on drop
#[derive(Debug)]
pub struct ContainerLease {
    leases: ContainerLeases,
    container: ContainerId,
    session: SessionId,
}

impl Drop for ContainerLease {
    fn drop(&mut self) {
        let session = self.session;
        self.leases
            .inner
            .remove_if(&self.container, |_, holder| *holder == session);
    }
}

/// Live map bound to a container
pub struct MapSession {
    id: SessionId,
    sdk: Arc<dyn MapSdk>,
    map: MapHandle,
    container: ContainerId,
    center: Coordinate,
    markers: MarkerSet,
    lease: Option<ContainerLease>,
}

impl fmt::Debug for MapSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapSession")
            .field("id", &self.id)
            .field("map", &self.map)
            .field("container", &self.container)
            .field("center", &self.center)
            .field("markers", &self.markers.len())
            .finish_non_exhaustive()
    }
}

impl MapSession {
    /// Create a map in `container`
    ///
    /// Resolves once the SDK reports the map initialised. The container is
    /// claimed only after that, so a pending init never blocks another
    /// session; if the container was claimed in the meantime, the new map is
    /// destroyed again.
    ///
    /// # Errors
    /// - `PreconditionViolation::ContainerInUse` if the container has a live session
    /// - `InitError::MalformedCoordinate` for an invalid centre
    /// - `InitError::ContainerMissing` / `InitError::MapCreation` on SDK failure
    pub async fn create(
        sdk: Arc<dyn MapSdk>,
        leases: &ContainerLeases,
        ready: &ScriptReady,
        container: ContainerId,
        options: MapOptions,
    ) -> Result<Self, WidgetError> {
        if !options.center.is_valid() {
            return Err(InitError::MalformedCoordinate {
                target: "map centre".to_string(),
                coordinate: options.center,
            }
            .into());
        }

        if leases.holder(&container).is_some() {
            return Err(PreconditionViolation::ContainerInUse(container).into());
        }

        let id = SessionId::new();
        tracing::debug!("Creating map in {} (script {})", container, ready.url());
        let map = sdk
            .create_map(&container, &options)
            .await
            .map_err(|e| match e {
                SdkError::NoContainer => InitError::ContainerMissing(container.clone()),
                other => InitError::MapCreation(other.to_string()),
            })?;

        let lease = match leases.claim(&container, id) {
            Ok(lease) => lease,
            Err(e) => {
                tracing::debug!("Container {} claimed during init, dropping map", container);
                if let Err(err) = sdk.destroy_map(map) {
                    tracing::warn!("Failed to destroy unclaimed map in {}: {}", container, err);
                }
                return Err(e.into());
            }
        };

        tracing::info!("Session {} created in {} at {}", id, container, options.center);
        Ok(Self {
            id,
            sdk,
            map,
            container,
            center: options.center,
            markers: MarkerSet::new(),
            lease: Some(lease),
        })
    }

    /// Session ID
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Container the map is bound to
    #[inline]
    #[must_use]
    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    /// Current map centre
    #[inline]
    #[must_use]
    pub fn center(&self) -> Coordinate {
        self.center
    }

    /// SDK handle of the map
    #[inline]
    #[must_use]
    pub fn map_handle(&self) -> MapHandle {
        self.map
    }

    /// Rendered markers
    #[inline]
    #[must_use]
    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Move the map centre
    ///
    /// # Errors
    /// - `InitError::MalformedCoordinate` for an invalid centre
    /// - `InitError::MapCreation` if the SDK rejects the move
    pub fn recenter(&mut self, center: Coordinate) -> Result<(), WidgetError> {
        if !center.is_valid() {
            return Err(InitError::MalformedCoordinate {
                target: "map centre".to_string(),
                coordinate: center,
            }
            .into());
        }
        self.sdk
            .set_center(self.map, center)
            .map_err(|e| InitError::MapCreation(e.to_string()))?;
        self.center = center;
        Ok(())
    }

    /// Reconcile markers with a roster
    ///
    /// # Errors
    /// See [`MarkerSet::sync`].
    pub fn sync(
        &mut self,
        roster: &Roster,
        router: &SelectRouter,
    ) -> Result<MarkerDiff, WidgetError> {
        self.markers.sync(self.sdk.as_ref(), self.map, roster, router)
    }

    /// Release markers, detach the map and free the container
    ///
    /// Returns the number of markers released.
    pub fn destroy(mut self) -> usize {
        self.teardown()
    }

    fn teardown(&mut self) -> usize {
        let Some(lease) = self.lease.take() else {
            return 0;
        };
        let released = self.markers.clear(self.sdk.as_ref());
        if let Err(e) = self.sdk.destroy_map(self.map) {
            tracing::warn!("Failed to destroy map for session {}: {}", self.id, e);
        }
        drop(lease);
        tracing::info!("Session {} destroyed ({} markers)", self.id, released);
        released
    }
}

impl Drop for MapSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapControls;
    use crate::headless::{HeadlessFetcher, HeadlessMapSdk};
    use crate::loader::{ScriptLoader, ScriptUrl};
    use crate::types::User;
    use std::time::Duration;

    async fn ready() -> ScriptReady {
        let loader = ScriptLoader::new(Arc::new(HeadlessFetcher::new()), Duration::from_secs(10));
        loader
            .ensure_loaded(&ScriptUrl::new("https://maps.example/js?key=k"))
            .await
            .unwrap()
    }

    fn options(center: Coordinate) -> MapOptions {
        MapOptions {
            center,
            zoom: 12,
            controls: MapControls::default(),
        }
    }

    fn sdk_with(container: &str) -> Arc<HeadlessMapSdk> {
        let sdk = Arc::new(HeadlessMapSdk::new());
        sdk.add_container(ContainerId::new(container));
        sdk
    }

    #[tokio::test]
    async fn one_live_session_per_container() {
        let sdk = sdk_with("map");
        let leases = ContainerLeases::new();
        let ready = ready().await;

        let first = MapSession::create(
            sdk.clone(),
            &leases,
            &ready,
            ContainerId::new("map"),
            options(Coordinate::FALLBACK),
        )
        .await
        .unwrap();
        assert_eq!(leases.holder(&ContainerId::new("map")), Some(first.id()));

        let second = MapSession::create(
            sdk.clone(),
            &leases,
            &ready,
            ContainerId::new("map"),
            options(Coordinate::FALLBACK),
        )
        .await;
        assert!(matches!(
            second,
            Err(WidgetError::Precondition(PreconditionViolation::ContainerInUse(_)))
        ));

        first.destroy();
        assert_eq!(leases.live_count(), 0);

        let third = MapSession::create(
            sdk.clone(),
            &leases,
            &ready,
            ContainerId::new("map"),
            options(Coordinate::FALLBACK),
        )
        .await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn missing_container_releases_lease() {
        let sdk = Arc::new(HeadlessMapSdk::new());
        let leases = ContainerLeases::new();
        let ready = ready().await;

        let err = MapSession::create(
            sdk,
            &leases,
            &ready,
            ContainerId::new("nowhere"),
            options(Coordinate::FALLBACK),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WidgetError::Init(InitError::ContainerMissing(_))));
        assert_eq!(leases.live_count(), 0);
    }

    #[tokio::test]
    async fn pending_init_does_not_hold_container() {
        let sdk = sdk_with("map");
        let leases = ContainerLeases::new();
        let ready = ready().await;
        let _gate = sdk.hold_map_init();

        let (session, ()) = tokio::join!(
            MapSession::create(
                sdk.clone(),
                &leases,
                &ready,
                ContainerId::new("map"),
                options(Coordinate::FALLBACK),
            ),
            async {
                while sdk.maps_initializing() == 0 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(leases.live_count(), 0);
                sdk.release_map_init();
            }
        );

        let session = session.unwrap();
        assert_eq!(leases.holder(&ContainerId::new("map")), Some(session.id()));
    }

    #[tokio::test]
    async fn container_claimed_during_init_destroys_new_map() {
        let sdk = sdk_with("map");
        let leases = ContainerLeases::new();
        let ready = ready().await;
        let _gate = sdk.hold_map_init();
        let other = SessionId::new();

        let (result, lease) = tokio::join!(
            MapSession::create(
                sdk.clone(),
                &leases,
                &ready,
                ContainerId::new("map"),
                options(Coordinate::FALLBACK),
            ),
            async {
                while sdk.maps_initializing() == 0 {
                    tokio::task::yield_now().await;
                }
                let lease = leases.claim(&ContainerId::new("map"), other).unwrap();
                sdk.release_map_init();
                lease
            }
        );

        assert!(matches!(
            result,
            Err(WidgetError::Precondition(PreconditionViolation::ContainerInUse(_)))
        ));
        let stats = sdk.stats();
        assert_eq!(stats.maps_created, 1);
        assert_eq!(stats.maps_destroyed, 1);
        assert_eq!(sdk.live_maps(), 0);
        assert_eq!(leases.holder(&ContainerId::new("map")), Some(other));
        drop(lease);
        assert_eq!(leases.live_count(), 0);
    }

    #[tokio::test]
    async fn destroy_releases_markers_and_map() {
        let sdk = sdk_with("map");
        let leases = ContainerLeases::new();
        let ready = ready().await;
        let mut session = MapSession::create(
            sdk.clone(),
            &leases,
            &ready,
            ContainerId::new("map"),
            options(Coordinate::new(37.77, -122.41)),
        )
        .await
        .unwrap();

        let roster = Roster::new(
            vec![User::new("u2", "B").at(37.8, -122.42)],
            Some(User::new("u1", "Me").at(37.77, -122.41)),
        );
        session.sync(&roster, &SelectRouter::new()).unwrap();
        let map = session.map_handle();
        assert_eq!(sdk.live_markers(map), 2);

        assert_eq!(session.destroy(), 2);
        assert_eq!(sdk.live_markers(map), 0);
        assert_eq!(sdk.stats().maps_destroyed, 1);
    }

    #[tokio::test]
    async fn drop_tears_down() {
        let sdk = sdk_with("map");
        let leases = ContainerLeases::new();
        let ready = ready().await;
        {
            let _session = MapSession::create(
                sdk.clone(),
                &leases,
                &ready,
                ContainerId::new("map"),
                options(Coordinate::FALLBACK),
            )
            .await
            .unwrap();
        }
        assert_eq!(sdk.stats().maps_destroyed, 1);
        assert_eq!(leases.live_count(), 0);
    }

    #[tokio::test]
    async fn recenter_validates() {
        let sdk = sdk_with("map");
        let leases = ContainerLeases::new();
        let ready = ready().await;
        let mut session = MapSession::create(
            sdk.clone(),
            &leases,
            &ready,
            ContainerId::new("map"),
            options(Coordinate::FALLBACK),
        )
        .await
        .unwrap();

        session.recenter(Coordinate::new(40.0, -74.0)).unwrap();
        assert_eq!(session.center(), Coordinate::new(40.0, -74.0));
        assert_eq!(
            sdk.map_center(session.map_handle()),
            Some(Coordinate::new(40.0, -74.0))
        );

        assert!(session.recenter(Coordinate::new(f64::NAN, 0.0)).is_err());
        assert_eq!(session.center(), Coordinate::new(40.0, -74.0));
    }
}
