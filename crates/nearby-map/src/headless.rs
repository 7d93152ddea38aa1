//! Headless backend
//!
//! In-memory implementations of [`MapSdk`] and [`ScriptFetcher`]. They
//! behave like a browser SDK as far as the widget can observe (unknown
//! containers, bad coordinates and stale handles are rejected) and add
//! click simulation, counters and failure injection.

use crate::error::{FetchError, SdkError};
use crate::loader::{ScriptFetcher, ScriptUrl};
use crate::sdk::{ClickListener, MapHandle, MapOptions, MapSdk, MarkerHandle, MarkerOptions};
use crate::types::{ContainerId, Coordinate, UserId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Maps created
    pub maps_created: usize,
    /// Maps destroyed
    pub maps_destroyed: usize,
    /// Markers created
    pub markers_created: usize,
    /// Markers updated in place
    pub markers_updated: usize,
    /// Markers destroyed
    pub markers_destroyed: usize,
    /// Click listeners attached
    pub listeners_attached: usize,
}

#[derive(Debug)]
struct MapRecord {
    container: ContainerId,
    center: Coordinate,
}

struct MarkerRecord {
    map: MapHandle,
    options: MarkerOptions,
    listeners: Vec<ClickListener>,
}

#[derive(Default)]
struct SdkState {
    containers: HashSet<ContainerId>,
    maps: HashMap<MapHandle, MapRecord>,
    markers: HashMap<MarkerHandle, MarkerRecord>,
    next_handle: u64,
    stats: HeadlessStats,
    fail_next_map: Option<String>,
    marker_budget: Option<usize>,
    init_gate: Option<Arc<Notify>>,
    initializing: usize,
}

impl SdkState {
    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// In-memory mapping SDK
#[derive(Default)]
pub struct HeadlessMapSdk {
    state: Mutex<SdkState>,
}

impl std::fmt::Debug for HeadlessMapSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HeadlessMapSdk")
            .field("maps", &state.maps.len())
            .field("markers", &state.markers.len())
            .field("stats", &state.stats)
            .finish()
    }
}

impl HeadlessMapSdk {
    /// Create new SDK with no containers
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a container element available
    pub fn add_container(&self, container: ContainerId) {
        self.state.lock().containers.insert(container);
    }

    /// Fail the next map creation with `reason`
    pub fn fail_next_map(&self, reason: impl Into<String>) {
        self.state.lock().fail_next_map = Some(reason.into());
    }

    /// Let `n` more marker creations succeed, then fail
    pub fn fail_markers_after(&self, n: usize) {
        self.state.lock().marker_budget = Some(n);
    }

    /// Hold map initialisation until the returned gate is notified
    #[must_use]
    pub fn hold_map_init(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().init_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Map creations currently waiting on the init gate
    #[inline]
    #[must_use]
    pub fn maps_initializing(&self) -> usize {
        self.state.lock().initializing
    }

    /// Complete every held map creation and stop holding new ones
    pub fn release_map_init(&self) {
        if let Some(gate) = self.state.lock().init_gate.take() {
            gate.notify_waiters();
        }
    }

    /// Counter snapshot
    #[inline]
    #[must_use]
    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats
    }

    /// Number of live maps
    #[inline]
    #[must_use]
    pub fn live_maps(&self) -> usize {
        self.state.lock().maps.len()
    }

    /// Centre of a live map
    #[must_use]
    pub fn map_center(&self, map: MapHandle) -> Option<Coordinate> {
        self.state.lock().maps.get(&map).map(|m| m.center)
    }

    /// Live map bound to a container
    #[must_use]
    pub fn map_in(&self, container: &ContainerId) -> Option<MapHandle> {
        self.state
            .lock()
            .maps
            .iter()
            .find(|(_, m)| &m.container == container)
            .map(|(handle, _)| *handle)
    }

    /// Number of live markers on a map
    #[must_use]
    pub fn live_markers(&self, map: MapHandle) -> usize {
        self.state
            .lock()
            .markers
            .values()
            .filter(|m| m.map == map)
            .count()
    }

    /// Options of every live marker on a map
    #[must_use]
    pub fn markers_on(&self, map: MapHandle) -> Vec<MarkerOptions> {
        let state = self.state.lock();
        let mut markers: Vec<(MarkerHandle, MarkerOptions)> = state
            .markers
            .iter()
            .filter(|(_, m)| m.map == map)
            .map(|(h, m)| (*h, m.options.clone()))
            .collect();
        markers.sort_by_key(|(h, _)| h.0);
        markers.into_iter().map(|(_, o)| o).collect()
    }

    /// Simulate a click; returns the number of listeners invoked
    pub fn click(&self, marker: MarkerHandle) -> usize {
        let listeners = match self.state.lock().markers.get(&marker) {
            Some(record) => record.listeners.clone(),
            None => return 0,
        };
        for listener in &listeners {
            listener();
        }
        listeners.len()
    }

    /// Simulate a click on the marker tagged `user` on `map`
    pub fn click_user(&self, map: MapHandle, user: &UserId) -> usize {
        let marker = self
            .state
            .lock()
            .markers
            .iter()
            .find(|(_, m)| m.map == map && &m.options.tag == user)
            .map(|(h, _)| *h);
        marker.map_or(0, |m| self.click(m))
    }
}

#[async_trait::async_trait]
impl MapSdk for HeadlessMapSdk {
    async fn create_map(
        &self,
        container: &ContainerId,
        options: &MapOptions,
    ) -> Result<MapHandle, SdkError> {
        let gate = {
            let mut state = self.state.lock();
            if !state.containers.contains(container) {
                return Err(SdkError::NoContainer);
            }
            if !options.center.is_valid() {
                return Err(SdkError::InvalidCoordinate);
            }
            if let Some(reason) = state.fail_next_map.take() {
                return Err(SdkError::Other(reason));
            }
            let gate = state.init_gate.clone();
            if gate.is_some() {
                state.initializing += 1;
            }
            gate
        };

        if let Some(gate) = gate {
            gate.notified().await;
            self.state.lock().initializing -= 1;
        }

        let mut state = self.state.lock();
        let handle = MapHandle(state.next());
        state.maps.insert(
            handle,
            MapRecord {
                container: container.clone(),
                center: options.center,
            },
        );
        state.stats.maps_created += 1;
        Ok(handle)
    }

    fn destroy_map(&self, map: MapHandle) -> Result<(), SdkError> {
        let mut state = self.state.lock();
        state
            .maps
            .remove(&map)
            .ok_or(SdkError::UnknownHandle(map.0))?;
        state.markers.retain(|_, m| m.map != map);
        state.stats.maps_destroyed += 1;
        Ok(())
    }

    fn set_center(&self, map: MapHandle, center: Coordinate) -> Result<(), SdkError> {
        if !center.is_valid() {
            return Err(SdkError::InvalidCoordinate);
        }
        let mut state = self.state.lock();
        let record = state
            .maps
            .get_mut(&map)
            .ok_or(SdkError::UnknownHandle(map.0))?;
        record.center = center;
        Ok(())
    }

    fn create_marker(
        &self,
        map: MapHandle,
        options: &MarkerOptions,
    ) -> Result<MarkerHandle, SdkError> {
        let mut state = self.state.lock();
        if !state.maps.contains_key(&map) {
            return Err(SdkError::UnknownHandle(map.0));
        }
        if !options.position.is_valid() {
            return Err(SdkError::InvalidCoordinate);
        }
        match state.marker_budget {
            Some(0) => return Err(SdkError::Other("marker quota exhausted".to_string())),
            Some(n) => state.marker_budget = Some(n - 1),
            None => {}
        }
        let handle = MarkerHandle(state.next());
        state.markers.insert(
            handle,
            MarkerRecord {
                map,
                options: options.clone(),
                listeners: Vec::new(),
            },
        );
        state.stats.markers_created += 1;
        Ok(handle)
    }

    fn update_marker(&self, marker: MarkerHandle, options: &MarkerOptions) -> Result<(), SdkError> {
        if !options.position.is_valid() {
            return Err(SdkError::InvalidCoordinate);
        }
        let mut state = self.state.lock();
        let record = state
            .markers
            .get_mut(&marker)
            .ok_or(SdkError::UnknownHandle(marker.0))?;
        record.options = options.clone();
        state.stats.markers_updated += 1;
        Ok(())
    }

    fn destroy_marker(&self, marker: MarkerHandle) -> Result<(), SdkError> {
        let mut state = self.state.lock();
        state
            .markers
            .remove(&marker)
            .ok_or(SdkError::UnknownHandle(marker.0))?;
        state.stats.markers_destroyed += 1;
        Ok(())
    }

    fn attach_click_listener(
        &self,
        marker: MarkerHandle,
        listener: ClickListener,
    ) -> Result<(), SdkError> {
        let mut state = self.state.lock();
        let record = state
            .markers
            .get_mut(&marker)
            .ok_or(SdkError::UnknownHandle(marker.0))?;
        record.listeners.push(listener);
        state.stats.listeners_attached += 1;
        Ok(())
    }
}

/// In-memory script fetcher
///
/// Records every inserted script and settles immediately.
#[derive(Debug, Default)]
pub struct HeadlessFetcher {
    inserted: Mutex<Vec<ScriptUrl>>,
    failure: Option<String>,
}

impl HeadlessFetcher {
    /// Create fetcher that always succeeds
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create fetcher that always fails with `reason`
    #[inline]
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            inserted: Mutex::new(Vec::new()),
            failure: Some(reason.into()),
        }
    }

    /// Scripts inserted so far
    #[must_use]
    pub fn inserted(&self) -> Vec<ScriptUrl> {
        self.inserted.lock().clone()
    }

    /// Number of scripts inserted so far
    #[inline]
    #[must_use]
    pub fn insert_count(&self) -> usize {
        self.inserted.lock().len()
    }
}

#[async_trait::async_trait]
impl ScriptFetcher for HeadlessFetcher {
    async fn fetch(&self, url: &ScriptUrl) -> Result<(), FetchError> {
        self.inserted.lock().push(url.clone());
        match &self.failure {
            Some(reason) => Err(FetchError::new(reason.clone())),
            None => Ok(()),
        }
    }
}
