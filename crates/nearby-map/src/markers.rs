//! Marker set synchronizer
//!
//! Reconciles the rendered markers of one map against a roster snapshot:
//! - One marker per identity, self always included when it has a position
//! - Diff by identity: create, destroy, or update in place
//! - Other-markers route clicks to the host; the self-marker is inert
//!
//! All coordinates are validated before the first SDK call. An SDK failure
//! after that point poisons the set; it must be torn down with its session.

use crate::error::{InitError, PreconditionViolation, WidgetError};
use crate::sdk::{ClickListener, MapHandle, MapSdk, MarkerHandle, MarkerOptions, MarkerStyle};
use crate::trace::{LifecycleEventKind, LifecycleTrace};
use crate::types::{Coordinate, Roster, UserId};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Host callback invoked with the identity of a selected user
pub type SelectCallback = Arc<dyn Fn(&UserId) + Send + Sync>;

#[derive(Default)]
struct RouterState {
    self_id: Option<UserId>,
    callback: Option<SelectCallback>,
}

/// Routes marker clicks to the current host callback
///
/// Listeners hold a clone of the router, so replacing the callback or the
/// self identity takes effect for markers that already exist.
#[derive(Clone, Default)]
pub struct SelectRouter {
    inner: Arc<RwLock<RouterState>>,
    trace: Option<LifecycleTrace>,
}

impl fmt::Debug for SelectRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read();
        f.debug_struct("SelectRouter")
            .field("self_id", &state.self_id)
            .field("has_callback", &state.callback.is_some())
            .finish()
    }
}

impl SelectRouter {
    /// Create new router
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a trace receiving click events
    #[inline]
    #[must_use]
    pub fn with_trace(mut self, trace: LifecycleTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Replace the host callback
    pub fn set_callback(&self, callback: Option<SelectCallback>) {
        self.inner.write().callback = callback;
    }

    /// Replace the self identity
    pub fn set_self(&self, self_id: Option<UserId>) {
        self.inner.write().self_id = self_id;
    }

    /// Deliver a click on the marker for `id`
    ///
    /// Returns `true` if the host callback was invoked.
    pub fn dispatch(&self, id: &UserId) -> bool {
        let (is_self, callback) = {
            let state = self.inner.read();
            (state.self_id.as_ref() == Some(id), state.callback.clone())
        };

        if is_self {
            tracing::debug!("Ignored click on self marker {}", id);
            if let Some(trace) = &self.trace {
                trace.record(LifecycleEventKind::SelfClickIgnored);
            }
            return false;
        }

        match callback {
            Some(callback) => {
                tracing::info!("User selected: {}", id);
                if let Some(trace) = &self.trace {
                    trace.record(LifecycleEventKind::UserSelected { user: id.clone() });
                }
                callback(id);
                true
            }
            None => false,
        }
    }

    fn listener_for(&self, id: &UserId) -> ClickListener {
        let router = self.clone();
        let id = id.clone();
        Arc::new(move || {
            router.dispatch(&id);
        })
    }
}

/// Outcome of one sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerDiff {
    /// Markers created
    pub added: Vec<UserId>,
    /// Markers destroyed
    pub removed: Vec<UserId>,
    /// Markers updated in place
    pub updated: Vec<UserId>,
    /// Markers left untouched
    pub unchanged: usize,
}

impl MarkerDiff {
    /// Check if the sync changed nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Read-only view of a rendered marker
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MarkerSnapshot {
    /// Identity
    pub user: UserId,
    /// Position
    pub position: Coordinate,
    /// Title
    pub title: String,
    /// Style
    pub style: MarkerStyle,
}

#[derive(Debug)]
struct RenderedMarker {
    handle: MarkerHandle,
    options: MarkerOptions,
    listening: bool,
}

/// Compute the target marker set for a roster
///
/// Duplicates keep their first occurrence. The self user's own record wins
/// over a roster entry with the same identity and is appended when absent.
/// Users without a position are skipped.
#[must_use]
pub fn plan_markers(roster: &Roster) -> IndexMap<UserId, MarkerOptions> {
    let self_user = roster.self_user.as_ref();
    let mut target = IndexMap::with_capacity(roster.users.len() + 1);

    for user in &roster.users {
        if target.contains_key(&user.id) {
            continue;
        }
        let options = match self_user {
            Some(me) if me.id == user.id => me.location.or(user.location).map(|position| {
                MarkerOptions {
                    tag: me.id.clone(),
                    position,
                    title: self_title(&me.name),
                    style: MarkerStyle::SelfUser,
                }
            }),
            _ => user.location.map(|position| MarkerOptions {
                tag: user.id.clone(),
                position,
                title: if user.name.is_empty() {
                    user.id.to_string()
                } else {
                    user.name.clone()
                },
                style: MarkerStyle::Other,
            }),
        };
        if let Some(options) = options {
            target.insert(user.id.clone(), options);
        }
    }

    if let Some(me) = self_user {
        if !target.contains_key(&me.id) {
            if let Some(position) = me.location {
                target.insert(
                    me.id.clone(),
                    MarkerOptions {
                        tag: me.id.clone(),
                        position,
                        title: self_title(&me.name),
                        style: MarkerStyle::SelfUser,
                    },
                );
            }
        }
    }

    target
}

fn self_title(name: &str) -> String {
    if name.is_empty() {
        "You".to_string()
    } else {
        name.to_string()
    }
}

/// Markers rendered on one map
#[derive(Debug, Default)]
pub struct MarkerSet {
    markers: IndexMap<UserId, RenderedMarker>,
    poisoned: Option<String>,
}

impl MarkerSet {
    /// Create new empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rendered markers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Check if no markers are rendered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Check if a previous sync failed mid-diff
    #[inline]
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Rendered identities, in render order
    pub fn identities(&self) -> impl Iterator<Item = &UserId> {
        self.markers.keys()
    }

    /// Snapshot of the rendered markers
    #[must_use]
    pub fn snapshot(&self) -> Vec<MarkerSnapshot> {
        self.markers
            .iter()
            .map(|(user, m)| MarkerSnapshot {
                user: user.clone(),
                position: m.options.position,
                title: m.options.title.clone(),
                style: m.options.style,
            })
            .collect()
    }

    /// SDK handle of the marker for `user`
    #[inline]
    #[must_use]
    pub fn handle_of(&self, user: &UserId) -> Option<MarkerHandle> {
        self.markers.get(user).map(|m| m.handle)
    }

    /// Reconcile rendered markers with a roster
    ///
    /// # Errors
    /// - `InitError::MalformedCoordinate` before any change is made
    /// - `InitError::Marker` if the SDK fails mid-diff (the set is poisoned)
    /// - `PreconditionViolation::PoisonedMarkerSet` after an earlier failure
    pub fn sync(
        &mut self,
        sdk: &dyn MapSdk,
        map: MapHandle,
        roster: &Roster,
        router: &SelectRouter,
    ) -> Result<MarkerDiff, WidgetError> {
        if let Some(reason) = &self.poisoned {
            return Err(PreconditionViolation::PoisonedMarkerSet(reason.clone()).into());
        }

        let target = plan_markers(roster);
        if let Some(bad) = target.values().find(|o| !o.position.is_valid()) {
            return Err(InitError::MalformedCoordinate {
                target: bad.tag.to_string(),
                coordinate: bad.position,
            }
            .into());
        }

        router.set_self(roster.self_id().cloned());

        let mut diff = MarkerDiff::default();
        if let Err(e) = self.apply(sdk, map, &target, router, &mut diff) {
            tracing::error!("Marker sync failed mid-diff: {}", e);
            self.poisoned = Some(e.to_string());
            return Err(e.into());
        }

        // Keep render order aligned with the roster
        self.markers.sort_by(|a, _, b, _| {
            let rank = |id: &UserId| target.get_index_of(id).unwrap_or(usize::MAX);
            rank(a).cmp(&rank(b))
        });

        tracing::debug!(
            "Markers synced: +{} -{} ~{} ={}",
            diff.added.len(),
            diff.removed.len(),
            diff.updated.len(),
            diff.unchanged
        );
        Ok(diff)
    }

    fn apply(
        &mut self,
        sdk: &dyn MapSdk,
        map: MapHandle,
        target: &IndexMap<UserId, MarkerOptions>,
        router: &SelectRouter,
        diff: &mut MarkerDiff,
    ) -> Result<(), InitError> {
        let stale: Vec<UserId> = self
            .markers
            .keys()
            .filter(|id| !target.contains_key(*id))
            .cloned()
            .collect();

        for id in stale {
            if let Some(marker) = self.markers.get(&id) {
                sdk.destroy_marker(marker.handle)
                    .map_err(|e| InitError::marker(&id, e.to_string()))?;
            }
            self.markers.shift_remove(&id);
            diff.removed.push(id);
        }

        for (id, options) in target {
            match self.markers.get_mut(id) {
                Some(marker) if marker.options == *options => diff.unchanged += 1,
                Some(marker) => {
                    sdk.update_marker(marker.handle, options)
                        .map_err(|e| InitError::marker(id, e.to_string()))?;
                    marker.options = options.clone();
                    if options.style == MarkerStyle::Other && !marker.listening {
                        sdk.attach_click_listener(marker.handle, router.listener_for(id))
                            .map_err(|e| InitError::marker(id, e.to_string()))?;
                        marker.listening = true;
                    }
                    diff.updated.push(id.clone());
                }
                None => {
                    let handle = sdk
                        .create_marker(map, options)
                        .map_err(|e| InitError::marker(id, e.to_string()))?;
                    let listening = options.style == MarkerStyle::Other;
                    // Track before attaching so a failed attach is still torn down
                    self.markers.insert(
                        id.clone(),
                        RenderedMarker {
                            handle,
                            options: options.clone(),
                            listening: false,
                        },
                    );
                    if listening {
                        sdk.attach_click_listener(handle, router.listener_for(id))
                            .map_err(|e| InitError::marker(id, e.to_string()))?;
                        if let Some(marker) = self.markers.get_mut(id) {
                            marker.listening = true;
                        }
                    }
                    diff.added.push(id.clone());
                }
            }
        }

        Ok(())
    }

    /// Destroy every marker
    ///
    /// Best effort: SDK failures are logged and the marker is forgotten.
    /// Returns the number of markers released.
    pub fn clear(&mut self, sdk: &dyn MapSdk) -> usize {
        let count = self.markers.len();
        for (id, marker) in self.markers.drain(..) {
            if let Err(e) = sdk.destroy_marker(marker.handle) {
                tracing::warn!("Failed to destroy marker for {}: {}", id, e);
            }
        }
        self.poisoned = None;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessMapSdk;
    use crate::sdk::MapOptions;
    use crate::types::{ContainerId, User};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn map(sdk: &HeadlessMapSdk) -> MapHandle {
        let container = ContainerId::new("map");
        sdk.add_container(container.clone());
        sdk.create_map(
            &container,
            &MapOptions {
                center: Coordinate::FALLBACK,
                zoom: 12,
                controls: Default::default(),
            },
        )
        .await
        .unwrap()
    }

    fn ids(set: &MarkerSet) -> Vec<&str> {
        set.identities().map(UserId::as_str).collect()
    }

    #[test]
    fn plan_dedups_and_injects_self() {
        let me = User::new("u1", "").at(37.77, -122.41);
        let roster = Roster::new(
            vec![
                User::new("u2", "Bo").at(37.80, -122.42),
                User::new("u2", "Dup").at(1.0, 1.0),
                User::new("u3", "NoFix"),
            ],
            Some(me),
        );

        let plan = plan_markers(&roster);
        let keys: Vec<&str> = plan.keys().map(UserId::as_str).collect();
        assert_eq!(keys, vec!["u2", "u1"]);
        assert_eq!(plan["u2"].title, "Bo");
        assert_eq!(plan["u1"].title, "You");
        assert_eq!(plan["u1"].style, MarkerStyle::SelfUser);
    }

    #[test]
    fn plan_prefers_self_record() {
        let me = User::new("u1", "Me").at(10.0, 10.0);
        let roster = Roster::new(vec![User::new("u1", "Stale").at(0.0, 0.0)], Some(me));

        let plan = plan_markers(&roster);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan["u1"].position, Coordinate::new(10.0, 10.0));
        assert_eq!(plan["u1"].title, "Me");
    }

    #[tokio::test]
    async fn sync_diffs_by_identity() {
        let sdk = HeadlessMapSdk::new();
        let map = map(&sdk).await;
        let router = SelectRouter::new();
        let mut set = MarkerSet::new();

        let me = User::new("u1", "Me").at(37.77, -122.41);
        let first = Roster::new(
            vec![User::new("u2", "B").at(37.80, -122.42), User::new("u3", "C").at(37.0, -122.0)],
            Some(me.clone()),
        );
        let diff = set.sync(&sdk, map, &first, &router).unwrap();
        assert_eq!(diff.added.len(), 3);
        assert_eq!(ids(&set), vec!["u2", "u3", "u1"]);

        let u2_handle = set.handle_of(&UserId::new("u2")).unwrap();

        let second = Roster::new(
            vec![User::new("u2", "B").at(37.81, -122.42), User::new("u4", "D").at(36.0, -121.0)],
            Some(me),
        );
        let diff = set.sync(&sdk, map, &second, &router).unwrap();
        assert_eq!(diff.added, vec![UserId::new("u4")]);
        assert_eq!(diff.removed, vec![UserId::new("u3")]);
        assert_eq!(diff.updated, vec![UserId::new("u2")]);
        assert_eq!(diff.unchanged, 1);
        assert_eq!(ids(&set), vec!["u2", "u4", "u1"]);

        // Updated in place, not recreated
        assert_eq!(set.handle_of(&UserId::new("u2")), Some(u2_handle));
        assert_eq!(sdk.stats().markers_updated, 1);
    }

    #[tokio::test]
    async fn unchanged_roster_is_noop() {
        let sdk = HeadlessMapSdk::new();
        let map = map(&sdk).await;
        let router = SelectRouter::new();
        let mut set = MarkerSet::new();
        let roster = Roster::new(vec![User::new("u2", "B").at(1.0, 2.0)], None);

        set.sync(&sdk, map, &roster, &router).unwrap();
        let before = sdk.stats();
        let diff = set.sync(&sdk, map, &roster, &router).unwrap();

        assert!(diff.is_empty());
        assert_eq!(diff.unchanged, 1);
        assert_eq!(sdk.stats(), before);
    }

    #[tokio::test]
    async fn empty_roster_keeps_only_self() {
        let sdk = HeadlessMapSdk::new();
        let map = map(&sdk).await;
        let router = SelectRouter::new();
        let mut set = MarkerSet::new();
        let me = User::new("u1", "Me").at(1.0, 1.0);

        set.sync(
            &sdk,
            map,
            &Roster::new(vec![User::new("u2", "B").at(2.0, 2.0)], Some(me.clone())),
            &router,
        )
        .unwrap();
        set.sync(&sdk, map, &Roster::new(vec![], Some(me)), &router)
            .unwrap();
        assert_eq!(ids(&set), vec!["u1"]);

        set.sync(&sdk, map, &Roster::default(), &router).unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn malformed_coordinate_changes_nothing() {
        let sdk = HeadlessMapSdk::new();
        let map = map(&sdk).await;
        let router = SelectRouter::new();
        let mut set = MarkerSet::new();

        set.sync(&sdk, map, &Roster::new(vec![User::new("u2", "B").at(1.0, 1.0)], None), &router)
            .unwrap();

        let bad = Roster::new(
            vec![User::new("u3", "C").at(1.0, 1.0), User::new("u4", "D").at(95.0, 0.0)],
            None,
        );
        let err = set.sync(&sdk, map, &bad, &router).unwrap_err();
        assert!(matches!(
            err,
            WidgetError::Init(InitError::MalformedCoordinate { .. })
        ));
        assert_eq!(ids(&set), vec!["u2"]);
        assert!(!set.is_poisoned());
    }

    #[tokio::test]
    async fn sdk_failure_poisons_set() {
        let sdk = HeadlessMapSdk::new();
        let map = map(&sdk).await;
        let router = SelectRouter::new();
        let mut set = MarkerSet::new();
        sdk.fail_markers_after(1);

        let roster = Roster::new(
            vec![User::new("u2", "B").at(1.0, 1.0), User::new("u3", "C").at(2.0, 2.0)],
            None,
        );
        let err = set.sync(&sdk, map, &roster, &router).unwrap_err();
        assert!(matches!(err, WidgetError::Init(InitError::Marker { .. })));
        assert!(set.is_poisoned());

        let again = set.sync(&sdk, map, &roster, &router).unwrap_err();
        assert!(matches!(
            again,
            WidgetError::Precondition(PreconditionViolation::PoisonedMarkerSet(_))
        ));

        assert_eq!(set.clear(&sdk), 1);
        assert!(!set.is_poisoned());
        assert_eq!(sdk.live_markers(map), 0);
    }

    #[tokio::test]
    async fn clicks_route_except_self() {
        let sdk = HeadlessMapSdk::new();
        let map = map(&sdk).await;
        let router = SelectRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(RwLock::new(Vec::new()));
        router.set_callback(Some(Arc::new({
            let hits = hits.clone();
            let seen = seen.clone();
            move |id: &UserId| {
                hits.fetch_add(1, Ordering::SeqCst);
                seen.write().push(id.clone());
            }
        })));

        let mut set = MarkerSet::new();
        let roster = Roster::new(
            vec![User::new("u1", "Me").at(1.0, 1.0), User::new("u2", "B").at(2.0, 2.0)],
            Some(User::new("u1", "Me").at(1.0, 1.0)),
        );
        set.sync(&sdk, map, &roster, &router).unwrap();

        sdk.click(set.handle_of(&UserId::new("u1")).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        sdk.click(set.handle_of(&UserId::new("u2")).unwrap());
        sdk.click(set.handle_of(&UserId::new("u2")).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.read(), vec![UserId::new("u2"), UserId::new("u2")]);
    }

    #[tokio::test]
    async fn style_flip_updates_routing() {
        let sdk = HeadlessMapSdk::new();
        let map = map(&sdk).await;
        let router = SelectRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        router.set_callback(Some(Arc::new({
            let hits = hits.clone();
            move |_: &UserId| {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        })));
        let mut set = MarkerSet::new();
        let users = vec![User::new("a", "A").at(1.0, 1.0), User::new("b", "B").at(2.0, 2.0)];

        set.sync(&sdk, map, &Roster::new(users.clone(), Some(users[0].clone())), &router)
            .unwrap();
        // Self moves from "a" to "b"
        let diff = set
            .sync(&sdk, map, &Roster::new(users.clone(), Some(users[1].clone())), &router)
            .unwrap();
        assert_eq!(diff.updated.len(), 2);

        sdk.click(set.handle_of(&UserId::new("b")).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        sdk.click(set.handle_of(&UserId::new("a")).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
