//! Nearby Map simulator - drives widgets over the headless SDK
//!
//! Generates a seeded mock roster, mounts a widget, clicks every marker and
//! toggles the visibility gate, checking lifecycle invariants on the way.

use futures::future::join_all;
use nearby_map::{
    plan_markers, ConfigError, ContainerId, HeadlessFetcher, HeadlessMapSdk, MapRuntime, MapWidget, Roster,
    User, UserId, WidgetConfig, WidgetPhase, WidgetProps,
};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Mock users in the roster
    pub users: usize,
    /// Off/on cycles of the visibility gate
    pub toggles: usize,
    /// Widget configuration
    pub widget: WidgetConfig,
}

/// An invariant check that failed
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the check
    pub check: &'static str,
    /// What was observed
    pub detail: String,
}

/// Simulation results
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    /// Seed the roster was generated from
    pub seed: u64,
    /// Mock users in the roster
    pub users: usize,
    /// Phase right after the first mount
    pub phase: WidgetPhase,
    /// Markers expected for the roster, self included
    pub markers: usize,
    /// Marker clicks dispatched
    pub clicks: usize,
    /// Callback invocations for other users
    pub selections: usize,
    /// Off/on cycles performed
    pub toggles: usize,
    /// Script inserts seen by the fetcher
    pub script_fetches: usize,
    /// Maps created by the SDK
    pub maps_created: usize,
    /// Maps destroyed by the SDK
    pub maps_destroyed: usize,
    /// Events left in the lifecycle trace
    pub trace_events: usize,
    /// Failed invariant checks
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Whether every check held
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable report
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Nearby Map Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.seed));
        report.push_str(&format!("Users: {}\n", self.users));
        report.push_str(&format!("Phase After Mount: {:?}\n", self.phase));
        report.push_str(&format!("Markers: {}\n", self.markers));
        report.push_str(&format!("Clicks: {}\n", self.clicks));
        report.push_str(&format!("Selections: {}\n", self.selections));
        report.push_str(&format!("Toggles: {}\n", self.toggles));
        report.push_str(&format!("Script Fetches: {}\n", self.script_fetches));
        report.push_str(&format!(
            "Maps Created/Destroyed: {}/{}\n",
            self.maps_created, self.maps_destroyed
        ));
        report.push_str(&format!("Trace Events: {}\n", self.trace_events));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {}: {}\n", i + 1, v.check, v.detail));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));

        report
    }
}

/// Mock users `user-1..=count` scattered over the globe
pub fn generate_users(rng: &mut StdRng, count: usize) -> Vec<User> {
    (1..=count)
        .map(|i| {
            User::new(format!("user-{i}"), format!("User {i}"))
                .at(rng.random_range(-90.0..90.0), rng.random_range(-180.0..180.0))
        })
        .collect()
}

fn check(violations: &mut Vec<Violation>, ok: bool, check: &'static str, detail: String) {
    if !ok {
        tracing::warn!("Check failed: {} ({})", check, detail);
        violations.push(Violation { check, detail });
    }
}

fn identities(widget: &MapWidget) -> Vec<UserId> {
    let mut ids: Vec<UserId> = widget.markers().into_iter().map(|m| m.user).collect();
    ids.sort();
    ids
}

/// Run one widget through mount, clicks and gate toggles
///
/// # Errors
/// - `ConfigError` if the widget configuration fails validation
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, ConfigError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let users = generate_users(&mut rng, config.users);
    let me = User::new("self", "You")
        .at(rng.random_range(-90.0..90.0), rng.random_range(-180.0..180.0));

    let container = ContainerId::new("nearby-map");
    let sdk = Arc::new(HeadlessMapSdk::new());
    sdk.add_container(container.clone());
    let fetcher = Arc::new(HeadlessFetcher::new());
    let runtime = MapRuntime::from_config(&config.widget, fetcher.clone(), sdk.clone())?;

    let selected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&selected);
    let widget = MapWidget::new(container, config.widget.clone(), runtime)
        .with_on_start_conversation(move |user: &UserId| sink.lock().push(user.clone()));

    let props = WidgetProps::active(Some(me.clone()), users.clone());
    let expected = plan_markers(&Roster::new(users, Some(me.clone())));
    let mut violations = Vec::new();

    widget.set_props(props).await;
    let phase = widget.phase();

    if config.widget.script_url().is_err() {
        check(
            &mut violations,
            phase == WidgetPhase::Error && fetcher.insert_count() == 0,
            "missing key rejected before load",
            format!("phase {:?}, {} inserts", phase, fetcher.insert_count()),
        );
    } else {
        check(
            &mut violations,
            phase == WidgetPhase::Ready,
            "widget ready",
            format!("phase {:?}, error {:?}", phase, widget.error()),
        );
        check(
            &mut violations,
            widget.markers().len() == expected.len(),
            "one marker per identity",
            format!("{} rendered, {} expected", widget.markers().len(), expected.len()),
        );
    }

    let mut clicks = 0;
    if let Some(map) = widget.map_handle() {
        for id in expected.keys() {
            clicks += sdk.click_user(map, id);
        }
        let selections = selected.lock().clone();
        check(
            &mut violations,
            !selections.contains(&me.id),
            "self click ignored",
            format!("{} selections", selections.len()),
        );
        check(
            &mut violations,
            selections.len() == expected.len().saturating_sub(1),
            "one selection per other marker",
            format!("{} selections for {} markers", selections.len(), expected.len()),
        );
    }

    let baseline = identities(&widget);
    for round in 0..config.toggles {
        widget.set_active(false).await;
        check(
            &mut violations,
            sdk.live_maps() == 0 && widget.markers().is_empty(),
            "deactivation tears down",
            format!("round {round}: {} live maps", sdk.live_maps()),
        );
        widget.set_active(true).await;
        check(
            &mut violations,
            identities(&widget) == baseline,
            "stable marker set across toggles",
            format!("round {round}"),
        );
    }

    check(
        &mut violations,
        fetcher.insert_count() <= 1,
        "single script fetch",
        format!("{} fetches", fetcher.insert_count()),
    );

    widget.unmount();
    let stats = sdk.stats();
    check(
        &mut violations,
        stats.maps_created == stats.maps_destroyed,
        "every map destroyed",
        format!("{} created, {} destroyed", stats.maps_created, stats.maps_destroyed),
    );

    let selections = selected.lock().len();
    Ok(SimulatorReport {
        seed: config.seed,
        users: config.users,
        phase,
        markers: expected.len(),
        clicks,
        selections,
        toggles: config.toggles,
        script_fetches: fetcher.insert_count(),
        maps_created: stats.maps_created,
        maps_destroyed: stats.maps_destroyed,
        trace_events: widget.trace().events().len(),
        violations,
    })
}

/// Results of mounting several widgets on one runtime
#[derive(Debug, Clone)]
pub struct ConcurrentReport {
    /// Widgets mounted
    pub widgets: usize,
    /// Widgets that reached ready
    pub ready: usize,
    /// Script inserts seen by the fetcher
    pub script_fetches: usize,
}

impl ConcurrentReport {
    /// Whether every widget is ready after at most one fetch
    pub fn passed(&self) -> bool {
        self.ready == self.widgets && self.script_fetches <= 1
    }
}

/// Mount `count` widgets at once, sharing one loader
///
/// # Errors
/// - `ConfigError` if the widget configuration fails validation
pub async fn run_concurrent(
    config: &WidgetConfig,
    count: usize,
) -> Result<ConcurrentReport, ConfigError> {
    let sdk = Arc::new(HeadlessMapSdk::new());
    let fetcher = Arc::new(HeadlessFetcher::new());
    let runtime = MapRuntime::from_config(config, fetcher.clone(), sdk.clone())?;

    let widgets: Vec<MapWidget> = (0..count)
        .map(|i| {
            let container = ContainerId::new(format!("map-{i}"));
            sdk.add_container(container.clone());
            MapWidget::new(container, config.clone(), runtime.clone())
        })
        .collect();

    let me = User::new("self", "You").at(37.7749, -122.4194);
    join_all(
        widgets
            .iter()
            .map(|w| w.set_props(WidgetProps::active(Some(me.clone()), Vec::new()))),
    )
    .await;

    let ready = widgets
        .iter()
        .filter(|w| w.phase() == WidgetPhase::Ready)
        .count();
    for widget in &widgets {
        widget.unmount();
    }

    Ok(ConcurrentReport {
        widgets: count,
        ready,
        script_fetches: fetcher.insert_count(),
    })
}
