//! Testing utilities for the nearby-map workspace
//!
//! Shared fixtures, fetchers and a widget harness over the headless SDK.

#![allow(missing_docs)]

use async_trait::async_trait;
use nearby_map::{
    ContainerId, FetchError, HeadlessFetcher, HeadlessMapSdk, MapRuntime, MapWidget, ScriptFetcher,
    ScriptUrl, User, UserId, WidgetConfig, WidgetProps,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub const TEST_CONTAINER: &str = "nearby-map";
pub const TEST_API_KEY: &str = "test-key";

pub fn located(id: &str, lat: f64, lng: f64) -> User {
    User::new(id, format!("User {id}")).at(lat, lng)
}

/// `u1` at (37.77, -122.41)
pub fn self_user() -> User {
    User::new("u1", "Me").at(37.77, -122.41)
}

/// `u2` at (37.80, -122.42)
pub fn other_user() -> User {
    User::new("u2", "Bo").at(37.80, -122.42)
}

pub fn example_roster() -> Vec<User> {
    vec![self_user(), other_user()]
}

pub fn example_props() -> WidgetProps {
    WidgetProps::active(Some(self_user()), example_roster())
}

pub fn test_config() -> WidgetConfig {
    WidgetConfig::default().with_api_key(TEST_API_KEY)
}

pub fn test_sdk() -> Arc<HeadlessMapSdk> {
    let sdk = Arc::new(HeadlessMapSdk::new());
    sdk.add_container(ContainerId::new(TEST_CONTAINER));
    sdk
}

/// Fetcher that counts calls and blocks each fetch until released
#[derive(Debug, Default)]
pub struct GatedFetcher {
    gate: Notify,
    started: Notify,
    calls: AtomicUsize,
    failure: Option<String>,
}

impl GatedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Let the pending (or next) fetch settle
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait until a fetch has started
    pub async fn wait_started(&self) {
        if self.calls() > 0 {
            return;
        }
        self.started.notified().await;
    }
}

#[async_trait]
impl ScriptFetcher for GatedFetcher {
    async fn fetch(&self, _url: &ScriptUrl) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.gate.notified().await;
        match &self.failure {
            Some(reason) => Err(FetchError::new(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Widget over the headless SDK with captured selections
pub struct WidgetHarness {
    pub widget: MapWidget,
    pub sdk: Arc<HeadlessMapSdk>,
    pub runtime: MapRuntime,
    selections: Arc<Mutex<Vec<UserId>>>,
}

impl WidgetHarness {
    /// Widget with an immediate fetcher and an API key
    pub fn new() -> Self {
        Self::with_fetcher(Arc::new(HeadlessFetcher::new()))
    }

    pub fn with_fetcher(fetcher: Arc<dyn ScriptFetcher>) -> Self {
        let sdk = test_sdk();
        let runtime = MapRuntime::from_config(&test_config(), fetcher, sdk.clone())
            .expect("test config is valid");
        Self::on_runtime(TEST_CONTAINER, test_config(), runtime, sdk)
    }

    pub fn with_config(config: WidgetConfig, fetcher: Arc<dyn ScriptFetcher>) -> Self {
        let sdk = test_sdk();
        let runtime = MapRuntime::from_config(&config, fetcher, sdk.clone())
            .expect("test config is valid");
        Self::on_runtime(TEST_CONTAINER, config, runtime, sdk)
    }

    /// Widget sharing an existing runtime; `container` must exist in `sdk`
    pub fn on_runtime(
        container: &str,
        config: WidgetConfig,
        runtime: MapRuntime,
        sdk: Arc<HeadlessMapSdk>,
    ) -> Self {
        let selections = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&selections);
        let widget = MapWidget::new(ContainerId::new(container), config, runtime.clone())
            .with_on_start_conversation(move |user| sink.lock().push(user.clone()));
        Self {
            widget,
            sdk,
            runtime,
            selections,
        }
    }

    pub fn selections(&self) -> Vec<UserId> {
        self.selections.lock().clone()
    }

    /// Click the marker of `user` on the live map, returning listeners fired
    pub fn click(&self, user: &str) -> usize {
        self.widget
            .map_handle()
            .map_or(0, |map| self.sdk.click_user(map, &UserId::new(user)))
    }

    /// Identities of the rendered markers in render order
    pub fn rendered(&self) -> Vec<String> {
        self.widget
            .markers()
            .into_iter()
            .map(|m| m.user.as_str().to_string())
            .collect()
    }
}

impl Default for WidgetHarness {
    fn default() -> Self {
        Self::new()
    }
}
