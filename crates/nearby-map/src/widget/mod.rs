//! Map widget and visibility gate
//!
//! Drives the full lifecycle for one container:
//! 1. Gate on: check configuration, load the script, create the session
//! 2. Ready: keep markers and centre in sync with the props
//! 3. Gate off or unmount: tear the session down
//!
//! Every activation and deactivation bumps a generation counter. Async
//! results (script load, map init) that resolve under an older generation
//! are discarded, and a session created by a stale init is destroyed.

mod phase;
mod view;

pub use phase::{allowed_transitions, validate_transition, WidgetPhase};
pub use view::{WidgetProps, WidgetView};

use crate::config::WidgetConfig;
use crate::error::{ConfigError, WidgetError};
use crate::loader::{ScriptFetcher, ScriptLoader, ScriptUrl};
use crate::markers::{MarkerSnapshot, SelectCallback, SelectRouter};
use crate::sdk::{MapHandle, MapOptions, MapSdk};
use crate::session::{ContainerLeases, MapSession};
use crate::trace::{LifecycleEventKind, LifecycleTrace};
use crate::types::{ContainerId, Roster, SessionId, UserId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Services shared by every widget on a page
#[derive(Clone)]
pub struct MapRuntime {
    /// Script loader
    pub loader: ScriptLoader,
    /// Mapping SDK
    pub sdk: Arc<dyn MapSdk>,
    /// Container lease registry
    pub leases: ContainerLeases,
}

impl fmt::Debug for MapRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapRuntime")
            .field("loader", &self.loader)
            .field("leases", &self.leases.live_count())
            .finish_non_exhaustive()
    }
}

impl MapRuntime {
    /// Create runtime from existing services
    #[inline]
    #[must_use]
    pub fn new(loader: ScriptLoader, sdk: Arc<dyn MapSdk>) -> Self {
        Self {
            loader,
            sdk,
            leases: ContainerLeases::new(),
        }
    }

    /// Create runtime with a fresh loader using the configured timeout
    ///
    /// # Errors
    /// - `ConfigError::InvalidValue` if the configuration fails validation
    pub fn from_config(
        config: &WidgetConfig,
        fetcher: Arc<dyn ScriptFetcher>,
        sdk: Arc<dyn MapSdk>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            ScriptLoader::new(fetcher, config.fetch_timeout()),
            sdk,
        ))
    }
}

struct Core {
    phase: WidgetPhase,
    generation: u64,
    props: WidgetProps,
    session: Option<MapSession>,
    error: Option<WidgetError>,
    unmounted: bool,
}

struct Shared {
    container: ContainerId,
    config: WidgetConfig,
    runtime: MapRuntime,
    router: SelectRouter,
    trace: LifecycleTrace,
    core: Mutex<Core>,
}

/// Map widget bound to one container
///
/// Cheap to clone; clones drive the same widget.
#[derive(Clone)]
pub struct MapWidget {
    shared: Arc<Shared>,
}

impl fmt::Debug for MapWidget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("MapWidget")
            .field("container", &self.shared.container)
            .field("phase", &core.phase)
            .field("generation", &core.generation)
            .finish_non_exhaustive()
    }
}

impl MapWidget {
    /// Create an inactive widget
    #[must_use]
    pub fn new(container: ContainerId, config: WidgetConfig, runtime: MapRuntime) -> Self {
        let trace = LifecycleTrace::new(config.trace_capacity);
        let router = SelectRouter::new().with_trace(trace.clone());
        Self {
            shared: Arc::new(Shared {
                container,
                config,
                runtime,
                router,
                trace,
                core: Mutex::new(Core {
                    phase: WidgetPhase::Inactive,
                    generation: 0,
                    props: WidgetProps::default(),
                    session: None,
                    error: None,
                    unmounted: false,
                }),
            }),
        }
    }

    /// With the "start conversation" callback
    #[must_use]
    pub fn with_on_start_conversation<F>(self, callback: F) -> Self
    where
        F: Fn(&UserId) + Send + Sync + 'static,
    {
        self.set_on_start_conversation(Some(Arc::new(callback)));
        self
    }

    /// Replace the "start conversation" callback
    ///
    /// Existing markers route to the new callback immediately.
    pub fn set_on_start_conversation(&self, callback: Option<SelectCallback>) {
        self.shared.router.set_callback(callback);
    }

    /// Apply new props
    ///
    /// When this switches the gate on, the returned future completes once the
    /// activation settles (ready, error, or superseded).
    pub async fn set_props(&self, props: WidgetProps) {
        let activation = {
            let mut core = self.shared.core.lock();
            if core.unmounted {
                tracing::debug!("Ignoring props for unmounted widget {}", self.shared.container);
                return;
            }
            core.props = props;

            match (core.phase, core.props.is_active) {
                (WidgetPhase::Inactive, true) => self.begin_activation(&mut core),
                (WidgetPhase::Inactive, false) => None,
                (_, false) => {
                    self.deactivate(&mut core);
                    None
                }
                (WidgetPhase::Ready, true) => {
                    if let Err(e) = self.refresh(&mut core) {
                        self.fail(&mut core, e);
                    }
                    None
                }
                // Stored props are picked up when activation completes;
                // errors wait for an off/on cycle
                (WidgetPhase::Activating | WidgetPhase::Error, true) => None,
            }
        };

        if let Some((generation, url)) = activation {
            self.run_activation(generation, url).await;
        }
    }

    /// Switch the visibility gate, keeping the other props
    pub async fn set_active(&self, is_active: bool) {
        let props = self.shared.core.lock().props.clone().with_active(is_active);
        self.set_props(props).await;
    }

    /// Tear down and ignore all further props and async results
    pub fn unmount(&self) {
        let mut core = self.shared.core.lock();
        if core.unmounted {
            return;
        }
        if core.phase != WidgetPhase::Inactive {
            self.deactivate(&mut core);
        }
        core.unmounted = true;
        self.shared.trace.record(LifecycleEventKind::Unmounted);
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> WidgetPhase {
        self.shared.core.lock().phase
    }

    /// Error that put the widget in the error phase
    #[must_use]
    pub fn error(&self) -> Option<WidgetError> {
        self.shared.core.lock().error.clone()
    }

    /// Activation generation
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.core.lock().generation
    }

    /// Presentation state
    #[must_use]
    pub fn view(&self) -> WidgetView {
        let core = self.shared.core.lock();
        match core.phase {
            WidgetPhase::Inactive => WidgetView::Hidden,
            WidgetPhase::Activating => WidgetView::Loading,
            WidgetPhase::Ready => match &core.session {
                Some(session) => WidgetView::Map {
                    center: session.center(),
                    markers: session.markers().snapshot(),
                },
                None => WidgetView::Loading,
            },
            WidgetPhase::Error => match &core.error {
                Some(e) => WidgetView::Errored {
                    kind: e.kind(),
                    message: e.user_message(),
                },
                None => WidgetView::Hidden,
            },
        }
    }

    /// Rendered markers, empty without a live session
    #[must_use]
    pub fn markers(&self) -> Vec<MarkerSnapshot> {
        self.shared
            .core
            .lock()
            .session
            .as_ref()
            .map(|s| s.markers().snapshot())
            .unwrap_or_default()
    }

    /// Live session ID
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.core.lock().session.as_ref().map(MapSession::id)
    }

    /// SDK handle of the live map
    #[must_use]
    pub fn map_handle(&self) -> Option<MapHandle> {
        self.shared
            .core
            .lock()
            .session
            .as_ref()
            .map(MapSession::map_handle)
    }

    /// Container this widget renders into
    #[inline]
    #[must_use]
    pub fn container(&self) -> &ContainerId {
        &self.shared.container
    }

    /// Lifecycle trace
    #[inline]
    #[must_use]
    pub fn trace(&self) -> &LifecycleTrace {
        &self.shared.trace
    }

    fn transition(&self, core: &mut Core, to: WidgetPhase) -> Result<(), WidgetError> {
        validate_transition(core.phase, to)?;
        tracing::debug!(
            "Widget {}: {:?} -> {:?}",
            self.shared.container,
            core.phase,
            to
        );
        core.phase = to;
        Ok(())
    }

    fn bump_generation(&self, core: &mut Core) -> u64 {
        core.generation += 1;
        self.shared.trace.set_generation(core.generation);
        core.generation
    }

    fn begin_activation(&self, core: &mut Core) -> Option<(u64, ScriptUrl)> {
        let generation = self.bump_generation(core);
        self.shared.trace.record(LifecycleEventKind::ActivationRequested);
        if let Err(e) = self.transition(core, WidgetPhase::Activating) {
            self.fail(core, e);
            return None;
        }
        core.error = None;

        let config = &self.shared.config;
        match config.validate().and_then(|()| config.script_url()) {
            Ok(url) => Some((generation, url)),
            Err(e) => {
                self.shared
                    .trace
                    .record(LifecycleEventKind::ConfigurationRejected {
                        message: e.to_string(),
                    });
                self.fail(core, e.into());
                None
            }
        }
    }

    fn is_current(core: &Core, generation: u64) -> bool {
        core.generation == generation && core.phase == WidgetPhase::Activating
    }

    async fn run_activation(&self, generation: u64, url: ScriptUrl) {
        let runtime = &self.shared.runtime;
        let outcome = runtime.loader.ensure_loaded(&url).await;

        let (ready, options) = {
            let mut core = self.shared.core.lock();
            if !Self::is_current(&core, generation) {
                tracing::debug!("Discarding stale script result (generation {})", generation);
                self.shared
                    .trace
                    .record(LifecycleEventKind::StaleResultDiscarded {
                        stage: "script load".to_string(),
                    });
                return;
            }
            let ready = match outcome {
                Ok(ready) => ready,
                Err(e) => {
                    self.shared.trace.record(LifecycleEventKind::ScriptFailed {
                        message: e.to_string(),
                    });
                    self.fail(&mut core, e.into());
                    return;
                }
            };
            self.shared.trace.record(LifecycleEventKind::ScriptReady);
            let options = MapOptions {
                center: core
                    .props
                    .self_location()
                    .unwrap_or(self.shared.config.default_center),
                zoom: self.shared.config.zoom,
                controls: self.shared.config.controls,
            };
            (ready, options)
        };

        let created = MapSession::create(
            Arc::clone(&runtime.sdk),
            &runtime.leases,
            &ready,
            self.shared.container.clone(),
            options,
        )
        .await;

        let mut core = self.shared.core.lock();
        if !Self::is_current(&core, generation) {
            tracing::debug!("Discarding stale map init (generation {})", generation);
            if let Ok(session) = created {
                session.destroy();
            }
            self.shared
                .trace
                .record(LifecycleEventKind::StaleResultDiscarded {
                    stage: "map init".to_string(),
                });
            return;
        }

        match created {
            Ok(session) => {
                self.shared
                    .trace
                    .record(LifecycleEventKind::SessionCreated {
                        session: session.id(),
                    });
                core.session = Some(session);
            }
            Err(e) => {
                self.fail(&mut core, e);
                return;
            }
        }

        let settled = self
            .refresh(&mut core)
            .and_then(|()| self.transition(&mut core, WidgetPhase::Ready));
        match settled {
            Ok(()) => tracing::info!("Widget {} ready", self.shared.container),
            Err(e) => self.fail(&mut core, e),
        }
    }

    /// Recenter on the current user and reconcile markers
    fn refresh(&self, core: &mut Core) -> Result<(), WidgetError> {
        let roster = Roster::new(core.props.active_users.clone(), core.props.current_user.clone());
        let self_location = core.props.self_location();
        let Some(session) = core.session.as_mut() else {
            return Ok(());
        };

        if let Some(center) = self_location {
            if center != session.center() {
                session.recenter(center)?;
                self.shared
                    .trace
                    .record(LifecycleEventKind::Recentered { center });
            }
        }

        let diff = session.sync(&roster, &self.shared.router)?;
        if !diff.is_empty() {
            self.shared.trace.record(LifecycleEventKind::MarkersSynced {
                added: diff.added.len(),
                removed: diff.removed.len(),
                updated: diff.updated.len(),
            });
        }
        Ok(())
    }

    fn release_session(&self, core: &mut Core) {
        if let Some(session) = core.session.take() {
            let id = session.id();
            let markers = session.destroy();
            self.shared
                .trace
                .record(LifecycleEventKind::SessionDestroyed { session: id, markers });
        }
    }

    fn fail(&self, core: &mut Core, error: WidgetError) {
        tracing::error!("Widget {} failed: {}", self.shared.container, error);
        self.release_session(core);
        self.shared.trace.record(LifecycleEventKind::Errored {
            kind: error.kind(),
            message: error.to_string(),
        });
        if let Err(e) = self.transition(core, WidgetPhase::Error) {
            tracing::error!("Widget {}: {}", self.shared.container, e);
        }
        core.error = Some(error);
    }

    fn deactivate(&self, core: &mut Core) {
        self.bump_generation(core);
        self.release_session(core);
        core.error = None;
        if let Err(e) = self.transition(core, WidgetPhase::Inactive) {
            tracing::error!("Widget {}: {}", self.shared.container, e);
        }
        self.shared.trace.record(LifecycleEventKind::Deactivated);
        tracing::info!("Widget {} deactivated", self.shared.container);
    }
}
