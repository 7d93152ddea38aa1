//! Nearby Map - map widget lifecycle for a "nearby users" view
//!
//! Renders a set of users as markers on an externally loaded map:
//! - Loads the map script at most once per URL, shared by every widget
//! - Binds one map session to one container at a time
//! - Keeps markers in sync with the user roster, one per identity
//! - Gates all work on visibility and discards results from superseded activations
//!
//! # Example
//!
//! ```rust,ignore
//! use nearby_map::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WidgetConfig::from_env()?;
//! let sdk = Arc::new(HeadlessMapSdk::new());
//! sdk.add_container(ContainerId::new("map"));
//! let runtime = MapRuntime::from_config(&config, Arc::new(HeadlessFetcher::new()), sdk)?;
//!
//! let widget = MapWidget::new(ContainerId::new("map"), config, runtime)
//!     .with_on_start_conversation(|user| println!("chat with {user}"));
//!
//! let me = User::new("u1", "Me").at(37.77, -122.41);
//! widget.set_props(WidgetProps::active(Some(me.clone()), vec![me])).await;
//! assert!(widget.view().is_map());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod headless;
pub mod loader;
pub mod markers;
pub mod sdk;
pub mod session;
pub mod trace;
pub mod types;
pub mod widget;

// Re-exports for convenience
pub use config::{MapControls, WidgetConfig};
pub use error::{
    ConfigError, ErrorKind, FetchError, InitError, LoadError, PreconditionViolation, SdkError,
    WidgetError,
};
pub use headless::{HeadlessFetcher, HeadlessMapSdk, HeadlessStats};
pub use loader::{LoadState, ScriptFetcher, ScriptLoader, ScriptReady, ScriptUrl};
pub use markers::{plan_markers, MarkerDiff, MarkerSet, MarkerSnapshot, SelectCallback, SelectRouter};
pub use sdk::{ClickListener, MapHandle, MapOptions, MapSdk, MarkerHandle, MarkerOptions, MarkerStyle};
pub use session::{ContainerLease, ContainerLeases, MapSession};
pub use trace::{LifecycleEvent, LifecycleEventKind, LifecycleTrace};
pub use types::{ContainerId, Coordinate, Roster, SessionId, User, UserId};
pub use widget::{MapRuntime, MapWidget, WidgetPhase, WidgetProps, WidgetView};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for embedding the map widget
    pub use crate::{
        ContainerId, Coordinate, HeadlessFetcher, HeadlessMapSdk, MapRuntime, MapWidget, User,
        UserId, WidgetConfig, WidgetError, WidgetPhase, WidgetProps, WidgetView,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
