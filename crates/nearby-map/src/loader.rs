//! Singleton script loader
//!
//! Guarantees the external mapping script is fetched at most once per URL:
//! - The first caller for a URL issues the fetch
//! - Concurrent callers queue as one-shot waiters
//! - Every waiter observes the same terminal outcome
//! - Failure is terminal for the lifetime of the loader
//!
//! A loader instance models one page. Widgets on the same page share it by
//! cloning the handle.

use crate::error::{FetchError, LoadError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Fully-qualified script URL, including its query string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptUrl(String);

impl ScriptUrl {
    /// Create new script URL
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Borrow the raw URL
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the key
        match self.0.split_once('?') {
            Some((base, _)) => write!(f, "{base}?…"),
            None => f.write_str(&self.0),
        }
    }
}

/// Inserts a script directive into the host document and awaits its load
///
/// Implementations insert exactly one directive per call and never remove it.
#[async_trait::async_trait]
pub trait ScriptFetcher: Send + Sync {
    /// Insert the script and resolve once the host reports load or error
    async fn fetch(&self, url: &ScriptUrl) -> Result<(), FetchError>;
}

/// Observable load state for one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// Never requested
    Unloaded,
    /// Fetch in flight
    Loading,
    /// Script available
    Ready,
    /// Fetch failed or timed out
    Failed(LoadError),
}

/// Proof that a script finished loading
///
/// Only [`ScriptLoader::ensure_loaded`] hands these out, so anything that
/// takes one cannot run before the SDK is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReady {
    url: ScriptUrl,
}

impl ScriptReady {
    /// URL that was loaded
    #[inline]
    #[must_use]
    pub fn url(&self) -> &ScriptUrl {
        &self.url
    }
}

type Waiter = oneshot::Sender<Result<(), LoadError>>;

enum Slot {
    Loading(Vec<Waiter>),
    Ready,
    Failed(LoadError),
}

struct LoaderInner {
    fetcher: Arc<dyn ScriptFetcher>,
    timeout: Duration,
    slots: Mutex<HashMap<ScriptUrl, Slot>>,
    fetches: AtomicUsize,
}

impl LoaderInner {
    fn settle(&self, url: &ScriptUrl, outcome: Result<(), LoadError>) {
        let waiters = {
            let mut slots = self.slots.lock();
            let next = match &outcome {
                Ok(()) => Slot::Ready,
                Err(e) => Slot::Failed(e.clone()),
            };
            match slots.insert(url.clone(), next) {
                Some(Slot::Loading(waiters)) => waiters,
                _ => Vec::new(),
            }
        };

        match &outcome {
            Ok(()) => tracing::info!("Script ready: {} ({} waiters)", url, waiters.len()),
            Err(e) => tracing::warn!("Script failed: {}: {} ({} waiters)", url, e, waiters.len()),
        }

        for waiter in waiters {
            // Receiver may have been dropped by a deactivated widget
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Shared script loader service
#[derive(Clone)]
pub struct ScriptLoader {
    inner: Arc<LoaderInner>,
}

impl fmt::Debug for ScriptLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptLoader")
            .field("timeout", &self.inner.timeout)
            .field("fetches", &self.fetches_issued())
            .finish_non_exhaustive()
    }
}

impl ScriptLoader {
    /// Create new loader over a fetcher
    #[must_use]
    pub fn new(fetcher: Arc<dyn ScriptFetcher>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                fetcher,
                timeout,
                slots: Mutex::new(HashMap::new()),
                fetches: AtomicUsize::new(0),
            }),
        }
    }

    /// Ensure a script is loaded
    ///
    /// Must be called from within a tokio runtime; the fetch runs as its own
    /// task so it settles even if every caller stops waiting.
    ///
    /// # Errors
    /// - `LoadError::Network` if the fetcher reported a failure
    /// - `LoadError::Timeout` if the fetch did not settle in time
    /// - the stored error if the URL already failed
    pub async fn ensure_loaded(&self, url: &ScriptUrl) -> Result<ScriptReady, LoadError> {
        let (rx, start_fetch) = {
            let mut slots = self.inner.slots.lock();
            match slots.get_mut(url) {
                Some(Slot::Ready) => {
                    return Ok(ScriptReady { url: url.clone() });
                }
                Some(Slot::Failed(e)) => return Err(e.clone()),
                Some(Slot::Loading(waiters)) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    tracing::debug!("Queued behind in-flight load: {}", url);
                    (rx, false)
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    slots.insert(url.clone(), Slot::Loading(vec![tx]));
                    (rx, true)
                }
            }
        };

        if start_fetch {
            self.spawn_fetch(url.clone());
        }

        match rx.await {
            Ok(Ok(())) => Ok(ScriptReady { url: url.clone() }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LoadError::Abandoned),
        }
    }

    /// Current state for a URL
    #[must_use]
    pub fn state(&self, url: &ScriptUrl) -> LoadState {
        match self.inner.slots.lock().get(url) {
            None => LoadState::Unloaded,
            Some(Slot::Loading(_)) => LoadState::Loading,
            Some(Slot::Ready) => LoadState::Ready,
            Some(Slot::Failed(e)) => LoadState::Failed(e.clone()),
        }
    }

    /// Number of fetches issued across all URLs
    #[inline]
    #[must_use]
    pub fn fetches_issued(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    /// Configured fetch timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    fn spawn_fetch(&self, url: ScriptUrl) {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Fetching script: {}", url);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let timeout = inner.timeout;
            let outcome = match tokio::time::timeout(timeout, inner.fetcher.fetch(&url)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(LoadError::Network { reason: e.reason }),
                Err(_) => Err(LoadError::Timeout { after: timeout }),
            };
            inner.settle(&url, outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct CountingFetcher {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        fail: Option<String>,
    }

    #[async_trait::async_trait]
    impl ScriptFetcher for CountingFetcher {
        async fn fetch(&self, _url: &ScriptUrl) -> Result<(), FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match &self.fail {
                Some(reason) => Err(FetchError::new(reason.clone())),
                None => Ok(()),
            }
        }
    }

    fn fetcher(gate: Option<Arc<Notify>>, fail: Option<&str>) -> Arc<CountingFetcher> {
        Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            gate,
            fail: fail.map(str::to_string),
        })
    }

    fn url() -> ScriptUrl {
        ScriptUrl::new("https://maps.example/js?key=k&callback=initMap")
    }

    #[tokio::test]
    async fn ready_resolves_immediately_afterwards() {
        let f = fetcher(None, None);
        let loader = ScriptLoader::new(f.clone(), Duration::from_secs(10));

        assert_eq!(loader.state(&url()), LoadState::Unloaded);
        let ready = loader.ensure_loaded(&url()).await.unwrap();
        assert_eq!(ready.url(), &url());
        assert_eq!(loader.state(&url()), LoadState::Ready);

        loader.ensure_loaded(&url()).await.unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.fetches_issued(), 1);
    }

    #[tokio::test]
    async fn concurrent_waiters_share_one_fetch() {
        let gate = Arc::new(Notify::new());
        let f = fetcher(Some(gate.clone()), None);
        let loader = ScriptLoader::new(f.clone(), Duration::from_secs(10));

        let a = tokio::spawn({
            let loader = loader.clone();
            async move { loader.ensure_loaded(&url()).await }
        });
        let b = tokio::spawn({
            let loader = loader.clone();
            async move { loader.ensure_loaded(&url()).await }
        });

        while f.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(loader.state(&url()), LoadState::Loading);
        gate.notify_one();

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_terminal() {
        let f = fetcher(None, Some("offline"));
        let loader = ScriptLoader::new(f.clone(), Duration::from_secs(10));

        let err = loader.ensure_loaded(&url()).await.unwrap_err();
        assert_eq!(
            err,
            LoadError::Network {
                reason: "offline".to_string()
            }
        );

        let again = loader.ensure_loaded(&url()).await.unwrap_err();
        assert_eq!(again, err);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(loader.state(&url()), LoadState::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_times_out() {
        // Gate is never released
        let f = fetcher(Some(Arc::new(Notify::new())), None);
        let loader = ScriptLoader::new(f, Duration::from_secs(10));

        let err = loader.ensure_loaded(&url()).await.unwrap_err();
        assert_eq!(
            err,
            LoadError::Timeout {
                after: Duration::from_secs(10)
            }
        );
        assert_eq!(err.to_string(), "timed out after 10s");
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_timeout_is_reported_exactly() {
        let f = fetcher(Some(Arc::new(Notify::new())), None);
        let loader = ScriptLoader::new(f, Duration::from_millis(500));

        let err = loader.ensure_loaded(&url()).await.unwrap_err();
        assert_eq!(err.to_string(), "timed out after 500ms");
    }

    #[tokio::test]
    async fn fetch_settles_without_waiters() {
        let gate = Arc::new(Notify::new());
        let f = fetcher(Some(gate.clone()), None);
        let loader = ScriptLoader::new(f.clone(), Duration::from_secs(10));

        let pending = tokio::spawn({
            let loader = loader.clone();
            async move { loader.ensure_loaded(&url()).await }
        });
        while f.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        pending.abort();
        gate.notify_one();

        while loader.state(&url()) == LoadState::Loading {
            tokio::task::yield_now().await;
        }
        assert_eq!(loader.state(&url()), LoadState::Ready);
    }

    #[test]
    fn display_hides_query() {
        assert_eq!(url().to_string(), "https://maps.example/js?…");
    }
}
