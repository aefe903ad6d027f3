//! Settings refresh
//!
//! Keeps [`SettingsState`] in step with remote config. Loads run on the
//! blocking pool of the application runtime, never on the notifying
//! thread. Only the main process loads at startup, so secondary processes
//! don't duplicate the work.

use crate::settings::{Settings, SettingsSnapshot, SettingsState};
use std::sync::{Arc, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Toggle and settings blob taken from one version of the feature entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureState {
    pub enabled: bool,
    pub settings_json: Option<String>,
}

/// Remote-config view of the malicious site protection feature
pub trait RemoteFeatureConfig: Send + Sync {
    /// Feature toggle state
    fn is_enabled(&self) -> bool;

    /// Raw settings JSON, if the feature carries any
    fn settings_json(&self) -> Option<String>;

    /// Toggle and settings read together.
    ///
    /// Sources whose entry can change between two reads should override
    /// this to read once.
    fn feature_state(&self) -> FeatureState {
        FeatureState {
            enabled: self.is_enabled(),
            settings_json: self.settings_json(),
        }
    }
}

/// Receives "privacy config downloaded" notifications
pub trait ConfigRefreshListener: Send + Sync {
    fn on_config_refreshed(&self);
}

/// Registry of config refresh listeners
#[derive(Default)]
pub struct ConfigRefreshObservers {
    listeners: RwLock<Vec<Arc<dyn ConfigRefreshListener>>>,
}

impl ConfigRefreshObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn ConfigRefreshListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Notify every registered listener, in registration order
    pub fn notify_all(&self) {
        // Snapshot so listeners may register others without deadlocking
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        debug!("Config refreshed, notifying {} listeners", listeners.len());
        for listener in listeners {
            listener.on_config_refreshed();
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reloads settings from remote config
pub struct UpdateTrigger {
    remote: Arc<dyn RemoteFeatureConfig>,
    settings: Arc<SettingsState>,
    runtime: Handle,
}

impl UpdateTrigger {
    pub fn new(
        remote: Arc<dyn RemoteFeatureConfig>,
        settings: Arc<SettingsState>,
        runtime: Handle,
    ) -> Self {
        Self {
            remote,
            settings,
            runtime,
        }
    }

    /// Startup load; only the main process loads
    pub fn start(&self, is_main_process: bool) -> Option<JoinHandle<()>> {
        if !is_main_process {
            debug!("Not the main process, skipping settings load");
            return None;
        }
        Some(self.schedule_load())
    }

    /// Reload after a config download
    pub fn refresh(&self) -> JoinHandle<()> {
        self.schedule_load()
    }

    fn schedule_load(&self) -> JoinHandle<()> {
        let remote = Arc::clone(&self.remote);
        let settings = Arc::clone(&self.settings);
        self.runtime
            .spawn_blocking(move || load_settings(remote.as_ref(), &settings))
    }
}

impl ConfigRefreshListener for UpdateTrigger {
    fn on_config_refreshed(&self) {
        // Fire and forget; completion is observable through SettingsState
        drop(self.schedule_load());
    }
}

/// Read the toggle and settings blob and publish one new snapshot.
///
/// A settings decode failure keeps the cadences current at publish time
/// but still applies the toggle. Nothing is read from the state before the
/// remote fetch, so an overlapping load cannot be overwritten with stale
/// values.
fn load_settings(remote: &dyn RemoteFeatureConfig, state: &SettingsState) {
    let feature = remote.feature_state();
    let enabled = feature.enabled;

    let decoded = match feature.settings_json {
        Some(json) => match Settings::from_json(&json) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!("Keeping previous malicious site settings: {}", e);
                None
            }
        },
        None => None,
    };

    let (previous, next) = state.update(|current| SettingsSnapshot {
        enabled,
        settings: decoded.unwrap_or(current.settings),
    });

    if next != previous {
        info!(
            "Malicious site protection settings: enabled={}, hash prefix every {} min, filter set every {} min",
            next.enabled,
            next.settings.hash_prefix_update_frequency,
            next.settings.filter_set_update_frequency
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::thread::ThreadId;
    use std::time::Duration;

    /// Parks a remote read until the test releases it
    struct Gate {
        entered: Barrier,
        release: Barrier,
    }

    impl Gate {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entered: Barrier::new(2),
                release: Barrier::new(2),
            })
        }
    }

    struct FakeRemote {
        enabled: bool,
        json: Option<String>,
        gate: Option<Arc<Gate>>,
        /// Thread each read happened on
        read_threads: Mutex<Vec<ThreadId>>,
    }

    impl FakeRemote {
        fn new(enabled: bool, json: Option<&str>) -> Self {
            Self {
                enabled,
                json: json.map(str::to_string),
                gate: None,
                read_threads: Mutex::new(Vec::new()),
            }
        }

        fn gated(mut self, gate: Arc<Gate>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    impl RemoteFeatureConfig for FakeRemote {
        fn is_enabled(&self) -> bool {
            self.read_threads
                .lock()
                .unwrap()
                .push(std::thread::current().id());
            if let Some(gate) = &self.gate {
                gate.entered.wait();
                gate.release.wait();
            }
            self.enabled
        }

        fn settings_json(&self) -> Option<String> {
            self.json.clone()
        }
    }

    const VALID: &str = r#"{"hashPrefixUpdateFrequency": 10, "filterSetUpdateFrequency": 60}"#;

    #[tokio::test]
    async fn test_start_loads_in_main_process() {
        let remote = Arc::new(FakeRemote::new(true, Some(VALID)));
        let state = Arc::new(SettingsState::new());
        let trigger = UpdateTrigger::new(remote.clone(), state.clone(), Handle::current());

        trigger.start(true).unwrap().await.unwrap();

        assert!(state.is_feature_enabled());
        assert_eq!(state.settings().hash_prefix_update_frequency, 10);
        assert_eq!(state.settings().filter_set_update_frequency, 60);
        // Loaded off the calling thread
        let threads = remote.read_threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn test_start_skipped_outside_main_process() {
        let remote = Arc::new(FakeRemote::new(true, Some(VALID)));
        let state = Arc::new(SettingsState::new());
        let trigger = UpdateTrigger::new(remote.clone(), state.clone(), Handle::current());

        assert!(trigger.start(false).is_none());
        assert!(!state.is_feature_enabled());
        assert!(remote.read_threads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_defaults() {
        let remote = Arc::new(FakeRemote::new(true, Some(r#"{"hashPrefixUpdateFrequency": 1}"#)));
        let state = Arc::new(SettingsState::new());
        let trigger = UpdateTrigger::new(remote, state.clone(), Handle::current());

        trigger.refresh().await.unwrap();

        assert!(state.is_feature_enabled());
        assert_eq!(state.settings(), Settings::default());
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_previous_settings() {
        let state = Arc::new(SettingsState::new());
        let good = UpdateTrigger::new(
            Arc::new(FakeRemote::new(true, Some(VALID))),
            state.clone(),
            Handle::current(),
        );
        good.refresh().await.unwrap();

        let bad = UpdateTrigger::new(
            Arc::new(FakeRemote::new(false, Some("{not json"))),
            state.clone(),
            Handle::current(),
        );
        bad.refresh().await.unwrap();

        assert!(!state.is_feature_enabled());
        assert_eq!(state.settings().hash_prefix_update_frequency, 10);
        assert_eq!(state.settings().filter_set_update_frequency, 60);
    }

    #[tokio::test]
    async fn test_missing_settings_blob_applies_toggle_only() {
        let remote = Arc::new(FakeRemote::new(true, None));
        let state = Arc::new(SettingsState::new());
        let trigger = UpdateTrigger::new(remote, state.clone(), Handle::current());

        trigger.refresh().await.unwrap();

        assert!(state.is_feature_enabled());
        assert_eq!(state.settings(), Settings::default());
    }

    async fn wait_until(state: &SettingsState, done: impl Fn(&SettingsSnapshot) -> bool) {
        for _ in 0..100 {
            if done(&state.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_loads_keep_newer_settings() {
        let state = Arc::new(SettingsState::new());
        let gate = Gate::new();
        let startup = UpdateTrigger::new(
            Arc::new(FakeRemote::new(false, Some("{not json")).gated(gate.clone())),
            state.clone(),
            Handle::current(),
        );
        let observers = ConfigRefreshObservers::new();
        observers.register(Arc::new(UpdateTrigger::new(
            Arc::new(FakeRemote::new(true, Some(VALID))),
            state.clone(),
            Handle::current(),
        )));

        // Startup load parks inside the remote read
        let startup_load = startup.start(true).unwrap();
        let entered = gate.clone();
        tokio::task::spawn_blocking(move || {
            entered.entered.wait();
        })
        .await
        .unwrap();

        // A config download lands and its load finishes first
        observers.notify_all();
        wait_until(&state, |s| s.settings.hash_prefix_update_frequency == 10).await;
        assert_eq!(state.settings().hash_prefix_update_frequency, 10);

        let release = gate.clone();
        tokio::task::spawn_blocking(move || {
            release.release.wait();
        })
        .await
        .unwrap();
        startup_load.await.unwrap();

        // The failed decode applied its toggle but not stale cadences
        assert!(!state.is_feature_enabled());
        assert_eq!(state.settings().hash_prefix_update_frequency, 10);
        assert_eq!(state.settings().filter_set_update_frequency, 60);
    }

    #[test]
    fn test_feature_state_reads_both_values() {
        let remote = FakeRemote::new(true, Some(VALID));
        assert_eq!(
            remote.feature_state(),
            FeatureState {
                enabled: true,
                settings_json: Some(VALID.to_string()),
            }
        );
    }

    struct CountingListener(AtomicUsize);

    impl ConfigRefreshListener for CountingListener {
        fn on_config_refreshed(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_observers_notify_all() {
        let observers = ConfigRefreshObservers::new();
        let a = Arc::new(CountingListener(AtomicUsize::new(0)));
        let b = Arc::new(CountingListener(AtomicUsize::new(0)));
        observers.register(a.clone());
        observers.register(b.clone());
        assert_eq!(observers.len(), 2);

        observers.notify_all();
        observers.notify_all();

        assert_eq!(a.0.load(Ordering::SeqCst), 2);
        assert_eq!(b.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_trigger_as_listener() {
        let remote = Arc::new(FakeRemote::new(true, Some(VALID)));
        let state = Arc::new(SettingsState::new());
        let observers = ConfigRefreshObservers::new();
        observers.register(Arc::new(UpdateTrigger::new(
            remote,
            state.clone(),
            Handle::current(),
        )));

        observers.notify_all();

        wait_until(&state, |s| s.enabled).await;
        assert!(state.is_feature_enabled());
        assert_eq!(state.settings().filter_set_update_frequency, 60);
    }
}
