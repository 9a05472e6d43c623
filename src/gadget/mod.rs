//! The device session layer: gadget lifecycle, HID writes and script runs.
//!
//! A [`GadgetController`] is the one context object every collaborator is
//! handed. It owns the privileged channel, the provisioning scripts, the
//! persisted active record and the status snapshot, and drives the lifecycle
//!
//! ```text
//! IDLE -> ACTIVATING -> ACTIVE -> (deactivate / panic stop) -> IDLE
//!              \-> ERROR -> ACTIVATING ...
//! ```
//!
//! Status is published on a [`watch`] channel and execution events on a
//! [`broadcast`] channel, so any number of observers can attach.

mod exec;
mod io;
mod poller;
pub mod provision;
pub mod status;
pub mod store;
pub mod timing;

#[cfg(test)]
pub(crate) mod fake;

pub use exec::Execution;
pub use provision::{ConfigfsProvisioner, Provisioner};
pub use status::{GadgetState, GadgetStatus, Profile, Role};
pub use store::{ActiveRecord, JsonFileStore, MemoryStore, StateStore};
pub use timing::TimingModel;

use crate::backend::WaitTarget;
use crate::cancel::CancelRegistry;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::GadgetError;
use crate::event::ExecEvent;
use crate::hid::{Keymap, UsLayout};
use crate::privileged::{PrivilegedShell, RootChannel};
use provision::{parse_controller_property, parse_udc_list};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OnceCell, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const PROVISION_TIMEOUT: Duration = Duration::from_secs(30);
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(20);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 1024;

/// Failures closer together than this count as repeated.
const FAILURE_WINDOW_MS: u64 = 10_000;

/// The pluggable pieces of a controller.
pub struct GadgetParts {
    pub root: Arc<dyn RootChannel>,
    pub provisioner: Arc<dyn Provisioner>,
    pub store: Arc<dyn StateStore>,
    pub keymap: Arc<dyn Keymap>,
    pub clock: Arc<dyn Clock>,
}

impl GadgetParts {
    /// Real implementations: `su`-style elevation, configfs, a JSON state file.
    pub fn from_config(config: &Config) -> Self {
        Self {
            root: Arc::new(PrivilegedShell::new(config.elevate.clone())),
            provisioner: Arc::new(ConfigfsProvisioner::new(config.configfs_root.clone())),
            store: Arc::new(JsonFileStore::new(config.state_file_path())),
            keymap: Arc::new(UsLayout),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Consecutive write failures within [`FAILURE_WINDOW_MS`] of each other.
#[derive(Debug, Default)]
struct FailureTracker {
    consecutive: u32,
    last_failure_ms: Option<u64>,
}

impl FailureTracker {
    fn success(&mut self) {
        self.consecutive = 0;
        self.last_failure_ms = None;
    }

    /// Record a failure at `now_ms`; `true` when a slowdown is due.
    fn failure(&mut self, now_ms: u64) -> bool {
        self.consecutive = match self.last_failure_ms {
            Some(last) if now_ms.saturating_sub(last) <= FAILURE_WINDOW_MS => self.consecutive + 1,
            _ => 1,
        };
        self.last_failure_ms = Some(now_ms);
        if self.consecutive >= 2 {
            self.consecutive = 0;
            return true;
        }
        false
    }
}

struct Inner {
    config: Config,
    root: Arc<dyn RootChannel>,
    provisioner: Arc<dyn Provisioner>,
    store: Arc<dyn StateStore>,
    keymap: Arc<dyn Keymap>,
    clock: Arc<dyn Clock>,
    status: watch::Sender<GadgetStatus>,
    events: broadcast::Sender<ExecEvent>,
    cancel: Arc<CancelRegistry>,
    active: Mutex<Option<ActiveRecord>>,
    timing: Mutex<TimingModel>,
    failures: Mutex<FailureTracker>,
    delay_floor_us: OnceCell<u32>,
    poller: Mutex<Option<JoinHandle<()>>>,
    last_udc_state: Mutex<Option<String>>,
    lifecycle: tokio::sync::Mutex<()>,
}

/// Handle to the device session. Cheap to clone.
#[derive(Clone)]
pub struct GadgetController {
    inner: Arc<Inner>,
}

impl GadgetController {
    pub fn new(config: Config) -> Self {
        let parts = GadgetParts::from_config(&config);
        Self::from_parts(config, parts)
    }

    pub fn from_parts(config: Config, parts: GadgetParts) -> Self {
        let (status, _) = watch::channel(GadgetStatus::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let timing = TimingModel::new(config.typing_speed_factor, config.risky_fast_mode);
        Self {
            inner: Arc::new(Inner {
                root: parts.root,
                provisioner: parts.provisioner,
                store: parts.store,
                keymap: parts.keymap,
                clock: parts.clock,
                status,
                events,
                cancel: CancelRegistry::new(),
                active: Mutex::new(None),
                timing: Mutex::new(timing),
                failures: Mutex::new(FailureTracker::default()),
                delay_floor_us: OnceCell::new(),
                poller: Mutex::new(None),
                last_udc_state: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    /// The current status snapshot.
    pub fn status(&self) -> GadgetStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<GadgetStatus> {
        self.inner.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecEvent> {
        self.inner.events.subscribe()
    }

    pub fn typing_speed_factor(&self) -> f64 {
        self.timing().factor()
    }

    /// Set the typing-speed factor; returns the clamped value in effect.
    pub fn set_typing_speed_factor(&self, factor: f64) -> f64 {
        let applied = self
            .inner
            .timing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_factor(factor);
        info!(factor = applied, "typing speed factor set");
        applied
    }

    pub fn set_risky_fast_mode(&self, enabled: bool) {
        self.inner
            .timing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_risky(enabled);
        info!(enabled, "risky fast mode");
    }

    fn timing(&self) -> TimingModel {
        *self.inner.timing.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_record(&self) -> Option<ActiveRecord> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_active_record(&self, record: Option<ActiveRecord>) {
        *self.inner.active.lock().unwrap_or_else(|e| e.into_inner()) = record;
    }

    /// Apply `f` to the status and publish the result, with writer readiness
    /// refreshed from the privileged channel.
    fn update_status(&self, f: impl FnOnce(&mut GadgetStatus)) -> GadgetStatus {
        let kbd = self.inner.root.keyboard_writer_ready();
        let mouse = self.inner.root.mouse_writer_ready();
        self.inner.status.send_modify(|s| {
            f(s);
            s.keyboard_writer_ready = kbd;
            s.mouse_writer_ready = mouse;
        });
        self.status()
    }

    fn transition(&self, next: GadgetState, profile_id: Option<String>, message: Option<String>) {
        let current = self.status().state;
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "unexpected gadget state transition");
        }
        info!(from = %current, to = %next, profile = profile_id.as_deref().unwrap_or(""), "gadget state");
        self.update_status(|s| {
            s.state = next;
            s.active_profile_id = profile_id;
            s.message = message;
        });
    }

    /// Enter ERROR and hand back the matching activation error.
    fn fail_activation(&self, message: String) -> GadgetError {
        error!(%message, "gadget activation failed");
        self.update_status(|s| {
            s.state = GadgetState::Error;
            s.message = Some(message.clone());
        });
        GadgetError::Activation(message)
    }

    async fn ensure_configfs(&self) -> bool {
        let p = &self.inner.provisioner;
        if self.inner.root.exec(&p.configfs_check(), PROBE_TIMEOUT).await.ok {
            return true;
        }
        debug!("configfs not mounted; trying to mount it");
        self.inner.root.exec(&p.configfs_mount(), MOUNT_TIMEOUT).await.ok
    }

    /// Controllers gadgets can bind to.
    pub async fn list_udcs(&self) -> Vec<String> {
        let p = &self.inner.provisioner;
        let listed = self.inner.root.exec(&p.list_udcs(), PROBE_TIMEOUT).await;
        let udcs = parse_udc_list(&listed.stdout);
        if !udcs.is_empty() {
            return udcs;
        }
        let prop = self.inner.root.exec(&p.controller_property(), PROBE_TIMEOUT).await;
        parse_controller_property(&prop.stdout).into_iter().collect()
    }

    async fn is_bound(&self, gadget_dir: &str) -> bool {
        let script = self.inner.provisioner.bound_check(gadget_dir);
        self.inner.root.exec(&script, PROBE_TIMEOUT).await.ok
    }

    /// (root, configfs, controllers)
    async fn probe_support(&self) -> (bool, bool, Vec<String>) {
        let root_ok = self.inner.root.has_root().await;
        if !root_ok {
            return (false, false, Vec::new());
        }
        let configfs_ok = self.ensure_configfs().await;
        let udcs = self.list_udcs().await;
        (root_ok, configfs_ok, udcs)
    }

    /// Re-probe the host and publish a fresh status.
    ///
    /// With `restore`, an idle controller picks up a gadget recorded as
    /// active by an earlier process if that gadget is still bound, and clears
    /// the record otherwise.
    pub async fn refresh_status(&self, restore: bool) -> GadgetStatus {
        let _guard = if restore {
            Some(self.inner.lifecycle.lock().await)
        } else {
            None
        };
        let (root_ok, configfs_ok, udcs) = self.probe_support().await;
        let support_ok = root_ok && configfs_ok && !udcs.is_empty();

        if restore && root_ok && self.status().state == GadgetState::Idle {
            if let Some(record) = self.inner.store.load() {
                if self.is_bound(&record.gadget_dir).await {
                    info!(profile = %record.profile_id, dir = %record.gadget_dir, "restoring active gadget");
                    self.inner
                        .root
                        .open_hid_writers(record.keyboard_device.as_deref(), record.mouse_device.as_deref())
                        .await;
                    let profile_id = record.profile_id.clone();
                    self.set_active_record(Some(record));
                    self.transition(GadgetState::Active, Some(profile_id), None);
                    self.start_polling();
                } else {
                    debug!(dir = %record.gadget_dir, "recorded gadget no longer bound; clearing");
                    if let Err(e) = self.inner.store.clear() {
                        warn!(error = %e, "failed to clear gadget state");
                    }
                }
            }
        }

        self.update_status(|s| {
            s.root_available = root_ok;
            s.support_available = support_ok;
            s.udc_list = udcs;
        })
    }

    /// Provision `profile`, bind it and open the HID writers.
    pub async fn activate(&self, profile: &Profile) -> Result<(), GadgetError> {
        let _guard = self.inner.lifecycle.lock().await;
        let current = self.status().state;
        if matches!(current, GadgetState::Active | GadgetState::Activating) {
            return Err(GadgetError::InvalidState(current.to_string()));
        }
        self.transition(
            GadgetState::Activating,
            Some(profile.id.clone()),
            Some("Creating gadget…".to_string()),
        );

        let (root_ok, configfs_ok, udcs) = self.probe_support().await;
        self.update_status(|s| {
            s.root_available = root_ok;
            s.support_available = root_ok && configfs_ok && !udcs.is_empty();
            s.udc_list = udcs.clone();
        });
        if !root_ok {
            return Err(self.fail_activation("Root not available (elevation denied).".to_string()));
        }
        if !configfs_ok || udcs.is_empty() {
            return Err(self.fail_activation(
                "USB gadget support not detected (configfs/UDC missing).".to_string(),
            ));
        }

        let gadget_dir = profile.gadget_dir();
        let script = self.inner.provisioner.create_and_bind(profile);
        let result = self.inner.root.exec(&script, PROVISION_TIMEOUT).await;
        if !result.ok {
            return Err(self.fail_activation(format!(
                "Activation failed (exit={}). {}",
                result.exit_code,
                result.diagnostic()
            )));
        }
        debug!(output = %result.stdout.trim(), "gadget bound");

        let prefix = &self.inner.config.hid_device_prefix;
        let record = ActiveRecord {
            profile_id: profile.id.clone(),
            role: profile.role,
            gadget_dir,
            keyboard_device: profile.role.keyboard_device(prefix),
            mouse_device: profile.role.mouse_device(prefix),
        };
        if let Err(e) = self.inner.store.save(&record) {
            warn!(error = %e, "failed to persist active gadget");
        }
        let (kbd, mouse) = self
            .inner
            .root
            .open_hid_writers(record.keyboard_device.as_deref(), record.mouse_device.as_deref())
            .await;
        if (record.keyboard_device.is_some() && !kbd) || (record.mouse_device.is_some() && !mouse) {
            warn!("persistent HID writers unavailable; falling back to per-write opens");
        }
        self.set_active_record(Some(record));
        self.transition(GadgetState::Active, Some(profile.id.clone()), None);
        info!(profile = %profile.id, role = profile.role.as_str(), "gadget active");
        self.start_polling();
        Ok(())
    }

    /// Unbind and remove the active gadget. A no-op when idle or mid-activation.
    pub async fn deactivate(&self) -> Result<(), GadgetError> {
        let _guard = self.inner.lifecycle.lock().await;
        match self.status().state {
            GadgetState::Idle | GadgetState::Activating => return Ok(()),
            GadgetState::Active | GadgetState::Error => {}
        }
        self.teardown().await;
        info!("gadget deactivated");
        Ok(())
    }

    /// Best-effort teardown regardless of state.
    pub async fn panic_stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        warn!("panic stop");
        self.teardown().await;
        info!("panic stop complete");
    }

    async fn teardown(&self) {
        self.stop_polling();
        self.release_all_keys().await;
        self.inner.root.close_hid_writers().await;

        let dir = self
            .active_record()
            .map(|r| r.gadget_dir)
            .or_else(|| self.inner.store.load().map(|r| r.gadget_dir));
        let script = match dir {
            Some(dir) => self.inner.provisioner.unbind_and_cleanup(&dir),
            None => self.inner.provisioner.panic_stop(),
        };
        let result = self.inner.root.exec(&script, TEARDOWN_TIMEOUT).await;
        if !result.ok {
            warn!(exit_code = result.exit_code, stderr = %result.diagnostic(), "gadget cleanup reported errors");
        }
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "failed to clear gadget state");
        }
        self.set_active_record(None);
        self.transition(GadgetState::Idle, None, None);
        self.update_status(|s| {
            s.device_connected = false;
            s.udc_state = None;
        });
    }

    fn start_polling(&self) {
        self.stop_polling();
        let interval = self.inner.config.udc_poll_interval_ms;
        if interval == 0 {
            return;
        }
        let task = poller::spawn(self, Duration::from_millis(interval));
        *self.inner.poller.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    fn stop_polling(&self) {
        if let Some(task) = self.inner.poller.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
            debug!("stopped UDC state polling");
        }
        *self.inner.last_udc_state.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Sample the bound controller's state once and publish any change.
    pub async fn poll_udc_once(&self) -> Option<String> {
        if !self.status().is_active() {
            return None;
        }
        let dir = self.active_record()?.gadget_dir;
        let script = self.inner.provisioner.udc_state(&dir);
        let result = self.inner.root.exec(&script, Duration::from_secs(3)).await;
        let state = if result.ok {
            Some(result.stdout.trim().to_string()).filter(|s| !s.is_empty())
        } else {
            None
        };

        let changed = {
            let mut last = self.inner.last_udc_state.lock().unwrap_or_else(|e| e.into_inner());
            if *last != state {
                *last = state.clone();
                true
            } else {
                false
            }
        };
        if changed {
            let connected = state.as_deref() == Some("configured");
            self.update_status(|s| {
                s.device_connected = connected;
                s.udc_state = state.clone();
            });
            let shown = state.as_deref().unwrap_or("unknown");
            if connected {
                info!(udc_state = shown, "host connected");
            } else {
                info!(udc_state = shown, "host disconnected");
            }
        }
        state
    }

    pub fn is_host_connected(&self) -> bool {
        self.status().host_connected()
    }

    pub fn is_udc_configured(&self) -> bool {
        self.status().udc_configured()
    }

    /// Poll the status every 200 ms until `pred` holds or `timeout_ms` passes.
    async fn wait_until(&self, timeout_ms: u64, pred: impl Fn(&GadgetStatus) -> bool) -> bool {
        let clock = &self.inner.clock;
        let start = clock.now_ms();
        while clock.now_ms().saturating_sub(start) < timeout_ms {
            if pred(&self.status()) {
                return true;
            }
            clock.sleep(Duration::from_millis(200)).await;
        }
        pred(&self.status())
    }

    pub async fn wait_for_host_connected(&self, timeout_ms: u64) -> bool {
        self.wait_until(timeout_ms, GadgetStatus::host_connected).await
    }

    /// Block until `target` holds. `false` once `timeout_ms` has passed.
    pub async fn wait_for(&self, target: WaitTarget, timeout_ms: u64) -> bool {
        match target {
            WaitTarget::Nothing => true,
            WaitTarget::HostConnected => self.wait_for_host_connected(timeout_ms).await,
            WaitTarget::UdcConfigured => {
                self.wait_until(timeout_ms, GadgetStatus::udc_configured).await
            }
            WaitTarget::KeyboardReady => {
                self.wait_until(timeout_ms, |s| s.is_active() && s.keyboard_writer_ready)
                    .await
            }
            WaitTarget::MouseReady => {
                self.wait_until(timeout_ms, |s| s.is_active() && s.mouse_writer_ready)
                    .await
            }
            WaitTarget::Active => self.wait_until(timeout_ms, GadgetStatus::is_active).await,
        }
    }

    fn record_write_success(&self) {
        self.inner.failures.lock().unwrap_or_else(|e| e.into_inner()).success();
    }

    fn record_write_failure(&self) {
        let now = self.inner.clock.now_ms();
        let due = self
            .inner
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .failure(now);
        if !due {
            return;
        }
        let slowed = self
            .inner
            .timing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .slow_down();
        if let Some(factor) = slowed {
            warn!(factor, "repeated write failures; slowing typing down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeRoot, controller};
    use super::*;
    use serde_json::json;

    fn profile(role: &str) -> Profile {
        Profile::from_json(&json!({"id": "abc123", "roleType": role})).unwrap()
    }

    #[test]
    fn test_failure_tracker_window() {
        let mut t = FailureTracker::default();
        assert!(!t.failure(1_000));
        assert!(t.failure(5_000));
        // Counter restarts after a slowdown.
        assert!(!t.failure(6_000));
        assert!(!t.failure(30_000));
        t.success();
        assert!(!t.failure(30_500));
    }

    #[tokio::test]
    async fn test_activate_reaches_active_with_writers() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, store) = controller(Arc::clone(&root));
        gadget.activate(&profile("composite")).await.unwrap();

        let status = gadget.status();
        assert_eq!(status.state, GadgetState::Active);
        assert_eq!(status.active_profile_id.as_deref(), Some("abc123"));
        assert!(status.keyboard_writer_ready);
        assert!(status.mouse_writer_ready);
        assert_eq!(status.udc_list, vec!["dummy_udc.0"]);

        let record = store.load().unwrap();
        assert_eq!(record.gadget_dir, "gadgetfs_abc123");
        assert_eq!(record.mouse_device.as_deref(), Some("/dev/hidg1"));
        assert!(root.ran("Bound to UDC"));

        let err = gadget.activate(&profile("mouse")).await.unwrap_err();
        assert!(matches!(err, GadgetError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_activation_failure_enters_error() {
        let root = Arc::new(FakeRoot::default());
        root.fail_when("Bound to UDC");
        let (gadget, store) = controller(Arc::clone(&root));
        let err = gadget.activate(&profile("keyboard")).await.unwrap_err();
        assert!(matches!(err, GadgetError::Activation(_)));
        let status = gadget.status();
        assert_eq!(status.state, GadgetState::Error);
        assert!(status.message.unwrap().starts_with("Activation failed (exit=1)"));
        assert!(store.load().is_none());

        // ERROR -> ACTIVATING is allowed.
        root.clear_failures();
        gadget.activate(&profile("keyboard")).await.unwrap();
        assert!(gadget.status().is_active());
    }

    #[tokio::test]
    async fn test_activation_without_root() {
        let root = Arc::new(FakeRoot::default());
        root.deny_root();
        let (gadget, _) = controller(root);
        let err = gadget.activate(&profile("keyboard")).await.unwrap_err();
        assert!(err.to_string().contains("Root not available"));
        assert!(!gadget.status().root_available);
    }

    #[tokio::test]
    async fn test_deactivate_and_panic_stop() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, store) = controller(Arc::clone(&root));
        gadget.deactivate().await.unwrap();
        assert!(!root.ran("gadgetfs_"));

        gadget.activate(&profile("keyboard")).await.unwrap();
        gadget.deactivate().await.unwrap();
        assert_eq!(gadget.status().state, GadgetState::Idle);
        assert!(!gadget.status().keyboard_writer_ready);
        assert!(store.load().is_none());
        assert!(root.ran("[ -d \"$G\" ] || exit 0"));
        // All-keys-up went out before the writers closed.
        assert!(root.raw_lines().iter().any(|l| l.starts_with(r"printf '\000\000")));

        gadget.panic_stop().await;
        assert_eq!(gadget.status().state, GadgetState::Idle);
        assert!(root.ran("for U in \"$CFGBASE\"/*/UDC"));
    }

    #[tokio::test]
    async fn test_refresh_restores_bound_gadget() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, store) = controller(Arc::clone(&root));
        store
            .save(&ActiveRecord {
                profile_id: "p9".into(),
                role: Role::Keyboard,
                gadget_dir: "gadgetfs_p9".into(),
                keyboard_device: Some("/dev/hidg0".into()),
                mouse_device: None,
            })
            .unwrap();

        let status = gadget.refresh_status(true).await;
        assert_eq!(status.state, GadgetState::Active);
        assert_eq!(status.active_profile_id.as_deref(), Some("p9"));
        assert!(status.keyboard_writer_ready);
        assert!(!status.mouse_writer_ready);
        assert!(status.support_available);
    }

    #[tokio::test]
    async fn test_refresh_clears_stale_record() {
        let root = Arc::new(FakeRoot::default());
        root.fail_when("test -s");
        let (gadget, store) = controller(Arc::clone(&root));
        store
            .save(&ActiveRecord {
                profile_id: "p9".into(),
                role: Role::Mouse,
                gadget_dir: "gadgetfs_p9".into(),
                keyboard_device: None,
                mouse_device: Some("/dev/hidg0".into()),
            })
            .unwrap();
        let status = gadget.refresh_status(true).await;
        assert_eq!(status.state, GadgetState::Idle);
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_poll_publishes_changes() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, _) = controller(Arc::clone(&root));
        assert_eq!(gadget.poll_udc_once().await, None);

        gadget.activate(&profile("keyboard")).await.unwrap();
        let mut rx = gadget.subscribe_status();
        root.set_udc_state("configured");
        assert_eq!(gadget.poll_udc_once().await.as_deref(), Some("configured"));
        assert!(rx.has_changed().unwrap());
        assert!(gadget.is_host_connected());
        assert!(gadget.is_udc_configured());

        root.set_udc_state("not attached");
        gadget.poll_udc_once().await;
        assert!(!gadget.is_host_connected());
        assert_eq!(gadget.status().udc_state.as_deref(), Some("not attached"));
    }

    #[tokio::test]
    async fn test_wait_for_host_times_out_on_virtual_clock() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, _) = controller(root);
        let start = gadget.clock().now_ms();
        assert!(!gadget.wait_for_host_connected(1_000).await);
        assert!(gadget.clock().now_ms() - start >= 1_000);
    }

    #[test]
    fn test_speed_factor_is_clamped() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, _) = controller(root);
        assert_eq!(gadget.set_typing_speed_factor(50.0), 10.0);
        assert_eq!(gadget.typing_speed_factor(), 10.0);
    }
}
