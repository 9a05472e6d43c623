//! In-memory stand-ins for the privileged channel, used by unit tests.

use super::{ConfigfsProvisioner, GadgetController, GadgetParts, MemoryStore};
use crate::clock::{Clock, ManualClock, SystemClock};
use crate::config::Config;
use crate::error::SessionError;
use crate::hid::UsLayout;
use crate::privileged::{ExecResult, RootChannel};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every script and raw line; answers the probes a gadget needs.
pub(crate) struct FakeRoot {
    scripts: Mutex<Vec<String>>,
    raw: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
    udc_state: Mutex<String>,
    root_denied: AtomicBool,
    writers_available: AtomicBool,
    keyboard_ready: AtomicBool,
    mouse_ready: AtomicBool,
}

impl Default for FakeRoot {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            raw: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            udc_state: Mutex::new("not attached".to_string()),
            root_denied: AtomicBool::new(false),
            writers_available: AtomicBool::new(true),
            keyboard_ready: AtomicBool::new(false),
            mouse_ready: AtomicBool::new(false),
        }
    }
}

impl FakeRoot {
    /// Fail every script containing `needle`.
    pub fn fail_when(&self, needle: &str) {
        self.failures.lock().unwrap().push(needle.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn deny_root(&self) {
        self.root_denied.store(true, Ordering::SeqCst);
    }

    pub fn set_udc_state(&self, state: &str) {
        *self.udc_state.lock().unwrap() = state.to_string();
    }

    pub fn set_writers_available(&self, available: bool) {
        self.writers_available.store(available, Ordering::SeqCst);
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.count_runs(needle) > 0
    }

    pub fn count_runs(&self, needle: &str) -> usize {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }

    pub fn raw_lines(&self) -> Vec<String> {
        self.raw.lock().unwrap().clone()
    }

    fn answer(&self, script: &str) -> ExecResult {
        self.scripts.lock().unwrap().push(script.to_string());
        let ok = |stdout: &str| ExecResult::finished(0, stdout.to_string(), String::new(), Duration::ZERO);
        if self.failures.lock().unwrap().iter().any(|n| script.contains(n.as_str())) {
            return ExecResult::finished(1, String::new(), "injected failure".into(), Duration::ZERO);
        }
        if script == "id" {
            if self.root_denied.load(Ordering::SeqCst) {
                return ExecResult::finished(1, String::new(), "su: permission denied".into(), Duration::ZERO);
            }
            return ok("uid=0(root) gid=0(root)\n");
        }
        if script.starts_with("ls -1 /sys/class/udc") {
            return ok("dummy_udc.0\n");
        }
        if script.contains("/sys/class/udc/$UDC_NAME/state") {
            return ok(&format!("{}\n", self.udc_state.lock().unwrap()));
        }
        if script.contains("Bound to UDC") {
            return ok("Bound to UDC: dummy_udc.0\n");
        }
        ok("")
    }
}

#[async_trait]
impl RootChannel for FakeRoot {
    async fn exec(&self, script: &str, _timeout: Duration) -> ExecResult {
        self.answer(script)
    }

    async fn exec_direct(&self, script: &str, _timeout: Duration) -> ExecResult {
        self.answer(script)
    }

    async fn send_raw(&self, line: &str) -> Result<(), SessionError> {
        self.raw.lock().unwrap().push(line.to_string());
        Ok(())
    }

    async fn open_hid_writers(&self, keyboard: Option<&str>, mouse: Option<&str>) -> (bool, bool) {
        let available = self.writers_available.load(Ordering::SeqCst);
        let kbd = available && keyboard.is_some();
        let mouse = available && mouse.is_some();
        self.keyboard_ready.store(kbd, Ordering::SeqCst);
        self.mouse_ready.store(mouse, Ordering::SeqCst);
        (kbd, mouse)
    }

    async fn close_hid_writers(&self) {
        self.keyboard_ready.store(false, Ordering::SeqCst);
        self.mouse_ready.store(false, Ordering::SeqCst);
    }

    fn keyboard_writer_ready(&self) -> bool {
        self.keyboard_ready.load(Ordering::SeqCst)
    }

    fn mouse_writer_ready(&self) -> bool {
        self.mouse_ready.load(Ordering::SeqCst)
    }
}

/// A controller on virtual time with polling off.
pub(crate) fn controller(root: Arc<FakeRoot>) -> (GadgetController, Arc<MemoryStore>) {
    let config = Config {
        udc_poll_interval_ms: 0,
        ..Config::default()
    };
    controller_with(root, config, true)
}

pub(crate) fn controller_with(
    root: Arc<FakeRoot>,
    config: Config,
    virtual_time: bool,
) -> (GadgetController, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let clock: Arc<dyn Clock> = if virtual_time {
        Arc::new(ManualClock::default())
    } else {
        Arc::new(SystemClock)
    };
    let parts = GadgetParts {
        root,
        provisioner: Arc::new(ConfigfsProvisioner::new(config.configfs_root.clone())),
        store: store.clone(),
        keymap: Arc::new(UsLayout),
        clock,
    };
    (GadgetController::from_parts(config, parts), store)
}
