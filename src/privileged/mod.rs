//! The elevated shell every gadget operation goes through.
//!
//! [`PrivilegedShell`] keeps one long-lived elevated process (the configured
//! `elevate` argv, `su` by default) and talks to it over its stdio pipes.
//! Requests are framed with per-request markers (see [`framing`]) and
//! strictly serialized. HID reports take a separate raw path: the session
//! holds the device nodes open on fds 3 and 4 and each report is a single
//! unframed `printf` line that nobody waits on.
//!
//! When no session can be established, requests fall back to spawning a
//! throwaway elevated process per call. That path has no raw writers.

pub mod framing;
pub mod reader;
mod session;

pub use session::ShellSession;

use crate::error::SessionError;
use crate::hid::printf_escape;
use async_trait::async_trait;
use framing::sh_quote;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Session fd holding the keyboard node open.
pub const KEYBOARD_FD: u8 = 3;
/// Session fd holding the mouse node open.
pub const MOUSE_FD: u8 = 4;

const SANITY_TIMEOUT: Duration = Duration::from_secs(5);
const WRITER_OPEN_TIMEOUT: Duration = Duration::from_secs(6);
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(4);

/// Outcome of one privileged request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code 0 and no "permission denied" on stderr.
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ExecResult {
    pub fn finished(exit_code: i32, stdout: String, stderr: String, duration: Duration) -> Self {
        let denied = stderr.to_ascii_lowercase().contains("permission denied");
        Self {
            ok: exit_code == 0 && !denied,
            exit_code,
            stdout,
            stderr,
            duration,
            timed_out: false,
        }
    }

    pub fn failure(exit_code: i32, stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            ok: false,
            exit_code,
            stdout,
            stderr,
            duration,
            timed_out: false,
        }
    }

    /// A request that did not finish in time, with whatever was captured.
    pub fn timeout(timeout: Duration, stdout: String, stderr: String, duration: Duration) -> Self {
        let mut message = format!("timeout after {}ms", timeout.as_millis());
        if !stderr.is_empty() {
            message.push('\n');
            message.push_str(&stderr);
        }
        Self {
            ok: false,
            exit_code: -1,
            stdout,
            stderr: message,
            duration,
            timed_out: true,
        }
    }

    /// `true` when a `KEY=1` line is present on stdout.
    pub fn flag(&self, key: &str) -> bool {
        self.stdout
            .lines()
            .any(|l| l.trim().strip_prefix(key).and_then(|r| r.strip_prefix('=')) == Some("1"))
    }

    /// Trimmed stdout lines that are not empty.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().map(str::trim).filter(|l| !l.is_empty())
    }

    /// Stderr if there is any, else stdout; for error messages.
    pub fn diagnostic(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim().to_string()
        } else {
            err.to_string()
        }
    }
}

/// A channel that runs shell text with root privileges.
#[async_trait]
pub trait RootChannel: Send + Sync {
    /// Run `script` isolated in a nested shell.
    async fn exec(&self, script: &str, timeout: Duration) -> ExecResult;

    /// Run `script` in the session shell so fd changes persist.
    async fn exec_direct(&self, script: &str, timeout: Duration) -> ExecResult;

    /// Send one unframed line; nothing is read back.
    async fn send_raw(&self, line: &str) -> Result<(), SessionError>;

    /// Open the HID writers. Returns the (keyboard, mouse) readiness.
    async fn open_hid_writers(&self, keyboard: Option<&str>, mouse: Option<&str>) -> (bool, bool);

    async fn close_hid_writers(&self);

    fn keyboard_writer_ready(&self) -> bool;

    fn mouse_writer_ready(&self) -> bool;

    async fn write_keyboard_fast(&self, report: &[u8]) -> Result<(), SessionError> {
        if !self.keyboard_writer_ready() {
            return Err(SessionError::WriterNotReady("keyboard"));
        }
        self.send_raw(&raw_write_line(KEYBOARD_FD, report)).await
    }

    async fn write_mouse_fast(&self, report: &[u8]) -> Result<(), SessionError> {
        if !self.mouse_writer_ready() {
            return Err(SessionError::WriterNotReady("mouse"));
        }
        self.send_raw(&raw_write_line(MOUSE_FD, report)).await
    }

    async fn has_root(&self) -> bool {
        let r = self.exec("id", Duration::from_secs(3)).await;
        r.ok && r.stdout.contains("uid=0")
    }
}

/// The unframed line writing `bytes` to session fd `fd`.
pub fn raw_write_line(fd: u8, bytes: &[u8]) -> String {
    format!("printf '{}' >&{fd}", printf_escape(bytes))
}

/// Script writing `bytes` straight to `path`; used when no writer fd is open.
pub fn path_write_script(path: &str, bytes: &[u8]) -> String {
    format!("printf '{}' > {}", printf_escape(bytes), sh_quote(path))
}

fn open_writers_script(keyboard: Option<&str>, mouse: Option<&str>) -> String {
    let mut script = format!(
        "K={}\nM={}\nexec {KEYBOARD_FD}>&- {MOUSE_FD}>&-\n",
        sh_quote(keyboard.unwrap_or("")),
        sh_quote(mouse.unwrap_or(""))
    );
    for (var, fd) in [("K", KEYBOARD_FD), ("M", MOUSE_FD)] {
        script.push_str(&format!(
            "if [ -n \"${var}\" ]; then\n  i=0\n  while [ $i -lt 60 ] && [ ! -e \"${var}\" ]; do sleep 0.05; i=$((i+1)); done\n  command exec {fd}> \"${var}\"\nfi\n"
        ));
    }
    script.push_str(&format!(
        "FD3_OK=0\nFD4_OK=0\n[ -e /proc/$$/fd/{KEYBOARD_FD} ] && FD3_OK=1\n[ -e /proc/$$/fd/{MOUSE_FD} ] && FD4_OK=1\necho \"FD3_OK=$FD3_OK\"\necho \"FD4_OK=$FD4_OK\"\n"
    ));
    script.push_str("ok=1\n[ -n \"$K\" ] && [ \"$FD3_OK\" != 1 ] && ok=0\n[ -n \"$M\" ] && [ \"$FD4_OK\" != 1 ] && ok=0\n[ $ok -eq 1 ]");
    script
}

/// Long-lived elevated shell with recreation on failure.
pub struct PrivilegedShell {
    elevate: Vec<String>,
    session: Mutex<Option<ShellSession>>,
    seq: AtomicU64,
    keyboard_ready: AtomicBool,
    mouse_ready: AtomicBool,
}

impl PrivilegedShell {
    pub fn new(elevate: Vec<String>) -> Self {
        Self {
            elevate,
            session: Mutex::new(None),
            seq: AtomicU64::new(0),
            keyboard_ready: AtomicBool::new(false),
            mouse_ready: AtomicBool::new(false),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn reset_writers(&self) {
        self.keyboard_ready.store(false, Ordering::SeqCst);
        self.mouse_ready.store(false, Ordering::SeqCst);
    }

    /// Make sure `slot` holds a live, responsive session.
    async fn ensure_session(&self, slot: &mut Option<ShellSession>) -> bool {
        if let Some(session) = slot.as_mut() {
            if session.is_alive() {
                return true;
            }
            debug!("privileged session died; recreating");
        }
        if let Some(old) = slot.take() {
            old.close();
        }
        // A fresh shell has none of the old fds.
        self.reset_writers();

        let mut session = match ShellSession::spawn(&self.elevate) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to start privileged session");
                return false;
            }
        };
        let check = session.exec_sh(self.next_seq(), "id", SANITY_TIMEOUT).await;
        if !check.ok {
            warn!(exit_code = check.exit_code, stderr = %check.stderr.trim(), "privileged session sanity check failed");
            session.close();
            return false;
        }
        info!(id = %check.stdout.trim(), "privileged session ready");
        *slot = Some(session);
        true
    }

    async fn run(&self, script: &str, timeout: Duration, direct: bool) -> ExecResult {
        let mut slot = self.session.lock().await;
        if !self.ensure_session(&mut slot).await {
            drop(slot);
            return self.exec_oneshot(script, timeout).await;
        }
        let Some(session) = slot.as_mut() else {
            return ExecResult::failure(-1, String::new(), SessionError::NotAlive.to_string(), Duration::ZERO);
        };
        let seq = self.next_seq();
        let result = if direct {
            session.exec_direct(seq, script, timeout).await
        } else {
            session.exec_sh(seq, script, timeout).await
        };
        // Never reuse a session that stopped answering.
        if result.timed_out || !session.is_alive() {
            warn!(timed_out = result.timed_out, "dropping privileged session");
            if let Some(s) = slot.take() {
                s.close();
            }
            self.reset_writers();
        }
        result
    }

    /// Spawn a throwaway elevated process for a single request.
    async fn exec_oneshot(&self, script: &str, timeout: Duration) -> ExecResult {
        let started = Instant::now();
        let Some((program, args)) = self.elevate.split_first() else {
            return ExecResult::failure(-1, String::new(), SessionError::Unavailable.to_string(), Duration::ZERO);
        };
        let child = tokio::process::Command::new(program)
            .args(args)
            .arg("-c")
            .arg(framing::nested_sh(script))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => return ExecResult::failure(-1, String::new(), e.to_string(), started.elapsed()),
        };
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecResult::finished(
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
                started.elapsed(),
            ),
            Ok(Err(e)) => ExecResult::failure(-1, String::new(), e.to_string(), started.elapsed()),
            Err(_) => ExecResult::timeout(timeout, String::new(), String::new(), started.elapsed()),
        }
    }

    /// Tear down the session, if any.
    pub async fn shutdown(&self) {
        self.reset_writers();
        if let Some(s) = self.session.lock().await.take() {
            debug!("closing privileged session");
            s.close();
        }
    }
}

#[async_trait]
impl RootChannel for PrivilegedShell {
    async fn exec(&self, script: &str, timeout: Duration) -> ExecResult {
        self.run(script, timeout, false).await
    }

    async fn exec_direct(&self, script: &str, timeout: Duration) -> ExecResult {
        self.run(script, timeout, true).await
    }

    async fn send_raw(&self, line: &str) -> Result<(), SessionError> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(SessionError::NotAlive)?;
        if let Err(e) = session.send_raw(line).await {
            if let Some(s) = slot.take() {
                s.close();
            }
            self.reset_writers();
            return Err(e);
        }
        Ok(())
    }

    async fn open_hid_writers(&self, keyboard: Option<&str>, mouse: Option<&str>) -> (bool, bool) {
        let result = self
            .exec_direct(&open_writers_script(keyboard, mouse), WRITER_OPEN_TIMEOUT)
            .await;
        // The one-shot fallback cannot hold fds, so only a live session counts.
        let live = self.session.lock().await.is_some();
        let kbd = live && result.ok && keyboard.is_some() && result.flag("FD3_OK");
        let mouse_ok = live && result.ok && mouse.is_some() && result.flag("FD4_OK");
        self.keyboard_ready.store(kbd, Ordering::SeqCst);
        self.mouse_ready.store(mouse_ok, Ordering::SeqCst);
        info!(keyboard = kbd, mouse = mouse_ok, "HID writers opened");
        (kbd, mouse_ok)
    }

    async fn close_hid_writers(&self) {
        self.reset_writers();
        if self.session.lock().await.is_none() {
            return;
        }
        let script = format!("exec {KEYBOARD_FD}>&- {MOUSE_FD}>&-\necho FD3_CLOSED=1\necho FD4_CLOSED=1");
        let result = self.exec_direct(&script, WRITER_CLOSE_TIMEOUT).await;
        debug!(ok = result.ok, "HID writers closed");
    }

    fn keyboard_writer_ready(&self) -> bool {
        self.keyboard_ready.load(Ordering::SeqCst)
    }

    fn mouse_writer_ready(&self) -> bool {
        self.mouse_ready.load(Ordering::SeqCst)
    }
}

impl Drop for PrivilegedShell {
    fn drop(&mut self) {
        if let Some(s) = self.session.get_mut().take() {
            s.close();
        }
    }
}
