//! HID write paths: keyboard sequences, mouse reports and typing.
//!
//! Writes go through the session's persistent fds when they are open and
//! fall back to a script that opens the device node itself. Both paths are
//! retried with backoff, and repeated failures slow typing down.

use super::GadgetController;
use super::timing::{BASE_HOLD_US, BATCH_SIZE, CTRL_ALT_DEL_HOLD_US, FLUSH_EVERY_CHARS, FLUSH_PAUSE_MS, USLEEP_PROBE, shell_sleep_us};
use crate::error::{DeviceError, ErrorCode, GadgetError};
use crate::hid::{
    KEY_DELETE, KeyboardReport, MOD_LEFT_ALT, MOD_LEFT_CTRL, key_code_for, keyboard_report, mouse_report,
    printf_escape, strokes_for_text,
};
use crate::privileged::framing::sh_quote;
use crate::privileged::path_write_script;
use std::time::Duration;
use tracing::{debug, warn};

const WRITE_ATTEMPTS: usize = 3;
const RETRY_BACKOFF_MS: [u64; 2] = [200, 400];
const ACTIVE_POLL: Duration = Duration::from_millis(150);
const SEQUENCE_SCRIPT_TIMEOUT: Duration = Duration::from_secs(8);
const MOUSE_SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

fn all_up() -> KeyboardReport {
    keyboard_report(0, &[])
}

fn key_down(modifiers: u8, key: u8) -> KeyboardReport {
    if key == 0 {
        keyboard_report(modifiers, &[])
    } else {
        keyboard_report(modifiers, &[key])
    }
}

/// Script writing `reports` to `path` with the given gaps between them.
fn keyboard_sequence_script(path: &str, reports: &[KeyboardReport], delays_us: &[u32]) -> String {
    let mut s = format!("set -e\nP={}\n{USLEEP_PROBE}exec 3> \"$P\"\n", sh_quote(path));
    for (i, report) in reports.iter().enumerate() {
        s.push_str(&format!("printf '{}' >&3\n", printf_escape(report)));
        if let Some(&us) = delays_us.get(i).filter(|_| i + 1 < reports.len()) {
            if us > 0 {
                s.push_str(&shell_sleep_us(us));
            }
        }
    }
    s.push_str("exec 3>&-\n");
    s
}

impl GadgetController {
    /// Wait out the grace window for the gadget to become active.
    pub(crate) async fn wait_for_active(&self) -> bool {
        let clock = &self.inner.clock;
        let grace = self.inner.config.hid_active_grace_ms.min(5_000);
        let start = clock.now_ms();
        loop {
            if self.status().is_active() {
                return true;
            }
            if clock.now_ms().saturating_sub(start) >= grace {
                return false;
            }
            clock.sleep(ACTIVE_POLL).await;
        }
    }

    async fn ensure_active(&self) -> Result<(), GadgetError> {
        if self.wait_for_active().await {
            Ok(())
        } else {
            Err(GadgetError::not_active())
        }
    }

    fn keyboard_path(&self) -> Result<String, GadgetError> {
        self.active_record()
            .and_then(|r| r.keyboard_device)
            .ok_or(GadgetError::NoDevice("Keyboard"))
    }

    fn mouse_path(&self) -> Result<String, GadgetError> {
        self.active_record()
            .and_then(|r| r.mouse_device)
            .ok_or(GadgetError::NoDevice("Mouse"))
    }

    /// Whether the active profile exposes a mouse function.
    pub fn has_mouse(&self) -> bool {
        self.active_record().is_some_and(|r| r.mouse_device.is_some())
    }

    /// Sleep between retries, then make sure the gadget is still up.
    async fn before_retry(&self, attempt: usize) -> Result<(), GadgetError> {
        let backoff = RETRY_BACKOFF_MS[(attempt - 1).min(RETRY_BACKOFF_MS.len() - 1)];
        self.inner.clock.sleep(Duration::from_millis(backoff)).await;
        self.ensure_active().await
    }

    async fn keyboard_sequence_once(
        &self,
        path: &str,
        reports: &[KeyboardReport],
        delays_us: &[u32],
    ) -> Result<(), String> {
        let root = &self.inner.root;
        if root.keyboard_writer_ready() {
            match self.fast_keyboard_sequence(reports, delays_us).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!(error = %e, "fast keyboard write failed; using script path"),
            }
        }
        let script = keyboard_sequence_script(path, reports, delays_us);
        let result = root.exec(&script, SEQUENCE_SCRIPT_TIMEOUT).await;
        if result.ok {
            Ok(())
        } else {
            Err(result.diagnostic())
        }
    }

    async fn fast_keyboard_sequence(
        &self,
        reports: &[KeyboardReport],
        delays_us: &[u32],
    ) -> Result<(), crate::error::SessionError> {
        for (i, report) in reports.iter().enumerate() {
            self.inner.root.write_keyboard_fast(report).await?;
            if i + 1 < reports.len() {
                let us = delays_us.get(i).copied().unwrap_or(0);
                self.inner.clock.sleep(Duration::from_micros(us as u64)).await;
            }
        }
        Ok(())
    }

    /// Write `reports` in order; `delays_us[i]` is the gap after report `i`.
    pub async fn write_keyboard_sequence(
        &self,
        reports: &[KeyboardReport],
        delays_us: &[u32],
    ) -> Result<(), GadgetError> {
        if reports.is_empty() {
            return Ok(());
        }
        self.ensure_active().await?;
        let path = self.keyboard_path()?;
        let mut detail = String::new();
        for attempt in 0..WRITE_ATTEMPTS {
            if attempt > 0 {
                self.before_retry(attempt).await?;
            }
            match self.keyboard_sequence_once(&path, reports, delays_us).await {
                Ok(()) => {
                    self.record_write_success();
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "keyboard write failed");
                    self.record_write_failure();
                    detail = e;
                }
            }
        }
        Err(DeviceError::new(
            ErrorCode::HidWriteFailed,
            format!("Failed to write keyboard reports to {path} (retries={WRITE_ATTEMPTS}). {detail}"),
        )
        .into())
    }

    /// Write the full keyboard state.
    pub async fn write_keyboard_report(&self, modifiers: u8, keys: &[u8]) -> Result<(), GadgetError> {
        self.write_keyboard_sequence(&[keyboard_report(modifiers, keys)], &[])
            .await
    }

    /// Press and release `key` with `modifiers`. Key 0 taps the modifiers alone.
    pub async fn write_keyboard_tap_with_mods(&self, modifiers: u8, key: u8) -> Result<(), GadgetError> {
        let timing = self.timing();
        self.tap(key_down(modifiers, key), timing.hold_us(BASE_HOLD_US)).await
    }

    /// Press, hold for `hold_us`, release, then leave the inter-key gap.
    async fn tap(&self, down: KeyboardReport, hold_us: u32) -> Result<(), GadgetError> {
        self.write_keyboard_sequence(&[down, all_up()], &[hold_us]).await?;
        let gap = self.timing().inter_key_us();
        self.inner.clock.sleep(Duration::from_micros(gap as u64)).await;
        Ok(())
    }

    /// Write one mouse report.
    pub async fn write_mouse_report(&self, buttons: u8, dx: i32, dy: i32, wheel: i32) -> Result<(), GadgetError> {
        self.ensure_active().await?;
        let path = self.mouse_path()?;
        let report = mouse_report(buttons, dx, dy, wheel);
        let root = &self.inner.root;
        let mut detail = String::new();
        for attempt in 0..WRITE_ATTEMPTS {
            if attempt > 0 {
                self.before_retry(attempt).await?;
            }
            if root.mouse_writer_ready() {
                match root.write_mouse_fast(&report).await {
                    Ok(()) => {
                        self.record_write_success();
                        return Ok(());
                    }
                    Err(e) => debug!(error = %e, "fast mouse write failed; using script path"),
                }
            }
            let result = root
                .exec(&path_write_script(&path, &report), MOUSE_SCRIPT_TIMEOUT)
                .await;
            if result.ok {
                self.record_write_success();
                return Ok(());
            }
            detail = result.diagnostic();
            warn!(attempt = attempt + 1, error = %detail, "mouse write failed");
            self.record_write_failure();
        }
        Err(DeviceError::new(
            ErrorCode::HidMouseWriteFailed,
            format!("Failed to write mouse report to {path} (retries={WRITE_ATTEMPTS}). {detail}"),
        )
        .into())
    }

    /// Type `text`, pausing `per_char_delay_ms` after each character.
    ///
    /// Without a per-character delay keystrokes go out in batches, with a
    /// short pause every [`FLUSH_EVERY_CHARS`] characters so the host's input
    /// queue can drain.
    pub async fn type_string(&self, text: &str, per_char_delay_ms: u64) -> Result<(), GadgetError> {
        let strokes = strokes_for_text(
            self.inner.keymap.as_ref(),
            text,
            self.inner.config.unicode_fallback,
        );
        if strokes.is_empty() {
            return Ok(());
        }
        let timing = self.timing();
        let inter = timing.inter_key_us();
        let hold = timing.hold_us(BASE_HOLD_US);

        if per_char_delay_ms > 0 {
            for stroke in &strokes {
                self.tap(key_down(stroke.modifiers, stroke.key), hold).await?;
                self.inner
                    .clock
                    .sleep(Duration::from_millis(per_char_delay_ms))
                    .await;
            }
            return Ok(());
        }

        let mut typed = 0usize;
        let mut flushed = 0usize;
        for batch in strokes.chunks(BATCH_SIZE) {
            let mut reports = Vec::with_capacity(1 + batch.len() * 2);
            let mut delays = Vec::with_capacity(batch.len() * 2);
            reports.push(all_up());
            for stroke in batch {
                delays.push(inter);
                reports.push(key_down(stroke.modifiers, stroke.key));
                delays.push(hold);
                reports.push(all_up());
            }
            self.write_keyboard_sequence(&reports, &delays).await?;
            typed += batch.len();
            if typed / FLUSH_EVERY_CHARS > flushed {
                flushed = typed / FLUSH_EVERY_CHARS;
                self.inner
                    .clock
                    .sleep(Duration::from_millis(FLUSH_PAUSE_MS))
                    .await;
            }
        }
        Ok(())
    }

    /// Best-effort all-keys-up and buttons-up on whatever writers are open.
    pub(crate) async fn release_all_keys(&self) {
        let root = &self.inner.root;
        if root.keyboard_writer_ready() {
            if let Err(e) = root.write_keyboard_fast(&all_up()).await {
                debug!(error = %e, "keyboard release failed");
            }
        }
        if root.mouse_writer_ready() {
            if let Err(e) = root.write_mouse_fast(&mouse_report(0, 0, 0, 0)).await {
                debug!(error = %e, "mouse release failed");
            }
        }
    }

    /// One movement report, then a neutral one so no button stays down.
    pub async fn test_mouse_move(&self, dx: i32, dy: i32, wheel: i32, buttons: u8) -> Result<(), GadgetError> {
        self.write_mouse_report(buttons, dx, dy, wheel).await?;
        self.inner.clock.sleep(Duration::from_millis(20)).await;
        self.write_mouse_report(0, 0, 0, 0).await
    }

    /// Tap a named key (`ENTER`, `F5`, ...) or type `label` as text.
    pub async fn test_keyboard_key(&self, label: &str) -> Result<(), GadgetError> {
        match key_code_for(&label.trim().to_ascii_uppercase()) {
            Some(code) => self.write_keyboard_tap_with_mods(0, code).await,
            None => self.type_string(label, 0).await,
        }
    }

    pub async fn test_ctrl_alt_del(&self) -> Result<(), GadgetError> {
        let hold = self.timing().hold_us(CTRL_ALT_DEL_HOLD_US);
        self.tap(key_down(MOD_LEFT_CTRL | MOD_LEFT_ALT, KEY_DELETE), hold)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::{FakeRoot, controller};
    use super::*;
    use crate::gadget::Profile;
    use serde_json::json;
    use std::sync::Arc;

    async fn active(role: &str, root: &Arc<FakeRoot>) -> GadgetController {
        let (gadget, _) = controller(Arc::clone(root));
        let profile = Profile::from_json(&json!({"id": "p1", "roleType": role})).unwrap();
        gadget.activate(&profile).await.unwrap();
        gadget
    }

    #[test]
    fn test_sequence_script_layout() {
        let s = keyboard_sequence_script("/dev/hidg0", &[all_up(), key_down(0, 4)], &[600, 4000]);
        assert!(s.starts_with("set -e\nP='/dev/hidg0'\n"));
        assert!(s.contains("exec 3> \"$P\"\n"));
        assert!(s.contains(&format!("printf '{}' >&3\n", printf_escape(&key_down(0, 4)))));
        // Only the gap between the two reports is slept.
        assert_eq!(s.matches("$USLP 600").count(), 1);
        assert!(!s.contains("$USLP 4000"));
        assert!(s.ends_with("exec 3>&-\n"));
    }

    #[tokio::test]
    async fn test_not_active_is_reported() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, _) = controller(root);
        let err = gadget.write_keyboard_report(0, &[]).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::HidNotActive));
    }

    #[tokio::test]
    async fn test_typing_uses_fast_writer() {
        let root = Arc::new(FakeRoot::default());
        let gadget = active("keyboard", &root).await;
        let before = root.raw_lines().len();
        gadget.type_string("Hi", 0).await.unwrap();
        let lines = root.raw_lines();
        // up, then (down, up) per character.
        assert_eq!(lines.len() - before, 5);
        let shift_h = key_down(0x02, 0x0B);
        assert_eq!(lines[before + 1], format!("printf '{}' >&3", printf_escape(&shift_h)));
    }

    #[tokio::test]
    async fn test_falls_back_to_script_path() {
        let root = Arc::new(FakeRoot::default());
        root.set_writers_available(false);
        let gadget = active("composite", &root).await;
        gadget.write_keyboard_tap_with_mods(MOD_LEFT_CTRL, 0x06).await.unwrap();
        assert!(root.ran("P='/dev/hidg0'"));
        gadget.write_mouse_report(1, 5, 0, 0).await.unwrap();
        assert!(root.ran(&path_write_script("/dev/hidg1", &mouse_report(1, 5, 0, 0))));
    }

    #[tokio::test]
    async fn test_failed_writes_retry_then_slow_down() {
        let root = Arc::new(FakeRoot::default());
        root.set_writers_available(false);
        let gadget = active("keyboard", &root).await;
        root.fail_when("exec 3> \"$P\"");
        let err = gadget.test_keyboard_key("ENTER").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::HidWriteFailed));
        assert!(err.to_string().contains("retries=3"));
        assert!(gadget.typing_speed_factor() > 1.0);
    }

    #[tokio::test]
    async fn test_role_without_mouse() {
        let root = Arc::new(FakeRoot::default());
        let gadget = active("keyboard", &root).await;
        let err = gadget.test_mouse_move(10, 0, 0, 0).await.unwrap_err();
        assert!(matches!(err, GadgetError::NoDevice("Mouse")));
        assert!(!gadget.has_mouse());
        assert!(active("composite", &root).await.has_mouse());
    }

    #[tokio::test]
    async fn test_ctrl_alt_del_report() {
        let root = Arc::new(FakeRoot::default());
        let gadget = active("keyboard", &root).await;
        gadget.test_ctrl_alt_del().await.unwrap();
        let expected = format!("printf '{}' >&3", printf_escape(&key_down(0x05, KEY_DELETE)));
        assert!(root.raw_lines().contains(&expected));
    }
}
