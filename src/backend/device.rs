//! The backend that drives a live gadget.

use super::{ActionBackend, WaitTarget};
use crate::cancel::CancelToken;
use crate::error::{DeviceError, ErrorCode, ScriptError};
use crate::gadget::GadgetController;
use async_trait::async_trait;
use std::time::Duration;

/// Longest uninterrupted sleep; cancellation is checked between slices.
const SLEEP_SLICE_MS: u64 = 100;

pub struct DeviceBackend {
    gadget: GadgetController,
    cancel: Option<CancelToken>,
}

impl DeviceBackend {
    pub fn new(gadget: GadgetController) -> Self {
        Self {
            gadget,
            cancel: None,
        }
    }

    /// Cut long sleeps short once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn gadget(&self) -> &GadgetController {
        &self.gadget
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

#[async_trait]
impl ActionBackend for DeviceBackend {
    async fn ensure_host(&mut self) -> Result<(), ScriptError> {
        let timeout = self.gadget.config().host_wait_timeout_ms;
        if self.gadget.wait_for_host_connected(timeout).await {
            return Ok(());
        }
        Err(DeviceError::new(ErrorCode::HostDisconnected, "Host not connected").into())
    }

    async fn type_text(&mut self, text: &str, per_char_delay_ms: u64) -> Result<(), ScriptError> {
        Ok(self.gadget.type_string(text, per_char_delay_ms).await?)
    }

    async fn key_tap(&mut self, modifiers: u8, key: u8) -> Result<(), ScriptError> {
        Ok(self.gadget.write_keyboard_tap_with_mods(modifiers, key).await?)
    }

    async fn keyboard_report(&mut self, modifiers: u8, keys: &[u8]) -> Result<(), ScriptError> {
        Ok(self.gadget.write_keyboard_report(modifiers, keys).await?)
    }

    async fn mouse_report(
        &mut self,
        buttons: u8,
        dx: i32,
        dy: i32,
        wheel: i32,
    ) -> Result<(), ScriptError> {
        Ok(self.gadget.write_mouse_report(buttons, dx, dy, wheel).await?)
    }

    async fn sleep_ms(&mut self, ms: u64) {
        let clock = self.gadget.clock();
        let mut remaining = ms;
        while remaining > 0 && !self.cancelled() {
            let slice = remaining.min(SLEEP_SLICE_MS);
            clock.sleep(Duration::from_millis(slice)).await;
            remaining -= slice;
        }
    }

    async fn wait_for(&mut self, target: WaitTarget, timeout_ms: u64) -> Result<bool, ScriptError> {
        Ok(self.gadget.wait_for(target, timeout_ms).await)
    }

    fn now_ms(&self) -> u64 {
        self.gadget.clock().now_ms()
    }

    fn has_mouse(&self) -> bool {
        self.gadget.has_mouse()
    }
}
