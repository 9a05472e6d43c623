//! The seam between the interpreter and the world.
//!
//! [`Engine`](crate::engine::Engine) resolves control flow, scoping and
//! key/modifier bookkeeping itself and hands every leaf action to an
//! [`ActionBackend`]: [`DeviceBackend`] writes HID reports through the gadget
//! layer, [`EstimateBackend`] only adds up how long they would take.

mod device;
mod estimate;

pub use device::DeviceBackend;
pub use estimate::{DurationModel, EstimateBackend, estimate_duration_ms};

use crate::error::ScriptError;
use async_trait::async_trait;

/// Conditions `WAIT_FOR` can block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    /// Empty target: satisfied immediately.
    Nothing,
    HostConnected,
    UdcConfigured,
    KeyboardReady,
    MouseReady,
    Active,
}

impl WaitTarget {
    /// Resolve a `WAIT_FOR` argument. `None` for unsupported targets.
    pub fn parse(raw: &str) -> Option<Self> {
        let target = match raw.trim().to_ascii_uppercase().as_str() {
            "" => WaitTarget::Nothing,
            "HOST_CONNECTED" | "HOST" => WaitTarget::HostConnected,
            "UDC_CONFIGURED" | "UDC" => WaitTarget::UdcConfigured,
            "KEYBOARD_READY" | "KBD_READY" => WaitTarget::KeyboardReady,
            "MOUSE_READY" => WaitTarget::MouseReady,
            "SESSION_ARMED" | "ACTIVE" => WaitTarget::Active,
            _ => return None,
        };
        Some(target)
    }
}

/// Leaf actions the interpreter needs. Delays arrive already scaled.
#[async_trait]
pub trait ActionBackend: Send {
    /// Block until a host is attached, or fail with `HOST_DISCONNECTED`.
    async fn ensure_host(&mut self) -> Result<(), ScriptError>;

    async fn type_text(&mut self, text: &str, per_char_delay_ms: u64) -> Result<(), ScriptError>;

    /// Press and release `key` with `modifiers` held.
    async fn key_tap(&mut self, modifiers: u8, key: u8) -> Result<(), ScriptError>;

    /// Write the full keyboard state.
    async fn keyboard_report(&mut self, modifiers: u8, keys: &[u8]) -> Result<(), ScriptError>;

    async fn mouse_report(
        &mut self,
        buttons: u8,
        dx: i32,
        dy: i32,
        wheel: i32,
    ) -> Result<(), ScriptError>;

    async fn sleep_ms(&mut self, ms: u64);

    /// `Ok(false)` when the timeout elapsed first.
    async fn wait_for(&mut self, target: WaitTarget, timeout_ms: u64) -> Result<bool, ScriptError>;

    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Whether there is a mouse to release buttons on.
    fn has_mouse(&self) -> bool {
        true
    }

    /// Hard cap on iterations of a single `WHILE` loop.
    fn loop_iteration_cap(&self) -> Option<u32> {
        None
    }
}
