//! Duration estimation: the same interpreter, no device I/O.

use super::{ActionBackend, WaitTarget};
use crate::engine::{Engine, RunOutcome};
use crate::error::ScriptError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Iteration cap for a single `WHILE` when estimating.
pub const ESTIMATE_LOOP_CAP: u32 = 10_000;

/// Source of per-action timing costs.
#[async_trait]
pub trait DurationModel: Send + Sync {
    /// Cost of one key tap with modifiers.
    async fn key_tap_ms(&self) -> u64;

    /// Cost of typing `text` with `per_char_delay_ms` between characters.
    async fn type_string_ms(&self, text: &str, per_char_delay_ms: u64) -> u64;
}

/// Accumulates modeled milliseconds instead of acting.
pub struct EstimateBackend {
    model: Arc<dyn DurationModel>,
    total_ms: u64,
    epoch_ms: u64,
}

impl EstimateBackend {
    pub fn new(model: Arc<dyn DurationModel>) -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            model,
            total_ms: 0,
            epoch_ms,
        }
    }

    pub fn total_ms(&self) -> u64 {
        self.total_ms
    }

    fn add(&mut self, ms: u64) {
        self.total_ms = self.total_ms.saturating_add(ms);
    }
}

#[async_trait]
impl ActionBackend for EstimateBackend {
    async fn ensure_host(&mut self) -> Result<(), ScriptError> {
        Ok(())
    }

    async fn type_text(&mut self, text: &str, per_char_delay_ms: u64) -> Result<(), ScriptError> {
        let ms = self.model.type_string_ms(text, per_char_delay_ms).await;
        self.add(ms);
        Ok(())
    }

    async fn key_tap(&mut self, _modifiers: u8, _key: u8) -> Result<(), ScriptError> {
        let ms = self.model.key_tap_ms().await;
        self.add(ms);
        Ok(())
    }

    async fn keyboard_report(&mut self, _modifiers: u8, _keys: &[u8]) -> Result<(), ScriptError> {
        Ok(())
    }

    async fn mouse_report(&mut self, _buttons: u8, _dx: i32, _dy: i32, _wheel: i32) -> Result<(), ScriptError> {
        Ok(())
    }

    async fn sleep_ms(&mut self, ms: u64) {
        self.add(ms);
    }

    async fn wait_for(&mut self, target: WaitTarget, timeout_ms: u64) -> Result<bool, ScriptError> {
        if target != WaitTarget::Nothing {
            self.add(timeout_ms);
        }
        Ok(true)
    }

    /// Virtual time: the wall clock at creation plus everything accumulated so far.
    fn now_ms(&self) -> u64 {
        self.epoch_ms.saturating_add(self.total_ms)
    }

    fn loop_iteration_cap(&self) -> Option<u32> {
        Some(ESTIMATE_LOOP_CAP)
    }
}

/// Estimate how long `script` would take to run at `multiplier`.
pub async fn estimate_duration_ms(
    model: Arc<dyn DurationModel>,
    script: &str,
    multiplier: f64,
) -> Result<u64, ScriptError> {
    let mut engine = Engine::new(EstimateBackend::new(model), multiplier);
    match engine.run_script(script).await {
        RunOutcome::Failed(err) => Err(err),
        RunOutcome::Completed | RunOutcome::Cancelled => Ok(engine.backend().total_ms()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 10 ms per tap, 5 ms per character plus the per-character delay.
    struct FixedModel;

    #[async_trait]
    impl DurationModel for FixedModel {
        async fn key_tap_ms(&self) -> u64 {
            10
        }

        async fn type_string_ms(&self, text: &str, per_char_delay_ms: u64) -> u64 {
            text.chars().count() as u64 * (5 + per_char_delay_ms)
        }
    }

    async fn estimate(script: &str, multiplier: f64) -> u64 {
        estimate_duration_ms(Arc::new(FixedModel), script, multiplier)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_delays_are_scaled() {
        assert_eq!(estimate("STRING hi\nDELAY 100\n", 1.0).await, 110);
        assert_eq!(estimate("DELAY 100\n", 2.0).await, 200);
        assert_eq!(estimate("DEFAULT_DELAY 20\nENTER\nTAB\n", 1.0).await, 60);
    }

    #[tokio::test]
    async fn test_loops_and_functions() {
        let script = "FUNCTION tap()\nENTER\nEND_FUNCTION\nWHILE $i < 3\ntap()\n$i = $i + 1\nEND_WHILE\n";
        assert_eq!(estimate(script, 1.0).await, 30);
    }

    #[tokio::test]
    async fn test_infinite_loop_is_capped() {
        let ms = estimate("WHILE TRUE\nDELAY 1\nEND_WHILE\n", 1.0).await;
        assert_eq!(ms, ESTIMATE_LOOP_CAP as u64);
    }

    #[tokio::test]
    async fn test_wait_for_adds_timeout() {
        assert_eq!(estimate("WAIT_FOR HOST_CONNECTED 500\n", 1.0).await, 500);
        assert_eq!(estimate("WAIT_FOR UDC\n", 1.0).await, 15_000);
        let err = estimate_duration_ms(Arc::new(FixedModel), "WAIT_FOR BLUETOOTH\n", 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::UnsupportedWaitTarget(_)));
    }

    #[tokio::test]
    async fn test_host_gate_is_skipped_and_holds_cost_nothing() {
        assert_eq!(estimate("HOLD SHIFT\nMOUSE CLICK LEFT\nRELEASE SHIFT\n", 1.0).await, 0);
        assert_eq!(estimate("GUI r\nSTRINGLN ab\n", 1.0).await, 30);
    }
}
