//! Script runs against the live gadget, cancellation and estimates.

use super::GadgetController;
use super::timing::{CALIBRATION_ITERATIONS, FALLBACK_FLOOR_US, calibration_script, floor_from_elapsed};
use crate::backend::{DeviceBackend, DurationModel, estimate_duration_ms};
use crate::config::UnicodeFallback;
use crate::engine::{Engine, RunOutcome};
use crate::error::ScriptError;
use crate::event::{EventSink, ExecEvent};
use crate::hid::strokes_for_text;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CALIBRATION_TIMEOUT: Duration = Duration::from_secs(6);

/// A script run in flight.
pub struct Execution {
    pub id: String,
    pub task: JoinHandle<RunOutcome>,
}

impl GadgetController {
    /// Start running `script` in the background.
    ///
    /// Events for the run go to [`subscribe_events`](Self::subscribe_events)
    /// receivers. Any cancellation left over from an earlier run is cleared.
    pub fn execute_ducky_script(
        &self,
        script: &str,
        multiplier: f64,
        execution_id: Option<&str>,
    ) -> Execution {
        self.inner.cancel.clear();
        let id = execution_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exec_{}", self.inner.clock.now_ms()));

        let events = self.inner.events.clone();
        let sink: EventSink = Arc::new(move |event: ExecEvent| {
            // No subscribers is fine.
            let _ = events.send(event);
        });
        let token = self.inner.cancel.token(id.clone());
        let backend = DeviceBackend::new(self.clone()).with_cancel(token.clone());
        let mut engine = Engine::new(backend, multiplier)
            .with_events(id.clone(), sink, self.clock())
            .with_cancel(token);

        info!(execution_id = %id, multiplier, "starting script");
        let script = script.to_string();
        let task = tokio::spawn(async move { engine.run_script(&script).await });
        Execution { id, task }
    }

    /// Ask the run `execution_id` (or any run, for `None`) to stop.
    pub fn cancel_execution(&self, execution_id: Option<&str>) {
        self.inner.cancel.request(execution_id);
        let id = execution_id.unwrap_or(crate::cancel::ANY_EXECUTION);
        info!(execution_id = id, "cancel requested");
        let _ = self
            .inner
            .events
            .send(ExecEvent::cancel_requested(id, self.inner.clock.now_ms()));
    }

    /// How long `script` would take on this gadget.
    pub async fn estimate_ducky_script_duration_ms(
        &self,
        script: &str,
        multiplier: f64,
    ) -> Result<u64, ScriptError> {
        estimate_duration_ms(Arc::new(self.clone()), script, multiplier).await
    }

    /// Measured cost of one shell-level sleep, in µs. Calibrated once.
    pub async fn calibrate_delay_floor_us(&self) -> u32 {
        *self
            .inner
            .delay_floor_us
            .get_or_init(|| async {
                let clock = &self.inner.clock;
                let start = clock.now_ms();
                let result = self
                    .inner
                    .root
                    .exec_direct(&calibration_script(CALIBRATION_ITERATIONS), CALIBRATION_TIMEOUT)
                    .await;
                if !result.ok {
                    warn!(stderr = %result.diagnostic(), "delay calibration failed; using fallback floor");
                    return FALLBACK_FLOOR_US;
                }
                let elapsed = clock.now_ms().saturating_sub(start);
                let floor = floor_from_elapsed(elapsed, CALIBRATION_ITERATIONS);
                debug!(floor_us = floor, elapsed_ms = elapsed, "delay floor calibrated");
                floor
            })
            .await
    }
}

#[async_trait]
impl DurationModel for GadgetController {
    async fn key_tap_ms(&self) -> u64 {
        let floor = self.calibrate_delay_floor_us().await;
        self.timing().estimate_key_tap_ms(floor)
    }

    async fn type_string_ms(&self, text: &str, per_char_delay_ms: u64) -> u64 {
        let floor = self.calibrate_delay_floor_us().await;
        // Warn and Skip type the same strokes; only Skip stays quiet.
        let policy = match self.config().unicode_fallback {
            UnicodeFallback::Warn => UnicodeFallback::Skip,
            other => other,
        };
        let strokes = strokes_for_text(self.inner.keymap.as_ref(), text, policy);
        self.timing()
            .estimate_type_ms(strokes.len(), text.chars().count(), per_char_delay_ms, floor)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::{FakeRoot, controller, controller_with};
    use super::*;
    use crate::config::Config;
    use crate::event::ExecEventKind;
    use crate::gadget::Profile;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_streams_events() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, _) = controller(Arc::clone(&root));
        let profile = Profile::from_json(&json!({"id": "p1", "roleType": "keyboard"})).unwrap();
        gadget.activate(&profile).await.unwrap();
        root.set_udc_state("configured");
        gadget.poll_udc_once().await;

        let mut rx = gadget.subscribe_events();
        let run = gadget.execute_ducky_script("STRING a\nENTER\n", 1.0, Some("job1"));
        assert_eq!(run.id, "job1");
        assert!(matches!(run.task.await.unwrap(), RunOutcome::Completed));

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.execution_id, "job1");
            kinds.push(event.kind);
        }
        assert_eq!(kinds.first(), Some(&ExecEventKind::Start));
        assert_eq!(kinds.last(), Some(&ExecEventKind::Done));
    }

    #[tokio::test]
    async fn test_run_without_host_fails() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, _) = controller(root);
        let run = gadget.execute_ducky_script("STRING a\n", 1.0, None);
        assert!(run.id.starts_with("exec_"));
        match run.task.await.unwrap() {
            RunOutcome::Failed(err) => {
                assert_eq!(err.code(), Some(crate::error::ErrorCode::HostDisconnected))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_emits_request_event() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, _) = controller(root);
        let mut rx = gadget.subscribe_events();
        gadget.cancel_execution(Some("job9"));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, ExecEventKind::CancelRequested);
        assert_eq!(event.execution_id, "job9");
    }

    #[tokio::test]
    async fn test_estimate_uses_calibrated_floor() {
        let root = Arc::new(FakeRoot::default());
        let (gadget, _) = controller(Arc::clone(&root));
        let ms = gadget
            .estimate_ducky_script_duration_ms("DELAY 100\nENTER\n", 1.0)
            .await
            .unwrap();
        // The fake shell returns instantly, so the floor clamps to 1 ms.
        assert_eq!(gadget.calibrate_delay_floor_us().await, 1_000);
        assert_eq!(ms, 110);
        assert_eq!(root.count_runs("while [ $i -lt 100 ]"), 1);
    }

    #[tokio::test]
    async fn test_estimate_counts_transliterated_chars() {
        let estimate = |fallback: UnicodeFallback| async move {
            let config = Config {
                udc_poll_interval_ms: 0,
                unicode_fallback: fallback,
                ..Config::default()
            };
            let (gadget, _) = controller_with(Arc::new(FakeRoot::default()), config, true);
            gadget
                .estimate_ducky_script_duration_ms("STRING caf\u{e9}\n", 1.0)
                .await
                .unwrap()
        };
        let skip = estimate(UnicodeFallback::Skip).await;
        let ascii = estimate(UnicodeFallback::Ascii).await;
        assert_eq!(estimate(UnicodeFallback::Warn).await, skip);
        assert!(ascii > skip, "ascii={ascii} skip={skip}");
    }

    #[tokio::test]
    async fn test_failed_calibration_uses_fallback() {
        let root = Arc::new(FakeRoot::default());
        root.fail_when("while [ $i -lt");
        let (gadget, _) = controller(root);
        assert_eq!(gadget.calibrate_delay_floor_us().await, FALLBACK_FLOOR_US);
    }
}
