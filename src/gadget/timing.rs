//! Keystroke timing: scaled hold/inter-key delays and duration estimates.

/// Key-down hold before scaling.
pub const BASE_HOLD_US: u32 = 4_000;
/// Gap between keystrokes before scaling.
pub const BASE_INTER_US: u32 = 600;
pub const MAX_HOLD_US: u32 = 150_000;
pub const MAX_INTER_US: u32 = 50_000;
/// Hold used for Ctrl+Alt+Del before scaling.
pub const CTRL_ALT_DEL_HOLD_US: u32 = 12_000;

pub const MIN_SPEED_FACTOR: f64 = 0.1;
pub const MAX_SPEED_FACTOR: f64 = 10.0;
/// Multiplies the speed factor after repeated write failures: 15% longer delays.
pub const SLOWDOWN_STEP: f64 = 1.15;

/// Keystrokes written per batch while typing.
pub const BATCH_SIZE: usize = 60;
pub const FLUSH_EVERY_CHARS: usize = 120;
pub const FLUSH_PAUSE_MS: u64 = 12;

/// Calibration loop length and its fallback floor.
pub const CALIBRATION_ITERATIONS: u32 = 100;
pub const FALLBACK_FLOOR_US: u32 = 10_000;

/// Clamp a typing-speed factor into range. Non-finite values read as 1.0.
pub fn normalize_factor(value: f64) -> f64 {
    let v = if value.is_finite() { value } else { 1.0 };
    v.clamp(MIN_SPEED_FACTOR, MAX_SPEED_FACTOR)
}

/// Delay scaling for one gadget session. Larger factors type slower.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingModel {
    factor: f64,
    risky: bool,
}

impl Default for TimingModel {
    fn default() -> Self {
        Self::new(1.0, false)
    }
}

impl TimingModel {
    pub fn new(factor: f64, risky: bool) -> Self {
        Self {
            factor: normalize_factor(factor),
            risky,
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn set_factor(&mut self, factor: f64) -> f64 {
        self.factor = normalize_factor(factor);
        self.factor
    }

    pub fn risky(&self) -> bool {
        self.risky
    }

    pub fn set_risky(&mut self, risky: bool) {
        self.risky = risky;
    }

    /// Slow typing down one step. Returns the new factor if it changed.
    pub fn slow_down(&mut self) -> Option<f64> {
        let next = normalize_factor(self.factor * SLOWDOWN_STEP);
        if next == self.factor {
            return None;
        }
        self.factor = next;
        Some(next)
    }

    fn min_inter_us(&self) -> u32 {
        if self.risky { 40 } else { 180 }
    }

    fn min_hold_us(&self) -> u32 {
        if self.risky { 300 } else { 1_500 }
    }

    pub fn inter_key_us(&self) -> u32 {
        let v = (BASE_INTER_US as f64 * self.factor).round() as u32;
        v.clamp(self.min_inter_us(), MAX_INTER_US)
    }

    /// Scale a requested hold time.
    pub fn hold_us(&self, request_us: u32) -> u32 {
        let v = (request_us as f64 * self.factor).round() as u32;
        v.clamp(self.min_hold_us(), MAX_HOLD_US)
    }

    /// Assumed cost of one report write, for estimates only.
    pub fn report_overhead_us(&self) -> u32 {
        if self.risky { 800 } else { 1_500 }
    }

    /// One tap: release, press, release.
    pub fn estimate_key_tap_ms(&self, floor_us: u32) -> u64 {
        let inter = self.inter_key_us().max(floor_us) as f64;
        let hold = self.hold_us(BASE_HOLD_US).max(floor_us) as f64;
        let overhead = self.report_overhead_us() as f64 * 3.0;
        ((inter + hold + overhead) / 1000.0).round().max(0.0) as u64
    }

    /// Typing `strokes` keystrokes for a text of `text_chars` characters.
    pub fn estimate_type_ms(
        &self,
        strokes: usize,
        text_chars: usize,
        per_char_delay_ms: u64,
        floor_us: u32,
    ) -> u64 {
        if strokes == 0 {
            return 0;
        }
        let n = strokes as f64;
        let inter = self.inter_key_us().max(floor_us) as f64;
        let hold = self.hold_us(BASE_HOLD_US).max(floor_us) as f64;
        let base_ms = ((inter + hold) * n / 1000.0).round() as u64;
        let delay_ms = per_char_delay_ms.saturating_mul(strokes as u64);
        let flush_ms = if per_char_delay_ms == 0 {
            (text_chars / FLUSH_EVERY_CHARS) as u64 * FLUSH_PAUSE_MS
        } else {
            0
        };
        let reports = 1.0 + 2.0 * n;
        let overhead_ms = (reports * self.report_overhead_us() as f64 / 1000.0).round() as u64;
        base_ms + delay_ms + flush_ms + overhead_ms
    }
}

/// Shell prelude setting `$USLP` to a working `usleep`, or leaving it empty.
pub const USLEEP_PROBE: &str = r#"USLP=""
if command -v toybox >/dev/null 2>&1 && toybox usleep 1 >/dev/null 2>&1; then
  USLP="toybox usleep"
elif command -v usleep >/dev/null 2>&1; then
  USLP="usleep"
elif command -v busybox >/dev/null 2>&1 && busybox usleep 1 >/dev/null 2>&1; then
  USLP="busybox usleep"
fi
"#;

/// Shell snippet sleeping `us` microseconds, given [`USLEEP_PROBE`] ran first.
pub fn shell_sleep_us(us: u32) -> String {
    let secs = format!("{:.6}", us as f64 / 1_000_000.0);
    format!("if [ -n \"$USLP\" ]; then $USLP {us}; else sleep {secs}; fi\n")
}

/// Shell loop timing `iterations` 1 ms sleeps.
pub fn calibration_script(iterations: u32) -> String {
    format!(
        "{USLEEP_PROBE}i=0\nwhile [ $i -lt {iterations} ]; do\n  {}  i=$((i+1))\ndone\necho \"USLP=$USLP\"",
        shell_sleep_us(1_000)
    )
}

/// Per-iteration cost in µs, clamped to a usable floor.
pub fn floor_from_elapsed(elapsed_ms: u64, iterations: u32) -> u32 {
    let per_iter_us = elapsed_ms.max(1) as f64 * 1000.0 / iterations.max(1) as f64;
    (per_iter_us.round() as u64).clamp(1_000, 50_000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_delays_clamp() {
        let t = TimingModel::default();
        assert_eq!(t.inter_key_us(), 600);
        assert_eq!(t.hold_us(BASE_HOLD_US), 4_000);
        let fast = TimingModel::new(0.1, false);
        assert_eq!(fast.inter_key_us(), 180);
        assert_eq!(fast.hold_us(BASE_HOLD_US), 1_500);
        let risky = TimingModel::new(0.1, true);
        assert_eq!(risky.inter_key_us(), 60);
        assert_eq!(risky.hold_us(BASE_HOLD_US), 400);
        let slow = TimingModel::new(1_000.0, false);
        assert_eq!(slow.factor(), MAX_SPEED_FACTOR);
        assert_eq!(slow.hold_us(CTRL_ALT_DEL_HOLD_US), 120_000);
        assert_eq!(TimingModel::new(f64::NAN, false).factor(), 1.0);
    }

    #[test]
    fn test_slow_down_steps_and_saturates() {
        let mut t = TimingModel::default();
        let next = t.slow_down().unwrap();
        assert!((next - 1.15).abs() < 1e-9);
        let before = TimingModel::default().inter_key_us();
        assert_eq!(t.inter_key_us(), (before as f64 * 1.15).round() as u32);
        let mut max = TimingModel::new(MAX_SPEED_FACTOR, false);
        assert_eq!(max.slow_down(), None);
    }

    #[test]
    fn test_estimates() {
        let t = TimingModel::default();
        assert_eq!(t.estimate_key_tap_ms(1_000), 10);
        assert_eq!(t.estimate_type_ms(2, 2, 0, 1_000), 18);
        assert_eq!(t.estimate_type_ms(2, 2, 5, 1_000), 28);
        assert_eq!(t.estimate_type_ms(0, 3, 5, 1_000), 0);
        // 240 chars with no per-char delay add two flush pauses.
        let with = t.estimate_type_ms(240, 240, 0, 1_000);
        let base = 1_200 + ((1.0 + 480.0) * 1.5_f64).round() as u64;
        assert_eq!(with, base + 24);
    }

    #[test]
    fn test_shell_snippets() {
        assert_eq!(
            shell_sleep_us(1_500),
            "if [ -n \"$USLP\" ]; then $USLP 1500; else sleep 0.001500; fi\n"
        );
        let script = calibration_script(100);
        assert!(script.starts_with(USLEEP_PROBE));
        assert!(script.contains("while [ $i -lt 100 ]"));
    }

    #[test]
    fn test_floor_from_elapsed() {
        assert_eq!(floor_from_elapsed(0, 100), 1_000);
        assert_eq!(floor_from_elapsed(250, 100), 2_500);
        assert_eq!(floor_from_elapsed(60_000, 100), 50_000);
    }
}
