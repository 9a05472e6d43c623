//! `DELAY`, `SLEEP_UNTIL` and `WAIT_FOR`.

use crate::backend::{ActionBackend, WaitTarget};
use crate::command::Command;
use crate::engine::Engine;
use crate::error::{DeviceError, ErrorCode, ScriptError};
use chrono::{Local, NaiveTime, TimeZone};
use tracing::debug;

/// `WAIT_FOR` timeout when none is given.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 15_000;

/// How long a `SLEEP_UNTIL` argument asks to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepSpan {
    /// A plain duration, subject to the delay multiplier.
    Relative(u64),
    /// Time remaining until an absolute instant. Never scaled.
    Absolute(u64),
}

/// Resolve a `SLEEP_UNTIL` argument against `now_ms` (Unix epoch millis).
///
/// All digits: a duration, or an epoch timestamp when ten digits or longer.
/// `HH:MM[:SS]`: the next occurrence of that local wall-clock time.
/// Anything unparseable sleeps for zero.
pub fn sleep_until_ms(arg: &str, now_ms: u64) -> SleepSpan {
    let raw = arg.trim();
    if raw.is_empty() {
        return SleepSpan::Relative(0);
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        let value = raw.parse::<u64>().unwrap_or(u64::MAX);
        if raw.len() >= 10 {
            return SleepSpan::Absolute(value.saturating_sub(now_ms));
        }
        return SleepSpan::Relative(value);
    }
    SleepSpan::Absolute(wall_clock_delay_ms(raw, now_ms).unwrap_or(0))
}

fn wall_clock_delay_ms(raw: &str, now_ms: u64) -> Option<u64> {
    let mut parts = raw.split(':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = parts.next()?.trim().parse().ok()?;
    let second: u32 = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0,
    };
    let now = Local.timestamp_millis_opt(now_ms as i64).single()?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    let mut target = now
        .date_naive()
        .and_time(time)
        .and_local_timezone(Local)
        .earliest()?;
    if target < now {
        target += chrono::Duration::days(1);
    }
    Some((target - now).num_milliseconds().max(0) as u64)
}

impl<B: ActionBackend> Engine<B> {
    pub(crate) async fn delay(&mut self, expr: &str) {
        let ms = self.scaler.scale_ms(self.eval(expr) as i64);
        if ms > 0 {
            self.backend.sleep_ms(ms).await;
        }
    }

    pub(crate) async fn sleep_until(&mut self, arg: &str) {
        let ms = match sleep_until_ms(arg, self.backend.now_ms()) {
            SleepSpan::Relative(ms) => self.scaler.scale_ms(ms.min(i64::MAX as u64) as i64),
            SleepSpan::Absolute(ms) => ms,
        };
        debug!(arg, ms, "SLEEP_UNTIL");
        if ms > 0 {
            self.backend.sleep_ms(ms).await;
        }
    }

    pub(crate) async fn wait_for(&mut self, cmd: &Command) -> Result<(), ScriptError> {
        let raw = cmd.arg(0).trim().to_ascii_uppercase();
        let target =
            WaitTarget::parse(&raw).ok_or_else(|| ScriptError::UnsupportedWaitTarget(raw.clone()))?;
        let timeout_ms = cmd
            .arg(1)
            .trim()
            .parse::<i64>()
            .map(|v| v.max(0) as u64)
            .unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);
        if self.backend.wait_for(target, timeout_ms).await? {
            Ok(())
        } else {
            Err(DeviceError::new(ErrorCode::WaitForTimeout, format!("WAIT_FOR {raw} timed out")).into())
        }
    }
}
