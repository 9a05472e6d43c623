//! Key taps, modifier combinations, `HOLD`/`RELEASE` and `INJECT_MOD`.

use crate::backend::ActionBackend;
use crate::command::Command;
use crate::engine::Engine;
use crate::error::ScriptError;
use crate::hid::{key_code_for, modifier_for};
use tracing::{debug, warn};

/// Split a combo line such as `CTRL-ALT DEL` into `(modifier mask, key)`.
///
/// The last non-modifier token names the key. A line of modifiers alone taps
/// them with no key. `None` when nothing on the line resolves.
pub fn resolve_combo(line: &str) -> Option<(u8, u8)> {
    let mut mask = 0u8;
    let mut target = None;
    for part in line.split(|c: char| c == '-' || c.is_whitespace()) {
        if part.is_empty() {
            continue;
        }
        let upper = part.to_ascii_uppercase();
        match modifier_for(&upper) {
            Some(m) => mask |= m,
            None => target = Some(upper),
        }
    }
    match target {
        Some(key) => key_code_for(&key).map(|code| (mask, code)),
        None if mask != 0 => Some((mask, 0)),
        None => None,
    }
}

/// Modifier mask from tokens separated by whitespace or `+`. Unknown tokens are ignored.
pub fn modifier_mask(spec: &str) -> u8 {
    spec.split(|c: char| c == '+' || c.is_whitespace())
        .filter_map(|t| modifier_for(&t.to_ascii_uppercase()))
        .fold(0, |acc, m| acc | m)
}

impl<B: ActionBackend> Engine<B> {
    /// Tap a named key with the held and injected modifiers.
    pub(crate) async fn tap_named_key(&mut self, name: &str) -> Result<(), ScriptError> {
        let Some(code) = key_code_for(&name.to_ascii_uppercase()) else {
            debug!(key = name, "unknown key name");
            return Ok(());
        };
        let mods = self.state.active_modifiers();
        self.backend.key_tap(mods, code).await
    }

    pub(crate) async fn modifier_combo(&mut self, line: &str) -> Result<(), ScriptError> {
        match resolve_combo(line) {
            Some((mods, key)) => {
                let mods = mods | self.state.active_modifiers();
                self.backend.key_tap(mods, key).await
            }
            None => {
                debug!(line, "combo did not resolve to a key");
                Ok(())
            }
        }
    }

    /// A line nothing else claimed: tap it if it reads as a combination.
    pub(crate) async fn unknown_line(&mut self, cmd: &Command) -> Result<(), ScriptError> {
        let line = cmd.arg(0);
        if resolve_combo(line).is_none() {
            debug!(line = cmd.line, text = line, "ignoring unrecognized line");
            return Ok(());
        }
        self.backend.ensure_host().await?;
        self.modifier_combo(line).await
    }

    /// `HOLD`/`KEYDOWN` when `press`, `RELEASE`/`KEYUP` otherwise.
    pub(crate) async fn hold_keys(&mut self, spec: &str, press: bool) -> Result<(), ScriptError> {
        let tokens: Vec<String> = spec
            .split(|c: char| c == '+' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(str::to_ascii_uppercase)
            .collect();
        if tokens.is_empty() {
            return Ok(());
        }
        for token in &tokens {
            if let Some(m) = modifier_for(token) {
                if press {
                    self.state.held_modifiers |= m;
                } else {
                    self.state.held_modifiers &= !m;
                }
                continue;
            }
            let Some(code) = key_code_for(token) else {
                debug!(key = %token, "unknown key in HOLD/RELEASE");
                continue;
            };
            if !press {
                self.state.release_key(code);
            } else if !self.state.hold_key(code) {
                warn!(key = %token, "HOLD ignored (6-key rollover)");
            }
        }
        let mods = self.state.active_modifiers();
        let keys = self.state.held_keys.clone();
        self.backend.keyboard_report(mods, &keys).await
    }

    pub(crate) async fn inject_modifiers(&mut self, spec: &str) -> Result<(), ScriptError> {
        let trimmed = spec.trim();
        let clear = trimmed.is_empty()
            || trimmed == "0"
            || ["CLEAR", "NONE", "OFF"]
                .iter()
                .any(|w| trimmed.eq_ignore_ascii_case(w));
        self.state.injected_modifiers = if clear { 0 } else { modifier_mask(trimmed) };
        if self.state.held_keys.is_empty() && self.state.held_modifiers == 0 {
            return Ok(());
        }
        let mods = self.state.active_modifiers();
        let keys = self.state.held_keys.clone();
        self.backend.keyboard_report(mods, &keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::{KEY_DELETE, MOD_LEFT_ALT, MOD_LEFT_CTRL, MOD_LEFT_GUI, MOD_LEFT_SHIFT};

    #[test]
    fn test_resolve_combo() {
        assert_eq!(resolve_combo("GUI R"), Some((MOD_LEFT_GUI, 0x15)));
        assert_eq!(
            resolve_combo("CTRL-ALT-DELETE"),
            Some((MOD_LEFT_CTRL | MOD_LEFT_ALT, KEY_DELETE))
        );
        assert_eq!(resolve_combo("ctrl shift"), Some((MOD_LEFT_CTRL | MOD_LEFT_SHIFT, 0)));
        assert_eq!(resolve_combo("hello world"), None);
        assert_eq!(resolve_combo(""), None);
    }

    #[test]
    fn test_modifier_mask() {
        assert_eq!(modifier_mask("CTRL+SHIFT"), MOD_LEFT_CTRL | MOD_LEFT_SHIFT);
        assert_eq!(modifier_mask("gui bogus"), MOD_LEFT_GUI);
        assert_eq!(modifier_mask(""), 0);
    }
}
