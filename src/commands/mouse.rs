//! `MOUSE`/`POINTER` subcommands.

use crate::backend::ActionBackend;
use crate::command::{Command, CommandKind};
use crate::engine::Engine;
use crate::error::ScriptError;
use crate::hid::{MOUSE_LEFT, MOUSE_MIDDLE, MOUSE_RIGHT};
use tracing::debug;

pub fn button_mask(name: &str) -> u8 {
    match name.trim().to_ascii_uppercase().as_str() {
        "LEFT" => MOUSE_LEFT,
        "RIGHT" => MOUSE_RIGHT,
        "MIDDLE" => MOUSE_MIDDLE,
        _ => 0,
    }
}

impl<B: ActionBackend> Engine<B> {
    fn count_arg(&self, cmd: &Command, idx: usize) -> u32 {
        match cmd.arg(idx).trim() {
            "" => 1,
            expr => self.eval(expr).max(1) as u32,
        }
    }

    fn delta_arg(&self, cmd: &Command, idx: usize) -> i32 {
        match cmd.arg(idx).trim() {
            "" => 0,
            expr => self.eval(expr),
        }
    }

    pub(crate) async fn mouse_action(&mut self, cmd: &Command) -> Result<(), ScriptError> {
        match cmd.kind {
            CommandKind::MouseClick => {
                let Some(b) = self.button_arg(cmd) else { return Ok(()) };
                let held = self.state.held_buttons;
                for _ in 0..self.count_arg(cmd, 1) {
                    self.backend.mouse_report(held | b, 0, 0, 0).await?;
                    self.backend.mouse_report(held, 0, 0, 0).await?;
                }
            }
            CommandKind::MouseHold => {
                let Some(b) = self.button_arg(cmd) else { return Ok(()) };
                let (dx, dy) = (self.delta_arg(cmd, 1), self.delta_arg(cmd, 2));
                let times = self.count_arg(cmd, 3);
                self.state.held_buttons |= b;
                let held = self.state.held_buttons;
                self.backend.mouse_report(held, 0, 0, 0).await?;
                if dx != 0 || dy != 0 {
                    for _ in 0..times {
                        self.backend.mouse_report(held, dx, dy, 0).await?;
                    }
                }
            }
            CommandKind::MouseDrag => {
                let Some(b) = self.button_arg(cmd) else { return Ok(()) };
                let (dx, dy) = (self.delta_arg(cmd, 1), self.delta_arg(cmd, 2));
                let times = self.count_arg(cmd, 3);
                let prior = self.state.held_buttons;
                let pressed = prior | b;
                self.backend.mouse_report(pressed, 0, 0, 0).await?;
                for _ in 0..times {
                    self.backend.mouse_report(pressed, dx, dy, 0).await?;
                }
                self.backend.mouse_report(prior, 0, 0, 0).await?;
            }
            CommandKind::MouseMove => {
                let (dx, dy) = (self.delta_arg(cmd, 0), self.delta_arg(cmd, 1));
                let held = self.state.held_buttons;
                for _ in 0..self.count_arg(cmd, 2) {
                    self.backend.mouse_report(held, dx, dy, 0).await?;
                }
            }
            CommandKind::MouseScroll => {
                let wheel = if cmd.arg(0).eq_ignore_ascii_case("DOWN") { -1 } else { 1 };
                let held = self.state.held_buttons;
                for _ in 0..self.count_arg(cmd, 1) {
                    self.backend.mouse_report(held, 0, 0, wheel).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn button_arg(&self, cmd: &Command) -> Option<u8> {
        match button_mask(cmd.arg(0)) {
            0 => {
                debug!(line = cmd.line, button = cmd.arg(0), "unknown mouse button");
                None
            }
            b => Some(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_mask() {
        assert_eq!(button_mask("left"), 1);
        assert_eq!(button_mask("RIGHT"), 2);
        assert_eq!(button_mask("Middle"), 4);
        assert_eq!(button_mask("side"), 0);
    }
}
