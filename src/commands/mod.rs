//! Leaf command handlers.
//!
//! Each submodule extends [`Engine`] with the handlers for one family of
//! commands; [`Engine::execute_leaf`] dispatches on the command kind.

mod keys;
mod mouse;
mod text;
mod wait;

pub use text::{
    ALL_CHARS, DIGITS, LETTERS, LOWERCASE, SPECIALS, UPPERCASE, random_string,
};
pub use wait::{SleepSpan, sleep_until_ms};

use crate::backend::ActionBackend;
use crate::command::{Command, CommandKind};
use crate::engine::{EXIT_CODE_VAR, Engine, Flow, clamp_u16};
use crate::error::ScriptError;
use crate::preprocess::var_name;
use tracing::{debug, info};

impl<B: ActionBackend> Engine<B> {
    /// Run one non-structural command. The requires-host gate has already
    /// been applied by the caller.
    pub(crate) async fn execute_leaf(&mut self, cmd: &Command) -> Result<Flow, ScriptError> {
        use CommandKind::*;
        match cmd.kind {
            String => self.type_string(cmd.arg(0), 0).await?,
            StringLn => {
                self.type_string(cmd.arg(0), 0).await?;
                self.tap_named_key("ENTER").await?;
            }
            StringDelay => {
                let per_char = self.scaler.scale_ms(self.eval(cmd.arg(0)) as i64);
                self.type_string(cmd.arg(1), per_char).await?;
            }
            RandomLowercase | RandomUppercase | RandomLetter | RandomNumber | RandomSpecial
            | RandomChar => self.type_random(cmd).await?,
            Delay => self.delay(cmd.arg(0)).await,
            DefaultDelay => {
                self.default_delay_ms = self.eval(cmd.arg(0)).max(0) as u64;
            }
            Key => self.tap_named_key(cmd.arg(0)).await?,
            ModifierCombo => self.modifier_combo(cmd.arg(0)).await?,
            Unknown => self.unknown_line(cmd).await?,
            Hold | KeyDown => self.hold_keys(cmd.arg(0), true).await?,
            Release | KeyUp => self.hold_keys(cmd.arg(0), false).await?,
            InjectMod => self.inject_modifiers(cmd.arg(0)).await?,
            MouseClick | MouseHold | MouseDrag | MouseMove | MouseScroll => {
                self.mouse_action(cmd).await?
            }
            WaitFor => self.wait_for(cmd).await?,
            SleepUntil => self.sleep_until(cmd.arg(0)).await,
            Media => info!(key = cmd.arg(0), "media keys are not supported, skipping"),
            AttackMode => debug!(args = %cmd.args.join(" "), "ATTACKMODE ignored"),
            Var => {
                let value = match cmd.arg(1).trim() {
                    "" => 0,
                    expr => self.eval(expr),
                };
                if var_name(cmd.arg(0)) == EXIT_CODE_VAR {
                    self.set_exit_code(value);
                } else {
                    self.scopes.set(cmd.arg(0), clamp_u16(value));
                    self.set_exit_code(0);
                }
                return Ok(Flow::Continue);
            }
            CallFunction => {
                let args = cmd.args.get(1..).unwrap_or_default();
                return self.call_function(cmd.arg(0), args).await;
            }
            _ => {}
        }
        self.set_exit_code(0);
        Ok(Flow::Continue)
    }
}
