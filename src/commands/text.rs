//! `STRING`-family typing and the `RANDOM_*` generators.

use crate::backend::ActionBackend;
use crate::command::{Command, CommandKind};
use crate::engine::Engine;
use crate::error::ScriptError;
use rand::Rng;

pub const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
pub const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const DIGITS: &str = "0123456789";
pub const SPECIALS: &str = "!@#$%^&*()-_=+[]{};:'\",.<>/?\\|`~";
pub const ALL_CHARS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()-_=+[]{};:'\",.<>/?\\|`~";

/// `count` characters drawn uniformly from `charset`.
pub fn random_string(charset: &str, count: usize) -> String {
    let chars: Vec<char> = charset.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect()
}

fn charset_for(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::RandomLowercase => LOWERCASE,
        CommandKind::RandomUppercase => UPPERCASE,
        CommandKind::RandomLetter => LETTERS,
        CommandKind::RandomNumber => DIGITS,
        CommandKind::RandomSpecial => SPECIALS,
        _ => ALL_CHARS,
    }
}

impl<B: ActionBackend> Engine<B> {
    pub(crate) async fn type_string(&mut self, text: &str, per_char_delay_ms: u64) -> Result<(), ScriptError> {
        if text.is_empty() {
            return Ok(());
        }
        self.backend.type_text(text, per_char_delay_ms).await
    }

    pub(crate) async fn type_random(&mut self, cmd: &Command) -> Result<(), ScriptError> {
        let count = match cmd.arg(0).trim() {
            "" => 1,
            expr => self.eval(expr).max(0) as usize,
        };
        // Drop rng before the await so it does not cross the yield point.
        let text = random_string(charset_for(cmd.kind), count);
        self.type_string(&text, 0).await
    }
}
