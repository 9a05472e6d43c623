//! USB HID boot-protocol reports, usage codes and the character keymap.

use crate::config::UnicodeFallback;
use unicode_normalization::UnicodeNormalization;

pub const MOD_LEFT_CTRL: u8 = 0x01;
pub const MOD_LEFT_SHIFT: u8 = 0x02;
pub const MOD_LEFT_ALT: u8 = 0x04;
pub const MOD_LEFT_GUI: u8 = 0x08;
pub const MOD_RIGHT_CTRL: u8 = 0x10;
pub const MOD_RIGHT_SHIFT: u8 = 0x20;
pub const MOD_RIGHT_ALT: u8 = 0x40;
pub const MOD_RIGHT_GUI: u8 = 0x80;

pub const KEY_ENTER: u8 = 0x28;
pub const KEY_DELETE: u8 = 0x4C;

/// Boot keyboard report capacity.
pub const MAX_KEYS: usize = 6;

pub type KeyboardReport = [u8; 8];
pub type MouseReport = [u8; 4];

pub const MOUSE_LEFT: u8 = 0x01;
pub const MOUSE_RIGHT: u8 = 0x02;
pub const MOUSE_MIDDLE: u8 = 0x04;

pub const KEYBOARD_REPORT_DESC: &[u8] = &[
    0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0x05, 0x07, 0x19, 0xE0, 0x29, 0xE7, 0x15, 0x00, 0x25,
    0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0x95, 0x01, 0x75, 0x08, 0x81, 0x03, 0x95, 0x05,
    0x75, 0x01, 0x05, 0x08, 0x19, 0x01, 0x29, 0x05, 0x91, 0x02, 0x95, 0x01, 0x75, 0x03, 0x91,
    0x03, 0x95, 0x06, 0x75, 0x08, 0x15, 0x00, 0x25, 0x65, 0x05, 0x07, 0x19, 0x00, 0x29, 0x65,
    0x81, 0x00, 0xC0,
];

pub const MOUSE_REPORT_DESC: &[u8] = &[
    0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0x09, 0x01, 0xA1, 0x00, 0x05, 0x09, 0x19, 0x01, 0x29,
    0x03, 0x15, 0x00, 0x25, 0x01, 0x95, 0x03, 0x75, 0x01, 0x81, 0x02, 0x95, 0x01, 0x75, 0x05,
    0x81, 0x03, 0x05, 0x01, 0x09, 0x30, 0x09, 0x31, 0x09, 0x38, 0x15, 0x81, 0x25, 0x7F, 0x75,
    0x08, 0x95, 0x03, 0x81, 0x06, 0xC0, 0xC0,
];

/// Build an 8-byte keyboard report. Keys beyond the sixth are dropped.
pub fn keyboard_report(modifiers: u8, keys: &[u8]) -> KeyboardReport {
    let mut report = [0u8; 8];
    report[0] = modifiers;
    for (slot, key) in report[2..].iter_mut().zip(keys.iter().take(MAX_KEYS)) {
        *slot = *key;
    }
    report
}

/// Build a 4-byte mouse report, clamping each axis to `[-127, 127]`.
pub fn mouse_report(buttons: u8, dx: i32, dy: i32, wheel: i32) -> MouseReport {
    let axis = |v: i32| v.clamp(-127, 127) as i8 as u8;
    [buttons, axis(dx), axis(dy), axis(wheel)]
}

/// Render bytes as octal escapes for a POSIX `printf` format string.
pub fn printf_escape(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{:03o}", b)).collect()
}

pub fn modifier_for(label: &str) -> Option<u8> {
    match label.trim().to_ascii_uppercase().as_str() {
        "CTRL" | "CONTROL" => Some(MOD_LEFT_CTRL),
        "SHIFT" => Some(MOD_LEFT_SHIFT),
        "ALT" | "OPTION" => Some(MOD_LEFT_ALT),
        "GUI" | "WINDOWS" | "COMMAND" | "WIN" => Some(MOD_LEFT_GUI),
        "RCTRL" | "RCONTROL" => Some(MOD_RIGHT_CTRL),
        "RSHIFT" => Some(MOD_RIGHT_SHIFT),
        "RALT" => Some(MOD_RIGHT_ALT),
        "RGUI" | "RWINDOWS" | "RCOMMAND" => Some(MOD_RIGHT_GUI),
        _ => None,
    }
}

/// Resolve a key label (`A`, `7`, `ENTER`, `F13`, `NUMPAD_5`, ...) to its usage code.
pub fn key_code_for(label: &str) -> Option<u8> {
    let k = label.trim().to_ascii_uppercase().replace('_', "");
    let bytes = k.as_bytes();
    if bytes.len() == 1 {
        let c = bytes[0];
        if c.is_ascii_uppercase() {
            return Some(0x04 + (c - b'A'));
        }
        if c == b'0' {
            return Some(0x27);
        }
        if (b'1'..=b'9').contains(&c) {
            return Some(0x1E + (c - b'1'));
        }
    }
    if let Some(n) = k.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
        return match n {
            1..=12 => Some(0x3A + n - 1),
            13..=24 => Some(0x68 + n - 13),
            _ => None,
        };
    }
    if let Some(rest) = k.strip_prefix("NUMPAD").or_else(|| k.strip_prefix("KP")) {
        return keypad_code(rest);
    }
    let code = match k.as_str() {
        "ENTER" | "RETURN" => KEY_ENTER,
        "ESC" | "ESCAPE" => 0x29,
        "BACKSPACE" | "BKSP" => 0x2A,
        "TAB" => 0x2B,
        "SPACE" => 0x2C,
        "CAPSLOCK" => 0x39,
        "PRINTSCREEN" | "PRINTSCRN" | "PRTSCN" => 0x46,
        "SCROLLLOCK" => 0x47,
        "PAUSE" | "BREAK" => 0x48,
        "INSERT" | "INS" => 0x49,
        "HOME" => 0x4A,
        "PAGEUP" => 0x4B,
        "DELETE" | "DEL" => KEY_DELETE,
        "END" => 0x4D,
        "PAGEDOWN" => 0x4E,
        "RIGHT" | "RIGHTARROW" => 0x4F,
        "LEFT" | "LEFTARROW" => 0x50,
        "DOWN" | "DOWNARROW" => 0x51,
        "UP" | "UPARROW" => 0x52,
        "NUMLOCK" => 0x53,
        "MENU" | "APP" => 0x65,
        _ => return None,
    };
    Some(code)
}

fn keypad_code(rest: &str) -> Option<u8> {
    let code = match rest {
        "SLASH" | "DIVIDE" => 0x54,
        "ASTERISK" | "MULTIPLY" | "STAR" => 0x55,
        "MINUS" | "SUBTRACT" => 0x56,
        "PLUS" | "ADD" => 0x57,
        "ENTER" => 0x58,
        "0" => 0x62,
        "DOT" | "PERIOD" | "DECIMAL" => 0x63,
        d if d.len() == 1 && (b'1'..=b'9').contains(&d.as_bytes()[0]) => {
            0x59 + (d.as_bytes()[0] - b'1')
        }
        _ => return None,
    };
    Some(code)
}

/// A single press: modifier mask plus usage code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub modifiers: u8,
    pub key: u8,
}

impl KeyStroke {
    const fn plain(key: u8) -> Self {
        Self { modifiers: 0, key }
    }

    const fn shifted(key: u8) -> Self {
        Self {
            modifiers: MOD_LEFT_SHIFT,
            key,
        }
    }
}

/// Character to keystroke resolution for one host keyboard layout.
pub trait Keymap: Send + Sync {
    fn stroke_for(&self, ch: char) -> Option<KeyStroke>;
}

/// US QWERTY.
#[derive(Debug, Default, Clone, Copy)]
pub struct UsLayout;

impl Keymap for UsLayout {
    fn stroke_for(&self, ch: char) -> Option<KeyStroke> {
        let stroke = match ch {
            'a'..='z' => KeyStroke::plain(0x04 + (ch as u8 - b'a')),
            'A'..='Z' => KeyStroke::shifted(0x04 + (ch as u8 - b'A')),
            '1'..='9' => KeyStroke::plain(0x1E + (ch as u8 - b'1')),
            '0' => KeyStroke::plain(0x27),
            '\n' | '\r' => KeyStroke::plain(KEY_ENTER),
            '\t' => KeyStroke::plain(0x2B),
            '\u{8}' => KeyStroke::plain(0x2A),
            ' ' => KeyStroke::plain(0x2C),
            '!' => KeyStroke::shifted(0x1E),
            '@' => KeyStroke::shifted(0x1F),
            '#' => KeyStroke::shifted(0x20),
            '$' => KeyStroke::shifted(0x21),
            '%' => KeyStroke::shifted(0x22),
            '^' => KeyStroke::shifted(0x23),
            '&' => KeyStroke::shifted(0x24),
            '*' => KeyStroke::shifted(0x25),
            '(' => KeyStroke::shifted(0x26),
            ')' => KeyStroke::shifted(0x27),
            '-' => KeyStroke::plain(0x2D),
            '_' => KeyStroke::shifted(0x2D),
            '=' => KeyStroke::plain(0x2E),
            '+' => KeyStroke::shifted(0x2E),
            '[' => KeyStroke::plain(0x2F),
            '{' => KeyStroke::shifted(0x2F),
            ']' => KeyStroke::plain(0x30),
            '}' => KeyStroke::shifted(0x30),
            '\\' => KeyStroke::plain(0x31),
            '|' => KeyStroke::shifted(0x31),
            ';' => KeyStroke::plain(0x33),
            ':' => KeyStroke::shifted(0x33),
            '\'' => KeyStroke::plain(0x34),
            '"' => KeyStroke::shifted(0x34),
            '`' => KeyStroke::plain(0x35),
            '~' => KeyStroke::shifted(0x35),
            ',' => KeyStroke::plain(0x36),
            '<' => KeyStroke::shifted(0x36),
            '.' => KeyStroke::plain(0x37),
            '>' => KeyStroke::shifted(0x37),
            '/' => KeyStroke::plain(0x38),
            '?' => KeyStroke::shifted(0x38),
            _ => return None,
        };
        Some(stroke)
    }
}

/// Decompose `ch` and keep only its printable ASCII part.
pub fn transliterate(ch: char) -> String {
    std::iter::once(ch)
        .nfd()
        .filter(|c| (' '..='~').contains(c))
        .collect()
}

/// Map text to keystrokes, applying `fallback` to characters the keymap lacks.
pub fn strokes_for_text(keymap: &dyn Keymap, text: &str, fallback: UnicodeFallback) -> Vec<KeyStroke> {
    let mut strokes = Vec::with_capacity(text.len());
    for ch in text.chars() {
        match keymap.stroke_for(ch) {
            Some(s) => strokes.push(s),
            None => push_fallback(keymap, ch, fallback, &mut strokes),
        }
    }
    strokes
}

fn push_fallback(keymap: &dyn Keymap, ch: char, fallback: UnicodeFallback, out: &mut Vec<KeyStroke>) {
    match fallback {
        UnicodeFallback::Skip => {}
        UnicodeFallback::Warn => {
            tracing::warn!(char = %ch.escape_unicode(), "skipping unsupported character");
        }
        UnicodeFallback::Ascii => {
            let ascii = transliterate(ch);
            if ascii.is_empty() {
                tracing::debug!(char = %ch.escape_unicode(), "transliteration failed, typing '?'");
                out.extend(keymap.stroke_for('?'));
                return;
            }
            out.extend(ascii.chars().filter_map(|c| keymap.stroke_for(c)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_report_layout() {
        assert_eq!(
            keyboard_report(MOD_LEFT_SHIFT, &[0x04, 0x05]),
            [0x02, 0, 0x04, 0x05, 0, 0, 0, 0]
        );
        let many = keyboard_report(0, &[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(&many[2..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_mouse_report_clamps_axes() {
        assert_eq!(mouse_report(MOUSE_LEFT, 500, -500, -1), [1, 0x7F, 0x81, 0xFF]);
    }

    #[test]
    fn test_printf_escape() {
        assert_eq!(printf_escape(&[0, 8, 255]), "\\000\\010\\377");
    }

    #[test]
    fn test_key_codes() {
        assert_eq!(key_code_for("a"), Some(0x04));
        assert_eq!(key_code_for("0"), Some(0x27));
        assert_eq!(key_code_for("9"), Some(0x26));
        assert_eq!(key_code_for("F12"), Some(0x45));
        assert_eq!(key_code_for("F13"), Some(0x68));
        assert_eq!(key_code_for("F24"), Some(0x73));
        assert_eq!(key_code_for("NUMPAD_5"), Some(0x5D));
        assert_eq!(key_code_for("KP0"), Some(0x62));
        assert_eq!(key_code_for("UP_ARROW"), Some(0x52));
        assert_eq!(key_code_for("F25"), None);
        assert_eq!(key_code_for("BOGUS"), None);
    }

    #[test]
    fn test_modifiers() {
        assert_eq!(modifier_for("ctrl"), Some(MOD_LEFT_CTRL));
        assert_eq!(modifier_for("COMMAND"), Some(MOD_LEFT_GUI));
        assert_eq!(modifier_for("RALT"), Some(MOD_RIGHT_ALT));
        assert_eq!(modifier_for("DELETE"), None);
    }

    #[test]
    fn test_us_layout() {
        let us = UsLayout;
        assert_eq!(us.stroke_for('A'), Some(KeyStroke { modifiers: MOD_LEFT_SHIFT, key: 0x04 }));
        assert_eq!(us.stroke_for('?'), Some(KeyStroke { modifiers: MOD_LEFT_SHIFT, key: 0x38 }));
        assert_eq!(us.stroke_for('\n'), Some(KeyStroke { modifiers: 0, key: KEY_ENTER }));
        assert_eq!(us.stroke_for('é'), None);
    }

    #[test]
    fn test_fallback_policies() {
        let us = UsLayout;
        assert_eq!(strokes_for_text(&us, "é", UnicodeFallback::Skip).len(), 0);
        assert_eq!(strokes_for_text(&us, "é", UnicodeFallback::Warn).len(), 0);
        assert_eq!(
            strokes_for_text(&us, "é", UnicodeFallback::Ascii),
            vec![KeyStroke { modifiers: 0, key: 0x08 }]
        );
        assert_eq!(
            strokes_for_text(&us, "漢", UnicodeFallback::Ascii),
            vec![KeyStroke { modifiers: MOD_LEFT_SHIFT, key: 0x38 }]
        );
    }

    #[test]
    fn test_transliterate() {
        assert_eq!(transliterate('ñ'), "n");
        assert_eq!(transliterate('€'), "");
    }
}
