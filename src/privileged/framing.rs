//! Marker framing for requests sent to the elevated shell.
//!
//! A request is echoed back as:
//!
//! ```text
//! __GFS_BEGIN__:<token>
//! ...payload...
//! __GFS_RC__:<token>:<code>
//! __GFS_END__:<token>
//! ```
//!
//! The begin and end markers are written to both stdout and stderr so each
//! stream can be cut independently.

pub const BEGIN_PREFIX: &str = "__GFS_BEGIN__:";
pub const END_PREFIX: &str = "__GFS_END__:";
pub const RC_PREFIX: &str = "__GFS_RC__:";

/// Markers for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub token: String,
    pub begin: String,
    pub end: String,
    rc_prefix: String,
}

impl Frame {
    /// Build the markers for request number `seq`.
    pub fn new(seq: u64) -> Self {
        let token = format!("GFS_{}_{:08x}", seq, rand::random::<u32>());
        Self {
            begin: format!("{BEGIN_PREFIX}{token}"),
            end: format!("{END_PREFIX}{token}"),
            rc_prefix: format!("{RC_PREFIX}{token}:"),
            token,
        }
    }

    /// Shell text that runs `body` between the markers and reports its status.
    pub fn wrap(&self, body: &str) -> String {
        let begin = sh_quote(&self.begin);
        let end = sh_quote(&self.end);
        let mut out = String::with_capacity(body.len() + 256);
        out.push_str(&format!("echo {begin}\n"));
        out.push_str(&format!("echo {begin} 1>&2\n"));
        out.push_str(body);
        out.push('\n');
        out.push_str("RC=$?\n");
        out.push_str(&format!("echo \"{}$RC\"\n", self.rc_prefix));
        out.push_str(&format!("echo {end}\n"));
        out.push_str(&format!("echo {end} 1>&2\n"));
        out
    }

    /// The exit code carried by `line`, if it is this frame's status line.
    /// A malformed code reads as -1.
    pub fn parse_rc(&self, line: &str) -> Option<i32> {
        line.strip_prefix(&self.rc_prefix)
            .map(|code| code.trim().parse().unwrap_or(-1))
    }
}

/// Quote `s` as a single POSIX shell word.
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Run `script` in a child `sh` so it cannot disturb the session shell.
pub fn nested_sh(script: &str) -> String {
    format!("sh -c {}", sh_quote(script))
}

/// Run `script` inside the session shell as one compound command.
pub fn brace_group(script: &str) -> String {
    format!("{{\n{script}\n}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let a = Frame::new(1);
        let b = Frame::new(2);
        assert_ne!(a.token, b.token);
        assert!(a.token.starts_with("GFS_1_"));
        assert_eq!(a.begin, format!("__GFS_BEGIN__:{}", a.token));
    }

    #[test]
    fn test_wrap_layout() {
        let f = Frame::new(7);
        let text = f.wrap("id");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("echo '{}'", f.begin));
        assert_eq!(lines[1], format!("echo '{}' 1>&2", f.begin));
        assert_eq!(lines[2], "id");
        assert_eq!(lines[3], "RC=$?");
        assert!(lines[4].contains("__GFS_RC__:"));
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn test_parse_rc() {
        let f = Frame::new(3);
        assert_eq!(f.parse_rc(&format!("__GFS_RC__:{}:0", f.token)), Some(0));
        assert_eq!(f.parse_rc(&format!("__GFS_RC__:{}:127", f.token)), Some(127));
        assert_eq!(f.parse_rc(&format!("__GFS_RC__:{}:x", f.token)), Some(-1));
        assert_eq!(f.parse_rc("__GFS_RC__:GFS_9_0:0"), None);
        assert_eq!(f.parse_rc("hello"), None);
    }

    #[test]
    fn test_quoting() {
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
        assert_eq!(nested_sh("echo 'a'"), r"sh -c 'echo '\''a'\'''");
        assert_eq!(brace_group("true"), "{\ntrue\n}");
    }
}
