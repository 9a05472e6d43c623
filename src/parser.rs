//! Line-oriented parser for DuckyScript.
//!
//! The top-level entry points are [`parse_str`] and [`parse_file`]. Parsing
//! never fails: a line that matches nothing becomes a
//! [`CommandKind::Unknown`] command carrying the raw text.

use crate::command::{Command, CommandKind};
use crate::hid::{key_code_for, modifier_for};
use anyhow::{Context as _, Result};
use std::path::Path;

/// Parse a script held in memory.
///
/// # Example
///
/// ```
/// use hidscript::parse_str;
/// use hidscript::command::CommandKind;
///
/// let commands = parse_str("DELAY 500\nSTRING hello world\nENTER\n");
/// assert_eq!(commands.len(), 3);
/// assert_eq!(commands[1].kind, CommandKind::String);
/// assert_eq!(commands[1].args[0], "hello world");
/// ```
pub fn parse_str(content: &str) -> Vec<Command> {
    let mut parser = ScriptParser::default();
    for (idx, line) in content.lines().enumerate() {
        parser.feed(idx + 1, line.strip_suffix('\r').unwrap_or(line));
    }
    parser.finish()
}

/// Parse a script file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<Command>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script file: {}", path.display()))?;
    Ok(parse_str(&content))
}

#[derive(Debug, Default)]
enum Block {
    #[default]
    None,
    Rem,
    Text {
        kind: CommandKind,
        pieces: Vec<String>,
        line: usize,
    },
}

#[derive(Debug, Default)]
struct ScriptParser {
    commands: Vec<Command>,
    defines: Vec<(String, String)>,
    block: Block,
}

impl ScriptParser {
    fn feed(&mut self, line_no: usize, raw: &str) {
        match &mut self.block {
            Block::Rem => {
                if raw.trim().eq_ignore_ascii_case("END_REM") {
                    self.block = Block::None;
                }
                return;
            }
            Block::Text { kind, pieces, .. } => {
                let terminator = match kind {
                    CommandKind::StringLn => "END_STRINGLN",
                    _ => "END_STRING",
                };
                let t = raw.trim();
                if t.eq_ignore_ascii_case(terminator) {
                    self.close_text_block();
                } else if t.strip_prefix('\\').is_some_and(|r| r.eq_ignore_ascii_case(terminator)) {
                    pieces.push(terminator.to_string());
                } else {
                    pieces.push(raw.to_string());
                }
                return;
            }
            Block::None => {}
        }

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }
        let (head, _) = split_word(trimmed);
        if head.eq_ignore_ascii_case("REM") {
            return;
        }
        let line = self.expand_defines(trimmed);
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let (head, rest) = split_word(line);
        let keyword = head.to_ascii_uppercase();
        let compact = keyword.replace('_', "");

        match compact.as_str() {
            "REM" => return,
            "REMBLOCK" => {
                self.block = Block::Rem;
                return;
            }
            "DEFINE" => {
                let (name, value) = split_word(rest);
                if !name.is_empty() {
                    self.defines.push((name.to_string(), value.to_string()));
                }
                return;
            }
            "STRING" | "STRINGLN" if rest.trim().is_empty() => {
                let kind = if compact == "STRING" {
                    CommandKind::String
                } else {
                    CommandKind::StringLn
                };
                self.block = Block::Text {
                    kind,
                    pieces: Vec::new(),
                    line: line_no,
                };
                return;
            }
            _ => {}
        }

        let command = parse_line(line, head, &compact, rest, line_no);
        self.commands.push(command);
    }

    fn close_text_block(&mut self) {
        if let Block::Text { kind, pieces, line } = std::mem::take(&mut self.block) {
            let text = match kind {
                CommandKind::StringLn => pieces.join("\n"),
                _ => pieces.concat(),
            };
            self.commands.push(Command::new(kind, vec![text], line));
        }
    }

    fn expand_defines(&self, line: &str) -> String {
        let mut out = line.to_string();
        for (name, value) in &self.defines {
            if out.contains(name.as_str()) {
                out = out.replace(name.as_str(), value);
            }
        }
        out
    }

    fn finish(mut self) -> Vec<Command> {
        // an unterminated text block still types what it collected
        if matches!(self.block, Block::Text { .. }) {
            self.close_text_block();
        }
        self.commands
    }
}

type ParseFn = fn(rest: &str, line: usize) -> Command;

/// Keyword table, keyed by the upper-cased keyword with underscores removed.
///
/// To add a keyword, add one entry here and a `CommandKind` variant.
static REGISTRY: &[(&str, ParseFn)] = &[
    ("STRING", |rest, line| text(CommandKind::String, rest, line)),
    ("STRINGLN", |rest, line| text(CommandKind::StringLn, rest, line)),
    ("STRINGDELAY", parse_string_delay),
    ("DELAY", |rest, line| single(CommandKind::Delay, rest, "0", line)),
    ("DEFAULTDELAY", |rest, line| single(CommandKind::DefaultDelay, rest, "0", line)),
    ("HOLD", |rest, line| single(CommandKind::Hold, rest, "", line)),
    ("RELEASE", |rest, line| single(CommandKind::Release, rest, "", line)),
    ("KEYDOWN", |rest, line| single(CommandKind::KeyDown, rest, "", line)),
    ("KEYUP", |rest, line| single(CommandKind::KeyUp, rest, "", line)),
    ("INJECTMOD", |rest, line| single(CommandKind::InjectMod, rest, "", line)),
    ("MOUSE", parse_mouse),
    ("POINTER", parse_mouse),
    ("IF", |rest, line| guard(CommandKind::If, rest, line)),
    ("ELSE", parse_else),
    ("ELSEIF", |rest, line| guard(CommandKind::ElseIf, rest, line)),
    ("ENDIF", |_, line| bare(CommandKind::EndIf, line)),
    ("WHILE", |rest, line| guard(CommandKind::While, rest, line)),
    ("ENDWHILE", |_, line| bare(CommandKind::EndWhile, line)),
    ("TRY", |_, line| bare(CommandKind::Try, line)),
    ("CATCH", |_, line| bare(CommandKind::Catch, line)),
    ("ENDTRY", |_, line| bare(CommandKind::EndTry, line)),
    ("FUNCTION", parse_function_header),
    ("ENDFUNCTION", |_, line| bare(CommandKind::EndFunction, line)),
    ("RETURN", |rest, line| single(CommandKind::Return, rest, "", line)),
    ("VAR", parse_var),
    ("REPEAT", parse_repeat),
    ("RANDOMLOWERCASELETTER", |rest, line| single(CommandKind::RandomLowercase, rest, "1", line)),
    ("RANDOMUPPERCASELETTER", |rest, line| single(CommandKind::RandomUppercase, rest, "1", line)),
    ("RANDOMLETTER", |rest, line| single(CommandKind::RandomLetter, rest, "1", line)),
    ("RANDOMNUMBER", |rest, line| single(CommandKind::RandomNumber, rest, "1", line)),
    ("RANDOMSPECIAL", |rest, line| single(CommandKind::RandomSpecial, rest, "1", line)),
    ("RANDOMCHAR", |rest, line| single(CommandKind::RandomChar, rest, "1", line)),
    ("WAITFOR", parse_wait_for),
    ("SLEEPUNTIL", |rest, line| single(CommandKind::SleepUntil, rest, "", line)),
    ("ATTACKMODE", |rest, line| single(CommandKind::AttackMode, rest, "", line)),
];

/// Dispatch one non-empty, non-comment, macro-expanded line.
fn parse_line(line: &str, head: &str, compact: &str, rest: &str, line_no: usize) -> Command {
    if line.starts_with('$') {
        return match parse_assignment(line) {
            Some((name, expr)) => Command::new(CommandKind::Var, vec![name, expr], line_no),
            None => unknown(line, line_no),
        };
    }
    if let Some((_, parse)) = REGISTRY.iter().find(|(name, _)| *name == compact) {
        return parse(rest, line_no);
    }
    let first_part = head.split('-').next().unwrap_or(head);
    if modifier_for(first_part).is_some() {
        return Command::new(
            CommandKind::ModifierCombo,
            vec![line.to_ascii_uppercase()],
            line_no,
        );
    }
    if rest.trim().is_empty() {
        if compact.starts_with("MEDIA") {
            return Command::new(CommandKind::Media, vec![head.to_ascii_uppercase()], line_no);
        }
        if head.len() > 1 && key_code_for(compact).is_some() {
            return Command::new(CommandKind::Key, vec![head.to_ascii_uppercase()], line_no);
        }
    }
    if let Some((name, args)) = parse_function_call(line) {
        let mut all = vec![name];
        all.extend(args);
        return Command::new(CommandKind::CallFunction, all, line_no);
    }
    unknown(line, line_no)
}

fn unknown(line: &str, line_no: usize) -> Command {
    Command::new(CommandKind::Unknown, vec![line.to_string()], line_no)
}

fn bare(kind: CommandKind, line: usize) -> Command {
    Command::new(kind, Vec::new(), line)
}

fn single(kind: CommandKind, rest: &str, default: &str, line: usize) -> Command {
    let value = rest.trim();
    let value = if value.is_empty() { default } else { value };
    Command::new(kind, vec![value.to_string()], line)
}

/// Text after the keyword and its single separator is kept verbatim.
fn text(kind: CommandKind, rest: &str, line: usize) -> Command {
    Command::new(kind, vec![rest.to_string()], line)
}

fn guard(kind: CommandKind, rest: &str, line: usize) -> Command {
    Command::new(kind, vec![normalize_condition(rest)], line)
}

fn parse_else(rest: &str, line: usize) -> Command {
    let (word, cond) = split_word(rest.trim());
    if word.eq_ignore_ascii_case("IF") {
        guard(CommandKind::ElseIf, cond, line)
    } else {
        bare(CommandKind::Else, line)
    }
}

fn parse_string_delay(rest: &str, line: usize) -> Command {
    let (ms, text) = split_word(rest.trim_start());
    let ms = if ms.is_empty() { "0" } else { ms };
    Command::new(
        CommandKind::StringDelay,
        vec![ms.to_string(), text.to_string()],
        line,
    )
}

fn parse_mouse(rest: &str, line: usize) -> Command {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let sub = tokens.first().map(|s| s.to_ascii_uppercase()).unwrap_or_default();
    let arg = |i: usize, default: &str| tokens.get(i).copied().unwrap_or(default).to_string();
    let (kind, args) = match sub.as_str() {
        "CLICK" => (
            CommandKind::MouseClick,
            vec![arg(1, "LEFT").to_ascii_uppercase(), arg(2, "1")],
        ),
        "HOLD" => (
            CommandKind::MouseHold,
            vec![arg(1, "LEFT").to_ascii_uppercase(), arg(2, "0"), arg(3, "0"), arg(4, "1")],
        ),
        "DRAG" => (
            CommandKind::MouseDrag,
            vec![arg(1, "LEFT").to_ascii_uppercase(), arg(2, "0"), arg(3, "0"), arg(4, "1")],
        ),
        "MOVE" => (CommandKind::MouseMove, vec![arg(1, "0"), arg(2, "0"), arg(3, "1")]),
        "SCROLL" => (
            CommandKind::MouseScroll,
            vec![arg(1, "DOWN").to_ascii_uppercase(), arg(2, "1")],
        ),
        _ => return unknown(&format!("MOUSE {}", rest.trim()), line),
    };
    Command::new(kind, args, line)
}

fn parse_function_header(rest: &str, line: usize) -> Command {
    let rest = rest.trim();
    let (name, params) = match rest.find('(') {
        Some(open) => {
            let inner = rest[open + 1..].trim_end().trim_end_matches(')');
            (rest[..open].trim(), split_args(inner))
        }
        None => (rest, Vec::new()),
    };
    let mut args = vec![name.to_string()];
    args.extend(params);
    Command::new(CommandKind::Function, args, line)
}

fn parse_var(rest: &str, line: usize) -> Command {
    let rest = rest.trim();
    if let Some((name, expr)) = parse_assignment(rest) {
        return Command::new(CommandKind::Var, vec![name, expr], line);
    }
    let (name, expr) = split_word(rest);
    let name = name.trim_end_matches('=');
    let expr = expr.trim().trim_start_matches('=').trim();
    let expr = if expr.is_empty() { "0" } else { expr };
    Command::new(CommandKind::Var, vec![name.to_string(), expr.to_string()], line)
}

fn parse_repeat(rest: &str, line: usize) -> Command {
    let count = rest.trim().parse::<i64>().unwrap_or(1);
    Command::new(CommandKind::Repeat, vec![count.to_string()], line)
}

fn parse_wait_for(rest: &str, line: usize) -> Command {
    let args = rest.split_whitespace().take(2).map(str::to_string).collect();
    Command::new(CommandKind::WaitFor, args, line)
}

/// `$name = expr` or `$? = expr`.
fn parse_assignment(line: &str) -> Option<(String, String)> {
    let body = line.strip_prefix('$')?;
    let name_len = if body.starts_with('?') {
        1
    } else {
        body.find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(body.len())
    };
    if name_len == 0 {
        return None;
    }
    let name = format!("${}", &body[..name_len]);
    let after = body[name_len..].trim_start();
    let expr = after.strip_prefix('=')?;
    if expr.starts_with('=') {
        return None;
    }
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }
    Some((name, expr.to_string()))
}

/// `name(arg, arg, ...)`.
fn parse_function_call(line: &str) -> Option<(String, Vec<String>)> {
    let open = line.find('(')?;
    let name = line[..open].trim_end();
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_alphabetic() || first == '_') || !chars.all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    let inner = line[open + 1..].trim_end().strip_suffix(')')?;
    Some((name.to_string(), split_args(inner)))
}

fn split_args(inner: &str) -> Vec<String> {
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split off the first whitespace-delimited word; the remainder keeps its
/// content after exactly one separator.
fn split_word(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(i) => {
            let sep_len = s[i..].chars().next().map(char::len_utf8).unwrap_or(1);
            (&s[..i], &s[i + sep_len..])
        }
        None => (s, ""),
    }
}

/// Strip a trailing `THEN`/`DO` and one fully-enclosing pair of parentheses.
pub(crate) fn normalize_condition(raw: &str) -> String {
    let mut cond = raw.trim();
    for suffix in ["THEN", "DO"] {
        let Some(cut) = cond.len().checked_sub(suffix.len()) else {
            continue;
        };
        if cond.is_char_boundary(cut) {
            let (body, tail) = cond.split_at(cut);
            let boundary = body.is_empty() || body.ends_with(|c: char| c.is_whitespace() || c == ')');
            if tail.eq_ignore_ascii_case(suffix) && boundary {
                cond = body.trim_end();
                break;
            }
        }
    }
    strip_outer_parens(cond).to_string()
}

fn strip_outer_parens(s: &str) -> &str {
    let s = s.trim();
    if !(s.starts_with('(') && s.ends_with(')')) {
        return s;
    }
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != s.len() - 1 {
                    return s;
                }
            }
            _ => {}
        }
    }
    s[1..s.len() - 1].trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(cmds: &[Command]) -> Vec<CommandKind> {
        cmds.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn test_parse_basic_script() {
        let cmds = parse_str("DELAY 100\nSTRING hi there\nENTER\nGUI r\n");
        assert_eq!(
            kinds(&cmds),
            vec![
                CommandKind::Delay,
                CommandKind::String,
                CommandKind::Key,
                CommandKind::ModifierCombo
            ]
        );
        assert_eq!(cmds[1].args, vec!["hi there"]);
        assert_eq!(cmds[2].args, vec!["ENTER"]);
        assert_eq!(cmds[3].args, vec!["GUI R"]);
        assert_eq!(cmds[3].line, 4);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let script = "VAR $x = 1\nWHILE ($x < 3) DO\nSTRING a\nVAR $x = $x + 1\nEND_WHILE\n";
        assert_eq!(parse_str(script), parse_str(script));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let cmds = parse_str("REM hello\n\n  \nREM_BLOCK\nSTRING hidden\nEND_REM\nSTRING shown\n");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].args, vec!["shown"]);
    }

    #[test]
    fn test_string_block() {
        let cmds = parse_str("STRING\nab\n\\END_STRING\ncd\nEND_STRING\nENTER\n");
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].kind, CommandKind::String);
        assert_eq!(cmds[0].args, vec!["abEND_STRINGcd"]);
        assert_eq!(cmds[0].line, 1);
    }

    #[test]
    fn test_stringln_block() {
        let cmds = parse_str("STRINGLN\none\ntwo\nEND_STRINGLN\n");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].kind, CommandKind::StringLn);
        assert_eq!(cmds[0].args, vec!["one\ntwo"]);
    }

    #[test]
    fn test_define_substitution() {
        let cmds = parse_str("DEFINE #NAME world\nSTRING hello #NAME\n");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].args, vec!["hello world"]);
    }

    #[test]
    fn test_assignments() {
        let cmds = parse_str("VAR $x = 2\n$y = $x * 3\nVAR $z\n$? = 4\n$a == 3\n");
        assert_eq!(cmds[0].args, vec!["$x", "2"]);
        assert_eq!(cmds[1].kind, CommandKind::Var);
        assert_eq!(cmds[1].args, vec!["$y", "$x * 3"]);
        assert_eq!(cmds[2].args, vec!["$z", "0"]);
        assert_eq!(cmds[3].args, vec!["$?", "4"]);
        assert_eq!(cmds[4].kind, CommandKind::Unknown);
    }

    #[test]
    fn test_conditions_are_normalized() {
        let cmds = parse_str("IF ($x > 1) THEN\nELSE IF $x == 0 THEN\nELSE\nEND_IF\nWHILE (TRUE) DO\nENDWHILE\n");
        assert_eq!(
            kinds(&cmds),
            vec![
                CommandKind::If,
                CommandKind::ElseIf,
                CommandKind::Else,
                CommandKind::EndIf,
                CommandKind::While,
                CommandKind::EndWhile
            ]
        );
        assert_eq!(cmds[0].args, vec!["$x > 1"]);
        assert_eq!(cmds[1].args, vec!["$x == 0"]);
        assert_eq!(cmds[4].args, vec!["TRUE"]);
    }

    #[test]
    fn test_normalize_condition_keeps_partial_parens() {
        assert_eq!(normalize_condition("($a > 1) && ($b < 2)"), "($a > 1) && ($b < 2)");
        assert_eq!(normalize_condition("(($a))"), "($a)");
        assert_eq!(normalize_condition("$DONE"), "$DONE");
    }

    #[test]
    fn test_functions_and_calls() {
        let cmds = parse_str("FUNCTION greet(a, b)\nRETURN $a + $b\nEND_FUNCTION\ngreet(1, 2)\nnoargs()\n");
        assert_eq!(cmds[0].kind, CommandKind::Function);
        assert_eq!(cmds[0].args, vec!["greet", "a", "b"]);
        assert_eq!(cmds[1].args, vec!["$a + $b"]);
        assert_eq!(cmds[3].kind, CommandKind::CallFunction);
        assert_eq!(cmds[3].args, vec!["greet", "1", "2"]);
        assert_eq!(cmds[4].args, vec!["noargs"]);
    }

    #[test]
    fn test_mouse_commands() {
        let cmds = parse_str("MOUSE CLICK RIGHT 2\nPOINTER MOVE 10 -5\nMOUSE SCROLL up\nMOUSE WIGGLE\n");
        assert_eq!(cmds[0].kind, CommandKind::MouseClick);
        assert_eq!(cmds[0].args, vec!["RIGHT", "2"]);
        assert_eq!(cmds[1].args, vec!["10", "-5", "1"]);
        assert_eq!(cmds[2].args, vec!["UP", "1"]);
        assert_eq!(cmds[3].kind, CommandKind::Unknown);
    }

    #[test]
    fn test_aliases_and_misc() {
        let cmds = parse_str(
            "DEFAULTDELAY 10\nENDIF\nREPEAT 3\nREPEAT x\nRANDOM_NUMBER 4\nWAIT_FOR HOST 500\nSTRING_DELAY 20 slow text\nF13\nMEDIA_PLAY\nCTRL-ALT-DEL\n",
        );
        assert_eq!(cmds[0].kind, CommandKind::DefaultDelay);
        assert_eq!(cmds[1].kind, CommandKind::EndIf);
        assert_eq!(cmds[2].args, vec!["3"]);
        assert_eq!(cmds[3].args, vec!["1"]);
        assert_eq!(cmds[4].args, vec!["4"]);
        assert_eq!(cmds[5].args, vec!["HOST", "500"]);
        assert_eq!(cmds[6].args, vec!["20", "slow text"]);
        assert_eq!(cmds[7].kind, CommandKind::Key);
        assert_eq!(cmds[8].kind, CommandKind::Media);
        assert_eq!(cmds[9].kind, CommandKind::ModifierCombo);
    }

    #[test]
    fn test_unknown_fallback() {
        let cmds = parse_str("x\nhello world\n");
        assert_eq!(cmds[0].kind, CommandKind::Unknown);
        assert_eq!(cmds[1].args, vec!["hello world"]);
    }

    #[test]
    fn test_parse_file_missing() {
        assert!(parse_file("/nonexistent/script.txt").is_err());
    }
}
