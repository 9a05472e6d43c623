//! The parsed [`Command`] and its [`CommandKind`] tag.

/// Type tag of a parsed script line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    String,
    StringLn,
    StringDelay,
    Delay,
    DefaultDelay,
    /// A named key tap. `args[0]` holds the canonical key name.
    Key,
    /// A media key. `args[0]` holds the key name; no device effect.
    Media,
    ModifierCombo,
    Hold,
    Release,
    KeyDown,
    KeyUp,
    InjectMod,
    MouseClick,
    MouseHold,
    MouseDrag,
    MouseMove,
    MouseScroll,
    RandomLowercase,
    RandomUppercase,
    RandomLetter,
    RandomNumber,
    RandomSpecial,
    RandomChar,
    Var,
    If,
    ElseIf,
    Else,
    EndIf,
    While,
    EndWhile,
    Try,
    Catch,
    EndTry,
    Function,
    EndFunction,
    Return,
    CallFunction,
    Repeat,
    WaitFor,
    SleepUntil,
    AttackMode,
    Unknown,
}

impl CommandKind {
    /// Canonical keyword, as shown in step events.
    pub fn keyword(self) -> &'static str {
        use CommandKind::*;
        match self {
            String => "STRING",
            StringLn => "STRINGLN",
            StringDelay => "STRING_DELAY",
            Delay => "DELAY",
            DefaultDelay => "DEFAULT_DELAY",
            Key => "KEY",
            Media => "MEDIA",
            ModifierCombo => "MODIFIER_COMBO",
            Hold => "HOLD",
            Release => "RELEASE",
            KeyDown => "KEYDOWN",
            KeyUp => "KEYUP",
            InjectMod => "INJECT_MOD",
            MouseClick => "MOUSE_CLICK",
            MouseHold => "MOUSE_HOLD",
            MouseDrag => "MOUSE_DRAG",
            MouseMove => "MOUSE_MOVE",
            MouseScroll => "MOUSE_SCROLL",
            RandomLowercase => "RANDOM_LOWERCASE_LETTER",
            RandomUppercase => "RANDOM_UPPERCASE_LETTER",
            RandomLetter => "RANDOM_LETTER",
            RandomNumber => "RANDOM_NUMBER",
            RandomSpecial => "RANDOM_SPECIAL",
            RandomChar => "RANDOM_CHAR",
            Var => "VAR",
            If => "IF",
            ElseIf => "ELSE_IF",
            Else => "ELSE",
            EndIf => "END_IF",
            While => "WHILE",
            EndWhile => "END_WHILE",
            Try => "TRY",
            Catch => "CATCH",
            EndTry => "END_TRY",
            Function => "FUNCTION",
            EndFunction => "END_FUNCTION",
            Return => "RETURN",
            CallFunction => "CALL_FUNCTION",
            Repeat => "REPEAT",
            WaitFor => "WAIT_FOR",
            SleepUntil => "SLEEP_UNTIL",
            AttackMode => "ATTACKMODE",
            Unknown => "UNKNOWN",
        }
    }

    /// Whether the command counts toward progress.
    pub fn is_executable(self) -> bool {
        use CommandKind::*;
        !matches!(
            self,
            If | ElseIf
                | Else
                | EndIf
                | While
                | EndWhile
                | Try
                | Catch
                | EndTry
                | Function
                | EndFunction
                | DefaultDelay
                | Repeat
        )
    }

    /// Whether the command writes to the HID devices.
    ///
    /// `Unknown` is gated separately, once it resolves to a key combination.
    pub fn requires_host(self) -> bool {
        use CommandKind::*;
        matches!(
            self,
            String
                | StringLn
                | StringDelay
                | Key
                | ModifierCombo
                | Hold
                | Release
                | KeyDown
                | KeyUp
                | InjectMod
                | MouseClick
                | MouseHold
                | MouseDrag
                | MouseMove
                | MouseScroll
                | RandomLowercase
                | RandomUppercase
                | RandomLetter
                | RandomNumber
                | RandomSpecial
                | RandomChar
        )
    }
}

/// One parsed script line. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub args: Vec<String>,
    /// 1-based source line.
    pub line: usize,
}

impl Command {
    pub fn new(kind: CommandKind, args: Vec<String>, line: usize) -> Self {
        Self { kind, args, line }
    }

    pub fn arg(&self, idx: usize) -> &str {
        self.args.get(idx).map(String::as_str).unwrap_or("")
    }

    /// Name reported in step events: the key name for key taps, the keyword otherwise.
    pub fn name(&self) -> &str {
        match self.kind {
            CommandKind::Key | CommandKind::Media => self.arg(0),
            kind => kind.keyword(),
        }
    }

    /// Short human summary for progress events.
    pub fn describe(&self) -> String {
        use CommandKind::*;
        let joined = self.args.join(" ");
        match self.kind {
            String | StringLn => format!("{} ({} chars)", self.name(), self.arg(0).chars().count()),
            StringDelay => format!(
                "STRING_DELAY {}ms ({} chars)",
                self.arg(0),
                self.arg(1).chars().count()
            ),
            Delay | DefaultDelay => format!("{} {}ms", self.name(), self.arg(0)),
            ModifierCombo => format!("COMBO {}", self.arg(0)).trim().to_string(),
            MouseClick | MouseHold | MouseDrag | MouseMove | MouseScroll => {
                format!("MOUSE {} {}", &self.name()[6..], joined).trim().to_string()
            }
            SleepUntil | WaitFor => format!("{} {}", self.name(), joined).trim().to_string(),
            _ => self.name().to_string(),
        }
    }
}
