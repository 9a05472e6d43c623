//! The script interpreter.
//!
//! One [`Engine`] drives one run. It walks the preprocessed command list by
//! index range, resolving each block construct by scanning forward for its
//! matching terminator, and hands leaf actions to an [`ActionBackend`].
//! Non-local exits (`RETURN`, cancellation) travel back up as [`Flow`]
//! values; errors travel as [`ScriptError`].

use crate::backend::ActionBackend;
use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::command::{Command, CommandKind};
use crate::error::ScriptError;
use crate::event::{EventSink, ExecEvent};
use crate::expr::{self, Variables};
use crate::hid::MAX_KEYS;
use crate::parser::parse_str;
use crate::preprocess::{FunctionDef, Program, preprocess, var_name};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum nesting of function calls.
pub const MAX_CALL_DEPTH: u32 = 64;

/// Reserved variable holding the last exit code.
pub const EXIT_CODE_VAR: &str = "$?";

/// Stored variable values are unsigned 16-bit.
pub(crate) fn clamp_u16(value: i32) -> i32 {
    value.clamp(0, 65_535)
}

/// How a block finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Return(i32),
    Cancelled,
}

type Exec = Result<Flow, ScriptError>;

/// Terminal result of [`Engine::run`].
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(ScriptError),
}

/// Scales script delays by the caller's multiplier.
#[derive(Debug, Clone, Copy)]
pub struct DelayScaler {
    multiplier: f64,
}

impl DelayScaler {
    pub const MAX_MS: u64 = 300_000;

    pub fn new(multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier >= 0.0 {
            multiplier
        } else {
            1.0
        };
        Self { multiplier }
    }

    pub fn scale_ms(&self, raw_ms: i64) -> u64 {
        let scaled = (raw_ms as f64 * self.multiplier).round();
        scaled.clamp(0.0, Self::MAX_MS as f64) as u64
    }
}

/// Global variables plus the stack of call-local scopes.
#[derive(Debug, Default, Clone)]
pub struct Scopes {
    globals: HashMap<String, i32>,
    locals: Vec<HashMap<String, i32>>,
}

impl Scopes {
    /// Write to the innermost scope that defines `name`, else to the globals.
    pub fn set(&mut self, name: &str, value: i32) {
        let key = var_name(name);
        for scope in self.locals.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(&key) {
                *slot = value;
                return;
            }
        }
        self.globals.insert(key, value);
    }

    pub fn depth(&self) -> usize {
        self.locals.len()
    }

    fn push(&mut self, scope: HashMap<String, i32>) {
        self.locals.push(scope);
    }

    fn pop(&mut self) {
        self.locals.pop();
    }
}

impl Variables for Scopes {
    fn get(&self, name: &str) -> Option<i32> {
        self.locals
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .or_else(|| self.globals.get(name).copied())
    }
}

/// Keyboard and mouse state the script is holding, plus run counters.
#[derive(Debug, Default, Clone)]
pub struct ExecutionState {
    pub total: u32,
    pub completed: u32,
    /// Held key codes, in press order, never more than six.
    pub held_keys: Vec<u8>,
    pub held_modifiers: u8,
    pub injected_modifiers: u8,
    pub held_buttons: u8,
    pub call_depth: u32,
}

impl ExecutionState {
    /// Modifiers applied to every tap.
    pub fn active_modifiers(&self) -> u8 {
        self.held_modifiers | self.injected_modifiers
    }

    fn is_holding(&self) -> bool {
        !self.held_keys.is_empty()
            || self.held_modifiers != 0
            || self.injected_modifiers != 0
            || self.held_buttons != 0
    }

    pub(crate) fn hold_key(&mut self, code: u8) -> bool {
        if self.held_keys.contains(&code) {
            return true;
        }
        if self.held_keys.len() >= MAX_KEYS {
            return false;
        }
        self.held_keys.push(code);
        true
    }

    pub(crate) fn release_key(&mut self, code: u8) {
        self.held_keys.retain(|k| *k != code);
    }
}

struct Reporter {
    execution_id: String,
    sink: EventSink,
    clock: Arc<dyn Clock>,
}

impl Reporter {
    fn emit(&self, event: ExecEvent) {
        (self.sink)(event);
    }
}

/// Interpreter for one script run.
pub struct Engine<B: ActionBackend> {
    pub(crate) backend: B,
    pub(crate) scopes: Scopes,
    pub(crate) state: ExecutionState,
    pub(crate) scaler: DelayScaler,
    pub(crate) default_delay_ms: u64,
    functions: Arc<HashMap<String, Arc<FunctionDef>>>,
    reporter: Option<Reporter>,
    cancel: Option<CancelToken>,
}

impl<B: ActionBackend> Engine<B> {
    pub fn new(backend: B, multiplier: f64) -> Self {
        Self {
            backend,
            scopes: Scopes::default(),
            state: ExecutionState::default(),
            scaler: DelayScaler::new(multiplier),
            default_delay_ms: 0,
            functions: Arc::new(HashMap::new()),
            reporter: None,
            cancel: None,
        }
    }

    /// Emit start/step/terminal events to `sink`.
    pub fn with_events(
        mut self,
        execution_id: impl Into<String>,
        sink: EventSink,
        clock: Arc<dyn Clock>,
    ) -> Self {
        self.reporter = Some(Reporter {
            execution_id: execution_id.into(),
            sink,
            clock,
        });
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Current value of a variable as the script would see it.
    pub fn variable(&self, name: &str) -> Option<i32> {
        self.scopes.get(&var_name(name))
    }

    /// Run `program` to completion, cancellation or failure.
    ///
    /// Exactly one terminal event is emitted. Held keys, buttons and
    /// modifiers are released before it on every abort, and on success
    /// whenever anything is still held.
    pub async fn run(&mut self, program: &Program) -> RunOutcome {
        self.functions = Arc::new(program.functions.clone());
        self.scopes.set(EXIT_CODE_VAR, 0);
        self.state.total = program.executable_steps();
        self.state.completed = 0;
        self.emit(|id, ts, st| ExecEvent::start(id, st.total, ts));

        let result = self
            .execute_range(&program.commands, 0, program.commands.len())
            .await;

        match result {
            Ok(Flow::Cancelled) => {
                self.release_all().await;
                info!(completed = self.state.completed, "script cancelled");
                self.emit(|id, ts, st| ExecEvent::cancelled(id, st.completed, st.total, ts));
                RunOutcome::Cancelled
            }
            Ok(flow) => {
                if let Flow::Return(code) = flow {
                    self.set_exit_code(code);
                }
                if self.state.is_holding() {
                    self.release_all().await;
                }
                info!(completed = self.state.completed, "script finished");
                self.emit(|id, ts, st| ExecEvent::done(id, st.completed, st.total, ts));
                RunOutcome::Completed
            }
            Err(err) => {
                self.release_all().await;
                warn!(error = %err, "script failed");
                let code = err.code();
                let message = err.to_string();
                self.emit(move |id, ts, st| {
                    ExecEvent::error(
                        id,
                        st.completed,
                        st.total,
                        message,
                        code.map(|c| c.as_str()),
                        ts,
                    )
                });
                RunOutcome::Failed(err)
            }
        }
    }

    /// Parse, preprocess and run `script`.
    pub async fn run_script(&mut self, script: &str) -> RunOutcome {
        let program = preprocess(parse_str(script));
        self.run(&program).await
    }

    fn emit(&self, build: impl FnOnce(&str, u64, &ExecutionState) -> ExecEvent) {
        if let Some(reporter) = &self.reporter {
            let event = build(&reporter.execution_id, reporter.clock.now_ms(), &self.state);
            reporter.emit(event);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    pub(crate) fn eval(&self, expr: &str) -> i32 {
        expr::evaluate(expr, &self.scopes)
    }

    pub(crate) fn set_exit_code(&mut self, value: i32) {
        self.scopes.set(EXIT_CODE_VAR, clamp_u16(value));
    }

    /// Release every held key, modifier and mouse button. Failures are logged;
    /// the mouse is skipped when the backend has none.
    pub(crate) async fn release_all(&mut self) {
        self.state.held_keys.clear();
        self.state.held_modifiers = 0;
        self.state.injected_modifiers = 0;
        self.state.held_buttons = 0;
        if let Err(e) = self.backend.keyboard_report(0, &[]).await {
            warn!(error = %e, "failed to release keyboard");
        }
        if !self.backend.has_mouse() {
            return;
        }
        if let Err(e) = self.backend.mouse_report(0, 0, 0, 0).await {
            warn!(error = %e, "failed to release mouse buttons");
        }
    }

    fn mark_step(&mut self, cmd: &Command) {
        if !cmd.kind.is_executable() {
            return;
        }
        self.state.completed += 1;
        // loops and calls can run more steps than the top level declares
        self.state.total = self.state.total.max(self.state.completed);
        self.emit(|id, ts, st| {
            ExecEvent::step(
                id,
                st.completed,
                st.total,
                cmd.line,
                cmd.name(),
                cmd.describe(),
                ts,
            )
        });
    }

    /// Execute `cmds[start..end]`.
    fn execute_range<'a>(
        &'a mut self,
        cmds: &'a [Command],
        start: usize,
        end: usize,
    ) -> Pin<Box<dyn Future<Output = Exec> + Send + 'a>> {
        Box::pin(async move {
            let mut i = start;
            while i < end {
                if self.is_cancelled() {
                    return Ok(Flow::Cancelled);
                }
                let cmd = &cmds[i];
                match cmd.kind {
                    CommandKind::If => {
                        let end_if = find_matching(cmds, i, end, CommandKind::If, CommandKind::EndIf);
                        let flow = self.execute_if_chain(cmds, i, end_if).await?;
                        if flow != Flow::Continue {
                            return Ok(flow);
                        }
                        i = end_if + 1;
                    }
                    CommandKind::While => {
                        let end_while =
                            find_matching(cmds, i, end, CommandKind::While, CommandKind::EndWhile);
                        let flow = self.execute_while(cmds, i, end_while).await?;
                        if flow != Flow::Continue {
                            return Ok(flow);
                        }
                        i = end_while + 1;
                    }
                    CommandKind::Try => {
                        let (catch, end_try) = find_try(cmds, i, end);
                        let flow = self.execute_try(cmds, i, catch, end_try).await?;
                        if flow != Flow::Continue {
                            return Ok(flow);
                        }
                        i = end_try + 1;
                    }
                    CommandKind::ElseIf
                    | CommandKind::Else
                    | CommandKind::EndIf
                    | CommandKind::EndWhile
                    | CommandKind::Catch
                    | CommandKind::EndTry
                    | CommandKind::Function
                    | CommandKind::EndFunction
                    | CommandKind::Repeat => {
                        debug!(line = cmd.line, kind = cmd.kind.keyword(), "stray block marker");
                        i += 1;
                    }
                    CommandKind::Return => {
                        let value = if cmd.arg(0).trim().is_empty() {
                            0
                        } else {
                            self.eval(cmd.arg(0))
                        };
                        return Ok(Flow::Return(clamp_u16(value)));
                    }
                    _ => {
                        if cmd.kind.requires_host() {
                            self.backend.ensure_host().await?;
                        }
                        if self.execute_leaf(cmd).await? == Flow::Cancelled {
                            return Ok(Flow::Cancelled);
                        }
                        self.mark_step(cmd);
                        if cmd.kind.is_executable() && self.default_delay_ms > 0 {
                            let ms = self.scaler.scale_ms(self.default_delay_ms as i64);
                            self.backend.sleep_ms(ms).await;
                        }
                        i += 1;
                    }
                }
            }
            Ok(Flow::Continue)
        })
    }

    async fn execute_if_chain(&mut self, cmds: &[Command], if_idx: usize, end_if: usize) -> Exec {
        let mut branches: Vec<(Option<&str>, usize, usize)> = Vec::new();
        let mut cond = Some(cmds[if_idx].arg(0));
        let mut branch_start = if_idx + 1;
        let mut depth = 0usize;
        for (scan, cmd) in cmds.iter().enumerate().take(end_if).skip(if_idx + 1) {
            match cmd.kind {
                CommandKind::If => depth += 1,
                CommandKind::EndIf => depth = depth.saturating_sub(1),
                CommandKind::ElseIf if depth == 0 => {
                    branches.push((cond, branch_start, scan));
                    cond = Some(cmd.arg(0));
                    branch_start = scan + 1;
                }
                CommandKind::Else if depth == 0 => {
                    branches.push((cond, branch_start, scan));
                    cond = None;
                    branch_start = scan + 1;
                }
                _ => {}
            }
        }
        branches.push((cond, branch_start, end_if));

        for (guard, start, stop) in branches {
            let taken = match guard {
                Some(expr) => expr::evaluate_condition(expr, &self.scopes),
                None => true,
            };
            if taken {
                return self.execute_range(cmds, start, stop).await;
            }
        }
        Ok(Flow::Continue)
    }

    async fn execute_while(&mut self, cmds: &[Command], while_idx: usize, end_while: usize) -> Exec {
        let guard = cmds[while_idx].arg(0);
        let cap = self.backend.loop_iteration_cap();
        let mut iterations: u32 = 0;
        loop {
            if self.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            if !expr::evaluate_condition(guard, &self.scopes) {
                break;
            }
            if let Some(cap) = cap {
                if iterations >= cap {
                    warn!(line = cmds[while_idx].line, cap, "loop iteration cap reached");
                    break;
                }
            }
            iterations += 1;
            let flow = self.execute_range(cmds, while_idx + 1, end_while).await?;
            if flow != Flow::Continue {
                return Ok(flow);
            }
        }
        Ok(Flow::Continue)
    }

    async fn execute_try(
        &mut self,
        cmds: &[Command],
        try_idx: usize,
        catch_idx: Option<usize>,
        end_try: usize,
    ) -> Exec {
        let body_end = catch_idx.unwrap_or(end_try);
        match self.execute_range(cmds, try_idx + 1, body_end).await {
            Ok(flow) => Ok(flow),
            Err(err) => match catch_idx {
                Some(catch) => {
                    warn!(line = cmds[try_idx].line, error = %err, "caught script error");
                    self.execute_range(cmds, catch + 1, end_try).await
                }
                None => Err(err),
            },
        }
    }

    /// Call a script function. Unknown names are a no-op with exit code 0.
    pub(crate) async fn call_function(&mut self, name: &str, args: &[String]) -> Exec {
        let Some(def) = self.functions.get(name).cloned() else {
            debug!(function = name, "call to undefined function");
            self.set_exit_code(0);
            return Ok(Flow::Continue);
        };
        if self.state.call_depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::CallDepthExceeded(MAX_CALL_DEPTH));
        }

        let mut scope = HashMap::new();
        for (i, param) in def.params.iter().enumerate() {
            let value = match args.get(i).map(|a| a.trim()) {
                Some(expr) if !expr.is_empty() => self.eval(expr),
                _ => 0,
            };
            scope.insert(param.clone(), clamp_u16(value));
        }

        self.state.call_depth += 1;
        self.scopes.push(scope);
        let result = self.execute_range(&def.body, 0, def.body.len()).await;
        self.scopes.pop();
        self.state.call_depth -= 1;

        match result? {
            Flow::Return(code) => {
                self.set_exit_code(code);
                Ok(Flow::Continue)
            }
            Flow::Continue => {
                self.set_exit_code(0);
                Ok(Flow::Continue)
            }
            Flow::Cancelled => Ok(Flow::Cancelled),
        }
    }
}

/// Index of the terminator matching the opener at `open_idx`, counting nested
/// openers of the same kind. Returns `end` when there is none.
pub(crate) fn find_matching(
    cmds: &[Command],
    open_idx: usize,
    end: usize,
    open: CommandKind,
    close: CommandKind,
) -> usize {
    let mut depth = 0usize;
    for (j, cmd) in cmds.iter().enumerate().take(end).skip(open_idx + 1) {
        if cmd.kind == open {
            depth += 1;
        } else if cmd.kind == close {
            if depth == 0 {
                return j;
            }
            depth -= 1;
        }
    }
    end
}

/// `(CATCH index at the same depth, END_TRY index)`.
pub(crate) fn find_try(cmds: &[Command], try_idx: usize, end: usize) -> (Option<usize>, usize) {
    let mut depth = 0usize;
    let mut catch = None;
    for (j, cmd) in cmds.iter().enumerate().take(end).skip(try_idx + 1) {
        match cmd.kind {
            CommandKind::Try => depth += 1,
            CommandKind::Catch if depth == 0 && catch.is_none() => catch = Some(j),
            CommandKind::EndTry => {
                if depth == 0 {
                    return (catch, j);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    (catch, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_scaler() {
        let s = DelayScaler::new(1.5);
        assert_eq!(s.scale_ms(100), 150);
        assert_eq!(s.scale_ms(-5), 0);
        assert_eq!(s.scale_ms(1_000_000), DelayScaler::MAX_MS);
        assert_eq!(DelayScaler::new(f64::NAN).scale_ms(10), 10);
    }

    #[test]
    fn test_scopes_write_innermost_defining() {
        let mut s = Scopes::default();
        s.set("$g", 1);
        s.push(HashMap::from([("$p".to_string(), 5)]));
        s.set("$p", 6);
        s.set("$g", 2);
        s.set("new", 3);
        assert_eq!(s.get("$p"), Some(6));
        s.pop();
        assert_eq!(s.get("$p"), None);
        assert_eq!(s.get("$g"), Some(2));
        assert_eq!(s.get("$new"), Some(3));
    }

    #[test]
    fn test_find_matching_respects_nesting() {
        let cmds = parse_str("IF TRUE\nIF FALSE\nSTRING a\nEND_IF\nSTRING b\nEND_IF\n");
        assert_eq!(find_matching(&cmds, 0, cmds.len(), CommandKind::If, CommandKind::EndIf), 5);
        assert_eq!(find_matching(&cmds, 1, cmds.len(), CommandKind::If, CommandKind::EndIf), 3);
        let open = parse_str("WHILE TRUE\nSTRING a\n");
        assert_eq!(
            find_matching(&open, 0, open.len(), CommandKind::While, CommandKind::EndWhile),
            2
        );
    }

    #[test]
    fn test_find_try_catch_at_same_depth() {
        let cmds = parse_str("TRY\nTRY\nCATCH\nEND_TRY\nCATCH\nSTRING x\nEND_TRY\n");
        assert_eq!(find_try(&cmds, 0, cmds.len()), (Some(4), 6));
        assert_eq!(find_try(&cmds, 1, cmds.len()), (Some(2), 3));
    }

    #[test]
    fn test_hold_key_capacity() {
        let mut st = ExecutionState::default();
        for code in 4..10 {
            assert!(st.hold_key(code));
        }
        assert!(!st.hold_key(10));
        assert!(st.hold_key(4));
        assert_eq!(st.held_keys, vec![4, 5, 6, 7, 8, 9]);
        st.release_key(6);
        assert_eq!(st.held_keys.len(), 5);
    }
}
