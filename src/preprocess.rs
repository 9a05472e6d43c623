//! Lifts function bodies out of the command stream and expands `REPEAT`.

use crate::command::{Command, CommandKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Most copies a single `REPEAT` may append.
pub const MAX_REPEAT: i64 = 10_000;

/// A function lifted out of the main sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    /// Parameter names, `$`-prefixed.
    pub params: Vec<String>,
    pub body: Vec<Command>,
}

/// A preprocessed script: the flat top-level sequence plus the function table.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub commands: Vec<Command>,
    pub functions: HashMap<String, Arc<FunctionDef>>,
}

impl Program {
    /// Number of top-level commands that count toward progress (at least 1).
    pub fn executable_steps(&self) -> u32 {
        let n = self
            .commands
            .iter()
            .filter(|c| c.kind.is_executable())
            .count();
        (n as u32).max(1)
    }
}

/// Single linear pass: capture `FUNCTION ... END_FUNCTION` into the table and
/// replace each `REPEAT n` with `max(n, 1)` copies of the previously emitted
/// command. Everything else passes through in order.
pub fn preprocess(commands: Vec<Command>) -> Program {
    let mut functions = HashMap::new();
    let commands = lift(commands, &mut functions);
    Program {
        commands,
        functions,
    }
}

fn lift(commands: Vec<Command>, functions: &mut HashMap<String, Arc<FunctionDef>>) -> Vec<Command> {
    let mut out: Vec<Command> = Vec::with_capacity(commands.len());
    let mut iter = commands.into_iter();
    while let Some(cmd) = iter.next() {
        match cmd.kind {
            CommandKind::Function => {
                let body: Vec<Command> = iter
                    .by_ref()
                    .take_while(|c| c.kind != CommandKind::EndFunction)
                    .collect();
                let name = cmd.arg(0).to_string();
                let params = cmd.args.iter().skip(1).map(|p| var_name(p)).collect();
                let body = lift(body, functions);
                tracing::debug!(function = %name, body_len = body.len(), "captured function");
                functions.insert(name, Arc::new(FunctionDef { params, body }));
            }
            CommandKind::Repeat => {
                let mut times = cmd.arg(0).parse::<i64>().unwrap_or(1).max(1);
                if times > MAX_REPEAT {
                    tracing::warn!(line = cmd.line, requested = times, cap = MAX_REPEAT, "REPEAT count capped");
                    times = MAX_REPEAT;
                }
                if let Some(last) = out.last().cloned() {
                    for _ in 0..times {
                        out.push(last.clone());
                    }
                }
            }
            _ => out.push(cmd),
        }
    }
    out
}

/// Ensure the `$` sigil.
pub fn var_name(name: &str) -> String {
    let name = name.trim();
    if name.starts_with('$') {
        name.to_string()
    } else {
        format!("${name}")
    }
}
