//! Execution events emitted while a script runs.

use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecEventKind {
    Start,
    Step,
    Done,
    Error,
    CancelRequested,
}

/// One event on the execution stream. Serialized as a camelCase JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecEvent {
    #[serde(rename = "type")]
    pub kind: ExecEventKind,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub message: String,
    #[serde(rename = "error_code", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
    pub timestamp_ms: u64,
}

/// Receives execution events. Must not block.
pub type EventSink = Arc<dyn Fn(ExecEvent) + Send + Sync>;

/// Running progress ratio, capped below 1.0 until the run finishes.
pub fn running_progress(completed: u32, total: u32) -> f64 {
    let total = total.max(1) as f64;
    (completed as f64 / total * 0.99).min(0.99)
}

impl ExecEvent {
    fn base(kind: ExecEventKind, execution_id: &str, message: impl Into<String>, ts: u64) -> Self {
        Self {
            kind,
            execution_id: execution_id.to_string(),
            total: None,
            completed: None,
            progress: None,
            line_number: None,
            command: None,
            message: message.into(),
            error_code: None,
            success: None,
            cancelled: None,
            timestamp_ms: ts,
        }
    }

    fn counts(mut self, completed: u32, total: u32, progress: f64) -> Self {
        self.total = Some(total);
        self.completed = Some(completed);
        self.progress = Some(progress);
        self
    }

    pub fn start(execution_id: &str, total: u32, ts: u64) -> Self {
        Self::base(ExecEventKind::Start, execution_id, "Execution started", ts).counts(0, total, 0.0)
    }

    pub fn step(
        execution_id: &str,
        completed: u32,
        total: u32,
        line: usize,
        command: &str,
        message: String,
        ts: u64,
    ) -> Self {
        let mut event = Self::base(ExecEventKind::Step, execution_id, message, ts).counts(
            completed,
            total,
            running_progress(completed, total),
        );
        event.line_number = Some(line);
        event.command = Some(command.to_string());
        event
    }

    pub fn done(execution_id: &str, completed: u32, total: u32, ts: u64) -> Self {
        let mut event = Self::base(ExecEventKind::Done, execution_id, "Execution complete", ts)
            .counts(completed, total, 1.0);
        event.success = Some(true);
        event.cancelled = Some(false);
        event
    }

    pub fn cancelled(execution_id: &str, completed: u32, total: u32, ts: u64) -> Self {
        let mut event = Self::base(ExecEventKind::Done, execution_id, "Execution cancelled", ts)
            .counts(completed, total, running_progress(completed, total));
        event.success = Some(false);
        event.cancelled = Some(true);
        event
    }

    pub fn error(
        execution_id: &str,
        completed: u32,
        total: u32,
        message: String,
        code: Option<&str>,
        ts: u64,
    ) -> Self {
        let mut event = Self::base(ExecEventKind::Error, execution_id, message, ts).counts(
            completed,
            total,
            running_progress(completed, total),
        );
        event.error_code = code.map(str::to_string);
        event.success = Some(false);
        event
    }

    pub fn cancel_requested(execution_id: &str, ts: u64) -> Self {
        Self::base(ExecEventKind::CancelRequested, execution_id, "Cancel requested", ts)
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ExecEventKind::Done | ExecEventKind::Error)
    }
}
