use super::ExecResult;
use super::framing::{Frame, brace_group, nested_sh};
use super::reader::{LineBuffer, RING_CAPACITY, spawn_line_reader};
use crate::error::SessionError;
use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long stderr gets to show its begin marker once stdout has finished.
const STDERR_BEGIN_GRACE: Duration = Duration::from_millis(250);

/// One live elevated shell with drained stdout/stderr.
pub struct ShellSession {
    child: Child,
    stdin: Arc<Mutex<ChildStdin>>,
    stdout: Arc<LineBuffer>,
    stderr: Arc<LineBuffer>,
}

impl ShellSession {
    /// Spawn `argv` (e.g. `["su"]`) with piped stdio and start the readers.
    pub fn spawn(argv: &[String]) -> Result<Self, SessionError> {
        let (program, args) = argv.split_first().ok_or(SessionError::Unavailable)?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take().ok_or(SessionError::Unavailable)?;
        let out = child.stdout.take().ok_or(SessionError::Unavailable)?;
        let err = child.stderr.take().ok_or(SessionError::Unavailable)?;

        let stdout = Arc::new(LineBuffer::new(RING_CAPACITY));
        let stderr = Arc::new(LineBuffer::new(RING_CAPACITY));
        spawn_line_reader("hidscript-su-stdout", out, Arc::clone(&stdout))?;
        spawn_line_reader("hidscript-su-stderr", err, Arc::clone(&stderr))?;

        debug!(program = %program, pid = child.id(), "spawned privileged shell");
        Ok(Self {
            child,
            stdin: Arc::new(Mutex::new(stdin)),
            stdout,
            stderr,
        })
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Write one line without waiting for anything back.
    ///
    /// The pipe write can block when the shell is busy, so it runs on the
    /// blocking pool.
    pub async fn send_raw(&mut self, line: &str) -> Result<(), SessionError> {
        let mut bytes = line.as_bytes().to_vec();
        if !line.ends_with('\n') {
            bytes.push(b'\n');
        }
        let stdin = Arc::clone(&self.stdin);
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut stdin = stdin.lock().unwrap_or_else(|e| e.into_inner());
            stdin.write_all(&bytes)?;
            stdin.flush()
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(())
    }

    /// Run `script` in a nested `sh -c`.
    pub async fn exec_sh(&mut self, seq: u64, script: &str, timeout: Duration) -> ExecResult {
        self.exec_wrapped(seq, &nested_sh(script), timeout).await
    }

    /// Run `script` in the session shell itself, so fd changes persist.
    pub async fn exec_direct(&mut self, seq: u64, script: &str, timeout: Duration) -> ExecResult {
        self.exec_wrapped(seq, &brace_group(script), timeout).await
    }

    async fn exec_wrapped(&mut self, seq: u64, body: &str, timeout: Duration) -> ExecResult {
        let started = Instant::now();
        let deadline = started + timeout;
        let remaining = || deadline.saturating_duration_since(Instant::now());
        let frame = Frame::new(seq);

        if let Err(e) = self.send_raw(&frame.wrap(body)).await {
            warn!(error = %e, "failed to write request to privileged shell");
            return ExecResult::failure(-1, String::new(), e.to_string(), started.elapsed());
        }

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit_code = None;

        // Anything before our begin marker is noise, e.g. raw-write errors.
        loop {
            match self.stdout.next_line(remaining()).await {
                Some(line) if line == frame.begin => break,
                Some(_) => continue,
                None => return self.timed_out(timeout, started, stdout, stderr),
            }
        }
        loop {
            match self.stdout.next_line(remaining()).await {
                Some(line) if line == frame.end => break,
                Some(line) => match frame.parse_rc(&line) {
                    Some(code) => exit_code = Some(code),
                    None => {
                        stdout.push_str(&line);
                        stdout.push('\n');
                    }
                },
                None => return self.timed_out(timeout, started, stdout, stderr),
            }
        }

        let grace_end = Instant::now() + STDERR_BEGIN_GRACE;
        let mut saw_begin = false;
        while Instant::now() < grace_end {
            match self.stderr.next_line(Duration::from_millis(50)).await {
                Some(line) if line == frame.begin => {
                    saw_begin = true;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        if saw_begin {
            while let Some(line) = self.stderr.next_line(remaining()).await {
                if line == frame.end {
                    break;
                }
                stderr.push_str(&line);
                stderr.push('\n');
            }
        }

        let exit_code = exit_code.unwrap_or(-1);
        if !stdout.trim().is_empty() {
            debug!(target: "hidscript::root::out", "{}", stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            debug!(target: "hidscript::root::err", "{}", stderr.trim_end());
        }
        ExecResult::finished(exit_code, stdout, stderr, started.elapsed())
    }

    fn timed_out(&self, timeout: Duration, started: Instant, stdout: String, stderr: String) -> ExecResult {
        warn!(?timeout, "privileged session request timed out");
        ExecResult::timeout(timeout, stdout, stderr, started.elapsed())
    }

    /// Close stdin and kill the child.
    pub fn close(mut self) {
        drop(self.stdin);
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "privileged shell already exited");
        }
        if let Err(e) = self.child.wait() {
            debug!(error = %e, "failed to reap privileged shell");
        }
    }
}
