//! Background line readers for the session's output streams.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Lines kept per stream before the oldest are dropped.
pub const RING_CAPACITY: usize = 4000;

/// Bounded FIFO of lines fed by a reader thread.
#[derive(Debug)]
pub struct LineBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl LineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.clamp(16, 1024))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, line: String) {
        {
            let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
            if lines.len() >= self.capacity {
                lines.pop_front();
            }
            lines.push_back(line);
        }
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark end of stream; waiters stop once the buffer drains.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next line, waiting at most `timeout`. `None` on timeout or end of stream.
    pub async fn next_line(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.pop() {
                return Some(line);
            }
            if self.is_closed() {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if tokio::time::timeout(remaining, self.notify.notified()).await.is_err() {
                return self.pop();
            }
        }
    }
}

/// Spawn a thread that moves every line of `stream` into `buffer`.
///
/// Lines are read as raw bytes; invalid UTF-8 is replaced, not fatal.
pub fn spawn_line_reader<R: Read + Send + 'static>(
    name: &str,
    stream: R,
    buffer: Arc<LineBuffer>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut raw = Vec::with_capacity(256);
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw);
                    buffer.push(line.trim_end_matches(['\n', '\r']).to_string());
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        buffer.close();
    })
}
