//! Line observers and line sources.
//!
//! A [`LineSource`] yields the output lines of one process pipe. A
//! [`LineObserver`] decides when a stream of lines has shown what the
//! caller is waiting for: the ready sentinel of a starting node, or a
//! number of region hand-over lines after a removal.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

/// Decides when the lines seen so far satisfy a wait.
pub trait LineObserver: Send {
    /// Feed one line (without its terminator). Returns true once satisfied.
    fn accept(&mut self, line: &str) -> bool;

    /// True if the observer is satisfied before any line is fed.
    fn satisfied(&self) -> bool {
        false
    }
}

/// Satisfied by the first line containing a substring.
#[derive(Debug, Clone)]
pub struct SentinelMatch {
    sentinel: String,
}

impl SentinelMatch {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }
}

impl LineObserver for SentinelMatch {
    fn accept(&mut self, line: &str) -> bool {
        line.contains(&self.sentinel)
    }
}

/// Satisfied once `target` lines containing a substring have been seen.
///
/// Optionally counting starts only after a marker line, and lines echoing
/// the node prompt (containing `>`) are ignored.
#[derive(Debug, Clone)]
pub struct SentinelCount {
    sentinel: String,
    target: usize,
    seen: usize,
    marker: Option<String>,
    armed: bool,
    skip_echo: bool,
}

impl SentinelCount {
    pub fn new(sentinel: impl Into<String>, target: usize) -> Self {
        Self {
            sentinel: sentinel.into(),
            target,
            seen: 0,
            marker: None,
            armed: true,
            skip_echo: false,
        }
    }

    /// Only count lines that follow a line containing `marker`.
    pub fn after(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self.armed = false;
        self
    }

    /// Ignore lines containing `>`.
    pub fn skip_echo(mut self) -> Self {
        self.skip_echo = true;
        self
    }

    pub fn seen(&self) -> usize {
        self.seen
    }
}

impl LineObserver for SentinelCount {
    fn accept(&mut self, line: &str) -> bool {
        if !self.armed {
            if let Some(marker) = &self.marker {
                if line.contains(marker.as_str()) {
                    self.armed = true;
                }
            }
            return self.satisfied();
        }
        if self.skip_echo && line.contains('>') {
            return self.satisfied();
        }
        if line.contains(&self.sentinel) {
            self.seen += 1;
        }
        self.satisfied()
    }

    fn satisfied(&self) -> bool {
        self.armed && self.seen >= self.target
    }
}

/// Output lines of one process pipe.
///
/// Yields `None` once the pipe has closed and every buffered line has
/// been consumed.
#[derive(Debug)]
pub struct LineSource {
    rx: broadcast::Receiver<String>,
}

impl LineSource {
    pub fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx }
    }

    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(line) => return Some(line),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "line source lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
