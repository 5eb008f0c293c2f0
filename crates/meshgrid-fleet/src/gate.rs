//! Readiness gate: a one-shot latch over racing output sources.
//!
//! One listener task per source feeds lines into a shared observer. The
//! first accepted line fires the latch; after that every listener stops
//! without looking at further lines, so a sentinel arriving on two pipes
//! in the same tick still resolves the gate exactly once.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::observer::{LineObserver, LineSource};

#[derive(Debug, Error, PartialEq)]
pub enum ReadinessError {
    #[error("every output source closed before the sentinel appeared")]
    SourcesClosed,
}

struct Latch {
    observer: Box<dyn LineObserver>,
    tx: Option<oneshot::Sender<usize>>,
}

/// Waits for the first line accepted by an observer.
pub struct ReadinessGate {
    rx: oneshot::Receiver<usize>,
    listeners: Vec<JoinHandle<()>>,
}

impl ReadinessGate {
    /// Start listening on `sources`.
    pub fn bind(observer: Box<dyn LineObserver>, sources: Vec<LineSource>) -> Self {
        let (tx, rx) = oneshot::channel();
        let latch = Arc::new(Mutex::new(Latch {
            observer,
            tx: Some(tx),
        }));

        let listeners = sources
            .into_iter()
            .enumerate()
            .map(|(index, mut source)| {
                let latch = Arc::clone(&latch);
                tokio::spawn(async move {
                    while let Some(line) = source.next_line().await {
                        let mut state = latch.lock().unwrap_or_else(|e| e.into_inner());
                        if state.tx.is_none() {
                            return;
                        }
                        if state.observer.accept(&line) {
                            trace!(source = index, %line, "gate resolved");
                            if let Some(tx) = state.tx.take() {
                                let _ = tx.send(index);
                            }
                            return;
                        }
                    }
                })
            })
            .collect();

        Self { rx, listeners }
    }

    /// Wait until the gate resolves. Returns the index of the source
    /// that carried the accepted line.
    ///
    /// There is no timeout; wrap the call if one is needed.
    pub async fn wait(mut self) -> Result<usize, ReadinessError> {
        let outcome = (&mut self.rx).await;
        self.detach();
        outcome.map_err(|_| ReadinessError::SourcesClosed)
    }

    fn detach(&mut self) {
        for handle in self.listeners.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for ReadinessGate {
    fn drop(&mut self) {
        self.detach();
    }
}
