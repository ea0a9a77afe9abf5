//! Progress reporting for long-running tasks.

use derive_more::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// How a progress report ended.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProgressState {
    #[display("completed")]
    Completed,
    #[display("failed")]
    Failed,
}

/// Receives progress events, e.g. to persist them for an API to poll.
pub trait ProgressSink: Send + Sync {
    fn opened(&self, code: &'static str, message: &'static str);
    fn incremented(&self, code: &'static str, done: u64);
    fn closed(&self, code: &'static str, done: u64, state: ProgressState);
}

/// Logs progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn opened(&self, code: &'static str, message: &'static str) {
        debug!(code, message, "progress opened");
    }

    fn incremented(&self, code: &'static str, done: u64) {
        debug!(code, done, "progress");
    }

    fn closed(&self, code: &'static str, done: u64, state: ProgressState) {
        match state {
            ProgressState::Completed => info!(code, done, "progress completed"),
            ProgressState::Failed => warn!(code, done, "progress failed"),
        }
    }
}

/// A named counter that is closed exactly once.
///
/// Dropping a report that was never closed closes it as
/// [`Failed`](ProgressState::Failed), so an early return through `?` never
/// leaves a report open.
pub struct ProgressReport {
    code: &'static str,
    done: AtomicU64,
    closed: AtomicBool,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReport {
    pub fn open(sink: Arc<dyn ProgressSink>, code: &'static str, message: &'static str) -> Self {
        sink.opened(code, message);
        Self {
            code,
            done: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            sink,
        }
    }

    /// Count one more unit; returns the new total.
    pub fn increment(&self) -> u64 {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.sink.incremented(self.code, done);
        done
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Close the report. Only the first call has any effect.
    pub fn close(&self, state: ProgressState) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.sink.closed(self.code, self.done(), state);
        }
    }
}

impl Drop for ProgressReport {
    fn drop(&mut self) {
        self.close(ProgressState::Failed);
    }
}

/// Sink that remembers every event, for assertions in tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub events: std::sync::Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProgressEvent {
    Opened(&'static str, &'static str),
    Incremented(&'static str, u64),
    Closed(&'static str, u64, ProgressState),
}

#[cfg(test)]
impl RecordingSink {
    pub fn closes(&self) -> Vec<(&'static str, u64, ProgressState)> {
        let events = self.events.lock().unwrap();
        events
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Closed(code, done, state) => Some((*code, *done, *state)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl ProgressSink for RecordingSink {
    fn opened(&self, code: &'static str, message: &'static str) {
        self.events.lock().unwrap().push(ProgressEvent::Opened(code, message));
    }

    fn incremented(&self, code: &'static str, done: u64) {
        self.events.lock().unwrap().push(ProgressEvent::Incremented(code, done));
    }

    fn closed(&self, code: &'static str, done: u64, state: ProgressState) {
        self.events.lock().unwrap().push(ProgressEvent::Closed(code, done, state));
    }
}
