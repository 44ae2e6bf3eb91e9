// src/capture.rs
//
// Bounded line-capture session: read N lines from the device link, landing
// each one durably on the sink before the next read begins. The loop runs on
// a blocking worker so the interactive control path stays responsive, and
// reports progress and its terminal state through a watch channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;

use crate::connection::DeviceLink;
use crate::sink::LineSink;

/// Capture session state machine. Terminal states never transition further;
/// a fresh session is required to capture again.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum CaptureState {
    Idle,
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl CaptureState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CaptureState::Idle | CaptureState::Running)
    }
}

/// Snapshot of a capture session's progress.
#[derive(Clone, Debug, Serialize)]
pub struct CaptureStatus {
    pub state: CaptureState,
    /// Lines durably written so far. Never exceeds `target_lines`, and equals
    /// it exactly when the state is `Completed`.
    pub lines_written: u64,
    pub target_lines: u64,
}

/// Parameters for one capture run.
pub struct CaptureOptions {
    pub target_lines: u64,
    /// Observer invoked after each line is durably written, with the running
    /// line count and the line content.
    pub line_listener: Option<Box<dyn FnMut(u64, &str) + Send>>,
}

impl CaptureOptions {
    pub fn new(target_lines: u64) -> Self {
        Self {
            target_lines,
            line_listener: None,
        }
    }

    pub fn with_line_listener(mut self, listener: impl FnMut(u64, &str) + Send + 'static) -> Self {
        self.line_listener = Some(Box::new(listener));
        self
    }
}

/// Requests cancellation of a running capture. Cheap to clone out of a
/// `CaptureHandle` so another task (a Ctrl-C handler, a UI button) can stop
/// the session while the owner awaits it.
#[derive(Clone)]
pub struct CancelHandle {
    cancel_flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }
}

/// Handle to a running capture session: poll status, request cancellation,
/// or wait for the terminal transition.
#[derive(Debug)]
pub struct CaptureHandle {
    status_rx: watch::Receiver<CaptureStatus>,
    cancel_flag: Arc<AtomicBool>,
}

impl CaptureHandle {
    pub(crate) fn new(
        status_rx: watch::Receiver<CaptureStatus>,
        cancel_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            status_rx,
            cancel_flag,
        }
    }

    /// Current progress snapshot.
    pub fn status(&self) -> CaptureStatus {
        self.status_rx.borrow().clone()
    }

    /// Request cancellation. The worker observes the request at its next loop
    /// iteration boundary, after at most one in-flight read settles.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    pub fn canceller(&self) -> CancelHandle {
        CancelHandle {
            cancel_flag: Arc::clone(&self.cancel_flag),
        }
    }

    /// Wait until the session reaches a terminal state and return it.
    pub async fn wait(&mut self) -> CaptureStatus {
        loop {
            let snapshot = self.status_rx.borrow().clone();
            if snapshot.state.is_terminal() {
                return snapshot;
            }
            if self.status_rx.changed().await.is_err() {
                // worker gone; whatever it last published is final
                return self.status_rx.borrow().clone();
            }
        }
    }
}

/// The capture worker loop. Runs on a blocking task; on every terminal
/// transition the sink is closed and the link is handed back to the manager's
/// slot before the terminal status is published.
pub(crate) fn run_capture_blocking(
    mut link: Box<dyn DeviceLink>,
    mut sink: Box<dyn LineSink>,
    mut options: CaptureOptions,
    cancel_flag: Arc<AtomicBool>,
    status_tx: watch::Sender<CaptureStatus>,
    link_slot: Arc<Mutex<Option<Box<dyn DeviceLink>>>>,
) {
    let target = options.target_lines;
    let publish = |state: CaptureState, lines_written: u64| {
        let _ = status_tx.send(CaptureStatus {
            state,
            lines_written,
            target_lines: target,
        });
    };

    publish(CaptureState::Running, 0);
    tlog!("[capture] Starting: {} line(s) requested", target);

    let mut lines_written: u64 = 0;
    let mut line = String::new();
    let outcome = loop {
        if cancel_flag.load(Ordering::Relaxed) {
            break CaptureState::Cancelled;
        }
        if lines_written == target {
            break CaptureState::Completed;
        }
        if let Err(e) = link.read_line(&mut line) {
            break CaptureState::Failed(e.to_string());
        }
        if let Err(e) = sink.write_line(&line) {
            break CaptureState::Failed(e.to_string());
        }
        lines_written += 1;
        if let Some(listener) = options.line_listener.as_mut() {
            listener(lines_written, &line);
        }
        publish(CaptureState::Running, lines_written);
    };

    if let Err(e) = sink.close() {
        tlog!("[capture] Sink close failed: {}", e);
    }
    // Hand the link back before publishing the terminal state so a waiter
    // that sees the transition can immediately run a command.
    if let Ok(mut slot) = link_slot.lock() {
        *slot = Some(link);
    } else {
        tlog!("[capture] Link slot poisoned; dropping connection");
    }

    tlog!(
        "[capture] Ended: {:?} ({}/{} line(s) written)",
        outcome,
        lines_written,
        target
    );
    publish(outcome, lines_written);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!CaptureState::Idle.is_terminal());
        assert!(!CaptureState::Running.is_terminal());
        assert!(CaptureState::Completed.is_terminal());
        assert!(CaptureState::Failed("boom".to_string()).is_terminal());
        assert!(CaptureState::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serializes_with_state_tag() {
        let status = CaptureStatus {
            state: CaptureState::Failed("device gone".to_string()),
            lines_written: 2,
            target_lines: 5,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"type\":\"Failed\""));
        assert!(json.contains("\"lines_written\":2"));
    }
}
