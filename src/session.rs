// src/session.rs
//
// Top-level owner of the serial link. Grants either a command exchange or a
// capture session exclusive use of the link, with no queueing: the loser of
// the race observes Busy. Guarantees the port is released on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capture::{
    run_capture_blocking, CaptureHandle, CaptureOptions, CaptureState, CaptureStatus,
};
use crate::command::{exchange, CommandReply, CommandRequest};
use crate::connection::{DeviceLink, SerialConfig, SerialConnection};
use crate::error::{Error, Result};
use crate::sink::LineSink;

/// Bookkeeping for the one capture session that may be in flight.
struct ActiveCapture {
    cancel_flag: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Owns one device link and arbitrates exclusive access to it.
///
/// The link lives in a slot shared with the capture worker: whoever holds the
/// boxed link out of the slot is the link's single user, and an empty slot is
/// what the next caller observes as `Busy`.
pub struct SessionManager {
    link_slot: Arc<Mutex<Option<Box<dyn DeviceLink>>>>,
    active: Option<ActiveCapture>,
    shut_down: bool,
}

impl SessionManager {
    /// Open the configured serial device and construct a manager owning it.
    pub fn open_with_device(config: SerialConfig) -> Result<Self> {
        let mut connection = SerialConnection::new(config);
        connection.open()?;
        Ok(Self::with_link(Box::new(connection)))
    }

    /// Build a manager around an already-open link. Used with custom
    /// transports and with the scripted double in tests.
    pub fn with_link(link: Box<dyn DeviceLink>) -> Self {
        Self {
            link_slot: Arc::new(Mutex::new(Some(link))),
            active: None,
            shut_down: false,
        }
    }

    fn take_link(&mut self) -> Result<Box<dyn DeviceLink>> {
        if self.shut_down {
            return Err(Error::Connection("session manager is shut down".to_string()));
        }
        let mut slot = self
            .link_slot
            .lock()
            .map_err(|_| Error::Connection("link slot poisoned".to_string()))?;
        slot.take()
            .ok_or_else(|| Error::Busy("capture session is active".to_string()))
    }

    fn release_link(&self, link: Box<dyn DeviceLink>) {
        if let Ok(mut slot) = self.link_slot.lock() {
            *slot = Some(link);
        }
    }

    /// Perform one interactive command/reply exchange on the caller's thread.
    /// Fails with `Busy` while a capture session holds the link; the link is
    /// released again on success and on failure.
    pub fn run_command(&mut self, request: CommandRequest) -> Result<CommandReply> {
        let mut link = self.take_link()?;
        let result = exchange(link.as_mut(), request);
        self.release_link(link);
        result
    }

    /// Start a bounded capture of `options.target_lines` lines into `sink`,
    /// running on a blocking worker. Fails with `Busy` if the link is already
    /// held. Must be called from within a tokio runtime.
    pub async fn start_capture(
        &mut self,
        options: CaptureOptions,
        sink: Box<dyn LineSink>,
    ) -> Result<CaptureHandle> {
        if options.target_lines == 0 {
            return Err(Error::Config(
                "capture target line count must be positive".to_string(),
            ));
        }
        let link = self.take_link()?;

        let (status_tx, status_rx) = watch::channel(CaptureStatus {
            state: CaptureState::Idle,
            lines_written: 0,
            target_lines: options.target_lines,
        });
        let cancel_flag = Arc::new(AtomicBool::new(false));

        let worker_flag = Arc::clone(&cancel_flag);
        let worker_slot = Arc::clone(&self.link_slot);
        let task = tokio::task::spawn_blocking(move || {
            run_capture_blocking(link, sink, options, worker_flag, status_tx, worker_slot)
        });

        let handle = CaptureHandle::new(status_rx, Arc::clone(&cancel_flag));
        self.active = Some(ActiveCapture { cancel_flag, task });
        Ok(handle)
    }

    /// Cancel any running capture, wait for its terminal transition, and close
    /// the serial link. Never fails: teardown errors are logged and swallowed.
    /// Safe to call more than once; only the first call does the work.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Some(active) = self.active.take() {
            active.cancel_flag.store(true, Ordering::Relaxed);
            if let Err(e) = active.task.await {
                tlog!("[session] Capture worker failed during shutdown: {}", e);
            }
        }

        let link = self.link_slot.lock().ok().and_then(|mut slot| slot.take());
        match link {
            Some(mut link) => {
                if let Err(e) = link.close() {
                    tlog!("[session] Link close failed: {}", e);
                }
            }
            None => tlog!("[session] Link already released at shutdown"),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // Ask any still-running worker to stop; the link's OS handle is
        // released when the boxed connection drops.
        if let Some(active) = &self.active {
            active.cancel_flag.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{MemorySink, ScriptedDevice};
    use std::time::Duration;

    fn manager_for(device: &ScriptedDevice) -> SessionManager {
        SessionManager::with_link(Box::new(device.clone()))
    }

    #[test]
    fn test_command_reply_pairing() {
        let device = ScriptedDevice::with_lines(["23.4"]);
        let mut manager = manager_for(&device);

        let reply = manager
            .run_command(CommandRequest::new('t', true))
            .expect("temperature query");
        assert_eq!(reply.as_deref(), Some("23.4"));
        assert_eq!(device.writes(), vec![b't']);
    }

    #[test]
    fn test_command_without_reply_consumes_no_output() {
        let device = ScriptedDevice::with_lines(["pending"]);
        let mut manager = manager_for(&device);

        let reply = manager
            .run_command(CommandRequest::new('r', false))
            .expect("led command");
        assert_eq!(reply, None);
        assert_eq!(device.remaining(), 1);
    }

    #[test]
    fn test_command_timeout_releases_link() {
        let device = ScriptedDevice::default();
        let mut manager = manager_for(&device);

        let err = manager
            .run_command(CommandRequest::new('t', true))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        // the failed exchange released the link
        assert!(manager.run_command(CommandRequest::new('o', false)).is_ok());
    }

    #[tokio::test]
    async fn test_capture_completes_end_to_end() {
        let device = ScriptedDevice::with_lines(["1,2,3", "4,5,6", "7,8,9"]);
        let sink = MemorySink::new();
        let mut manager = manager_for(&device);

        let mut handle = manager
            .start_capture(CaptureOptions::new(3), Box::new(sink.clone()))
            .await
            .expect("start capture");
        let status = handle.wait().await;

        assert_eq!(status.state, CaptureState::Completed);
        assert_eq!(status.lines_written, 3);
        assert_eq!(
            sink.lines(),
            vec!["1,2,3".to_string(), "4,5,6".to_string(), "7,8,9".to_string()]
        );
        assert!(sink.is_closed());
        // the link is usable again once the capture settles
        assert!(manager.run_command(CommandRequest::new('g', false)).is_ok());
    }

    #[tokio::test]
    async fn test_exclusivity_while_capture_running() {
        let device = ScriptedDevice::repeating("0.1,0.2,0.3", Duration::from_millis(10));
        let sink = MemorySink::new();
        let mut manager = manager_for(&device);

        let mut handle = manager
            .start_capture(CaptureOptions::new(1_000), Box::new(sink.clone()))
            .await
            .expect("start capture");

        let snapshot = handle.status();
        assert!(!snapshot.state.is_terminal());
        assert_eq!(snapshot.target_lines, 1_000);

        let err = manager
            .run_command(CommandRequest::new('t', true))
            .unwrap_err();
        assert!(matches!(err, Error::Busy(_)));

        let err = manager
            .start_capture(CaptureOptions::new(5), Box::new(MemorySink::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy(_)));

        handle.cancel();
        let status = handle.wait().await;
        assert_eq!(status.state, CaptureState::Cancelled);
        assert!(sink.is_closed());

        // cancelled capture released the link for interactive use
        assert!(manager.run_command(CommandRequest::new('o', false)).is_ok());
    }

    #[tokio::test]
    async fn test_failed_capture_preserves_partial_output() {
        // two lines then silence: the third read times out
        let device = ScriptedDevice::with_lines(["a,b", "c,d"]);
        let sink = MemorySink::new();
        let mut manager = manager_for(&device);

        let mut handle = manager
            .start_capture(CaptureOptions::new(5), Box::new(sink.clone()))
            .await
            .expect("start capture");
        let status = handle.wait().await;

        assert!(matches!(status.state, CaptureState::Failed(_)));
        assert_eq!(status.lines_written, 2);
        assert_eq!(sink.lines(), vec!["a,b".to_string(), "c,d".to_string()]);
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_connection_error_fails_capture() {
        let device = ScriptedDevice::with_script(vec![
            crate::stub::ScriptedEntry::line("only"),
            crate::stub::ScriptedEntry::error(Error::Connection("device unplugged".to_string())),
        ]);
        let sink = MemorySink::new();
        let mut manager = manager_for(&device);

        let mut handle = manager
            .start_capture(CaptureOptions::new(4), Box::new(sink.clone()))
            .await
            .expect("start capture");
        let status = handle.wait().await;

        match status.state {
            CaptureState::Failed(reason) => assert!(reason.contains("device unplugged")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(sink.lines(), vec!["only".to_string()]);
    }

    #[tokio::test]
    async fn test_sink_failure_fails_capture() {
        let device = ScriptedDevice::with_lines(["kept", "rejected", "unused"]);
        let sink = MemorySink::failing_after(1);
        let mut manager = manager_for(&device);

        let mut handle = manager
            .start_capture(CaptureOptions::new(3), Box::new(sink.clone()))
            .await
            .expect("start capture");
        let status = handle.wait().await;

        match status.state {
            CaptureState::Failed(reason) => assert!(reason.contains("sink")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(status.lines_written, 1);
        assert_eq!(sink.lines(), vec!["kept".to_string()]);
    }

    #[tokio::test]
    async fn test_line_listener_observes_each_line() {
        let device = ScriptedDevice::with_lines(["one", "two"]);
        let seen: Arc<Mutex<Vec<(u64, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_by_listener = Arc::clone(&seen);
        let mut manager = manager_for(&device);

        let options = CaptureOptions::new(2).with_line_listener(move |count, line| {
            seen_by_listener
                .lock()
                .expect("listener lock")
                .push((count, line.to_string()));
        });
        let mut handle = manager
            .start_capture(options, Box::new(MemorySink::new()))
            .await
            .expect("start capture");
        let status = handle.wait().await;

        assert_eq!(status.state, CaptureState::Completed);
        assert_eq!(
            *seen.lock().expect("listener lock"),
            vec![(1, "one".to_string()), (2, "two".to_string())]
        );
    }

    #[tokio::test]
    async fn test_zero_line_capture_rejected() {
        let device = ScriptedDevice::default();
        let mut manager = manager_for(&device);
        let err = manager
            .start_capture(CaptureOptions::new(0), Box::new(MemorySink::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_capture_and_closes_link() {
        let device = ScriptedDevice::repeating("x", Duration::from_millis(5));
        let sink = MemorySink::new();
        let mut manager = manager_for(&device);

        let mut handle = manager
            .start_capture(CaptureOptions::new(1_000), Box::new(sink.clone()))
            .await
            .expect("start capture");
        manager.shutdown().await;

        let status = handle.wait().await;
        assert_eq!(status.state, CaptureState::Cancelled);
        assert!(sink.is_closed());
        assert!(device.is_closed());

        // shutdown is idempotent and the manager stays unusable
        manager.shutdown().await;
        let err = manager
            .run_command(CommandRequest::new('r', false))
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_shutdown_without_capture_closes_link() {
        let device = ScriptedDevice::default();
        let mut manager = manager_for(&device);
        manager.shutdown().await;
        assert!(device.is_closed());
    }
}
