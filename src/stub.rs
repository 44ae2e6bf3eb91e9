// src/stub.rs
//
// Scripted in-memory doubles for the device link and the capture sink.
// Handles are shared-state clones: tests hand one clone to the session
// manager and keep another to observe writes, captured lines, and the
// closed flag afterwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connection::DeviceLink;
use crate::error::{Error, Result};
use crate::sink::LineSink;

/// One scripted read result, optionally delivered after a delay.
pub struct ScriptedEntry {
    response: Result<String>,
    delay: Option<Duration>,
}

impl ScriptedEntry {
    pub fn line(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
            delay: None,
        }
    }

    pub fn line_after(text: &str, delay: Duration) -> Self {
        Self {
            response: Ok(text.to_string()),
            delay: Some(delay),
        }
    }

    pub fn error(err: Error) -> Self {
        Self {
            response: Err(err),
            delay: None,
        }
    }
}

#[derive(Default)]
struct ScriptedState {
    script: VecDeque<ScriptedEntry>,
    /// Line repeated forever once the script drains, with a delivery interval.
    repeat: Option<(String, Duration)>,
    writes: Vec<u8>,
    closed: bool,
}

/// Scripted device link. Reads pop the script in order; once the script is
/// exhausted the device either repeats a configured line or times out.
#[derive(Clone, Default)]
pub struct ScriptedDevice {
    inner: Arc<Mutex<ScriptedState>>,
}

impl ScriptedDevice {
    pub fn with_lines<'a, I: IntoIterator<Item = &'a str>>(lines: I) -> Self {
        Self::with_script(lines.into_iter().map(ScriptedEntry::line).collect())
    }

    pub fn with_script(script: Vec<ScriptedEntry>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptedState {
                script: script.into(),
                ..Default::default()
            })),
        }
    }

    /// A device that emits `line` every `interval`, forever. Useful for
    /// keeping a capture in `Running` while a test interleaves other calls.
    pub fn repeating(line: &str, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptedState {
                repeat: Some((line.to_string(), interval)),
                ..Default::default()
            })),
        }
    }

    /// Bytes written to the device so far.
    pub fn writes(&self) -> Vec<u8> {
        self.inner.lock().expect("stub lock").writes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("stub lock").closed
    }

    /// Scripted entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.inner.lock().expect("stub lock").script.len()
    }
}

impl DeviceLink for ScriptedDevice {
    fn read_line(&mut self, buf: &mut String) -> Result<usize> {
        let entry = {
            let mut state = self.inner.lock().expect("stub lock");
            if state.closed {
                return Err(Error::Connection("link is closed".to_string()));
            }
            state.script.pop_front()
        };
        match entry {
            Some(entry) => {
                if let Some(delay) = entry.delay {
                    std::thread::sleep(delay);
                }
                let line = entry.response?;
                buf.clear();
                buf.push_str(&line);
                Ok(buf.len())
            }
            None => {
                let repeat = self.inner.lock().expect("stub lock").repeat.clone();
                match repeat {
                    Some((line, interval)) => {
                        std::thread::sleep(interval);
                        buf.clear();
                        buf.push_str(&line);
                        Ok(buf.len())
                    }
                    None => Err(Error::Timeout(Duration::ZERO)),
                }
            }
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        let mut state = self.inner.lock().expect("stub lock");
        if state.closed {
            return Err(Error::Connection("link is closed".to_string()));
        }
        state.writes.push(byte);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.lock().expect("stub lock").closed = true;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    lines: Vec<String>,
    closed: bool,
    fail_after: Option<usize>,
}

/// In-memory line sink. Clones share the captured lines and closed flag.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose writes start failing once `n` lines have been accepted.
    pub fn failing_after(n: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryState {
                fail_after: Some(n),
                ..Default::default()
            })),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.inner.lock().expect("stub lock").lines.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("stub lock").closed
    }
}

impl LineSink for MemorySink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let mut state = self.inner.lock().expect("stub lock");
        if state.closed {
            return Err(Error::Sink("sink is closed".to_string()));
        }
        if let Some(limit) = state.fail_after {
            if state.lines.len() >= limit {
                return Err(Error::Sink("scripted sink failure".to_string()));
            }
        }
        state.lines.push(line.to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.lock().expect("stub lock").closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_device_pops_in_order() {
        let device = ScriptedDevice::with_lines(["one", "two"]);
        let mut link = device.clone();
        let mut buf = String::new();
        link.read_line(&mut buf).unwrap();
        assert_eq!(buf, "one");
        link.read_line(&mut buf).unwrap();
        assert_eq!(buf, "two");
        assert!(matches!(
            link.read_line(&mut buf),
            Err(Error::Timeout(_))
        ));
        assert_eq!(device.remaining(), 0);
    }

    #[test]
    fn test_scripted_delay_respected() {
        let device = ScriptedDevice::with_script(vec![ScriptedEntry::line_after(
            "later",
            Duration::from_millis(5),
        )]);
        let mut link = device.clone();
        let mut buf = String::new();
        let start = std::time::Instant::now();
        link.read_line(&mut buf).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(5));
        assert_eq!(buf, "later");
    }

    #[test]
    fn test_memory_sink_failure_threshold() {
        let sink = MemorySink::failing_after(1);
        let mut writer = sink.clone();
        writer.write_line("kept").unwrap();
        assert!(matches!(writer.write_line("dropped"), Err(Error::Sink(_))));
        assert_eq!(sink.lines(), vec!["kept".to_string()]);
    }
}
