// src/connection.rs
//
// Serial link ownership: open/close lifecycle, blocking line reads and
// single-byte writes against a serialport handle, plus port enumeration.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{Error, Result};

/// Default baud rate for interactive device mode.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default line-read deadline. Unbounded reads require an explicit
/// `read_timeout: None`.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll timeout on the underlying OS handle. Short enough that deadlines are
/// observed promptly without burning CPU between bytes.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Connection parameters for one serial device.
#[derive(Clone, Debug)]
pub struct SerialConfig {
    /// Platform port path or identifier (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port: String,
    pub baud_rate: u32,
    /// Deadline for one full line read. `None` waits forever; opting out of a
    /// deadline is an intentional configuration, never a fallback.
    pub read_timeout: Option<Duration>,
}

impl SerialConfig {
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

/// Line-oriented device endpoint. Implemented by the real serial connection
/// and by the scripted double in `stub`.
pub trait DeviceLink: Send {
    /// Block until one newline-terminated line arrives, the configured
    /// deadline elapses, or the link fails. The line lands in `buf` with the
    /// terminator (and any trailing `\r`) stripped; returns its length.
    fn read_line(&mut self, buf: &mut String) -> Result<usize>;

    /// Transmit a single byte.
    fn write_byte(&mut self, byte: u8) -> Result<()>;

    /// Release the underlying handle. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// One physical serial link. Created configured-but-closed; `open` acquires
/// the OS handle, `close` releases it, and reopening after close is allowed.
pub struct SerialConnection {
    config: SerialConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialConnection {
    pub fn new(config: SerialConfig) -> Self {
        Self { config, port: None }
    }

    /// Acquire the OS handle for the configured port. Fails if the port does
    /// not exist, is held elsewhere, or this connection is already open.
    pub fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Err(Error::Connection(format!(
                "{} is already open",
                self.config.port
            )));
        }
        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(POLL_TIMEOUT)
            .open()
            .map_err(|e| {
                Error::Connection(format!("failed to open {}: {}", self.config.port, e))
            })?;
        self.port = Some(port);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl DeviceLink for SerialConnection {
    fn read_line(&mut self, buf: &mut String) -> Result<usize> {
        buf.clear();
        let deadline = self.config.read_timeout.map(|t| (Instant::now() + t, t));
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::Connection("link is not open".to_string()))?;

        let mut bytes: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match port.read(&mut byte) {
                Ok(1) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    bytes.push(byte[0]);
                }
                Ok(0) => {
                    // EOF: the device side went away
                    return Err(Error::Connection(format!(
                        "{} disconnected",
                        self.config.port
                    )));
                }
                Ok(_) => unreachable!(),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    if let Some((deadline, limit)) = deadline {
                        if Instant::now() >= deadline {
                            return Err(Error::Timeout(limit));
                        }
                    }
                }
                Err(e) => {
                    return Err(Error::Connection(format!(
                        "read failed on {}: {}",
                        self.config.port, e
                    )));
                }
            }
        }

        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        buf.push_str(&String::from_utf8_lossy(&bytes));
        Ok(buf.len())
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::Connection("link is not open".to_string()))?;
        port.write_all(&[byte])
            .and_then(|_| port.flush())
            .map_err(|e| {
                Error::Connection(format!("write failed on {}: {}", self.config.port, e))
            })
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the boxed port releases the OS handle; repeated calls are no-ops.
        self.port = None;
        Ok(())
    }
}

/// Information about an available serial port.
#[derive(Clone, Debug, Serialize)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

/// List available serial ports.
///
/// On macOS, filters out `/dev/tty.*` devices and only shows `/dev/cu.*`
/// devices. The cu (calling unit) devices are non-blocking and preferred for
/// outgoing connections; the tty devices block on open waiting for carrier
/// detect.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()
        .map_err(|e| Error::Connection(format!("failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => {
                    ("PCI".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None, None)
                }
            };
            PortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.read_timeout, Some(DEFAULT_READ_TIMEOUT));
        assert_eq!(config.port, "/dev/ttyUSB0");
    }

    #[test]
    fn test_config_builder() {
        let config = SerialConfig::new("/dev/ttyACM0")
            .with_baud_rate(56_000)
            .with_read_timeout(None);
        assert_eq!(config.baud_rate, 56_000);
        assert_eq!(config.read_timeout, None);
    }

    #[test]
    fn test_closed_connection_rejects_io() {
        let mut conn = SerialConnection::new(SerialConfig::new("/dev/null-port"));
        let mut buf = String::new();
        assert!(matches!(
            conn.read_line(&mut buf),
            Err(Error::Connection(_))
        ));
        assert!(matches!(conn.write_byte(b'r'), Err(Error::Connection(_))));
        // close before open is a no-op
        assert!(conn.close().is_ok());
        assert!(!conn.is_open());
    }
}
