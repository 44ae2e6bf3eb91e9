// src/lib.rs
//
// Serial device session management: one-shot single-character command/reply
// exchanges and durable bounded line captures against a microcontroller-class
// device, arbitrated so that at most one operation uses the link at a time.
//
// The `SessionManager` owns the link. Interactive exchanges run synchronously
// on the caller's thread; captures run on a blocking worker that lands every
// line on its sink before reading the next one and reports progress through a
// watch channel. Cancellation and shutdown are first-class: a capture can be
// stopped at any loop boundary, and shutdown always leaves the OS handle
// released.

#[macro_use]
mod logging;

mod capture;
mod command;
mod connection;
mod error;
mod session;
mod settings;
mod sink;
pub mod stub;

pub use capture::{CancelHandle, CaptureHandle, CaptureOptions, CaptureState, CaptureStatus};
pub use command::{CommandReply, CommandRequest, CommandSet};
pub use connection::{
    list_ports, DeviceLink, PortInfo, SerialConfig, SerialConnection, DEFAULT_BAUD_RATE,
    DEFAULT_READ_TIMEOUT,
};
pub use error::{Error, Result};
pub use logging::{init_file_logging, stop_file_logging};
pub use session::SessionManager;
pub use settings::DeviceProfile;
pub use sink::{FileSink, LineSink, WriteMode};
