// src/error.rs
//
// Error taxonomy for the session manager. Every failure surfaces as one of
// these variants, either synchronously (command exchanges) or as the terminal
// status of a capture handle. Nothing in the core retries automatically.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Port missing, already held, or lost mid-operation.
    #[error("connection error: {0}")]
    Connection(String),

    /// No complete line arrived within the configured read timeout.
    #[error("timed out after {0:?} waiting for device data")]
    Timeout(Duration),

    /// The link is already held by a command exchange or a capture session.
    /// Callers must wait for the current holder to finish or cancel it.
    #[error("device link is busy: {0}")]
    Busy(String),

    /// Writing or flushing the capture sink failed. Lines written before the
    /// failure remain on the sink.
    #[error("sink error: {0}")]
    Sink(String),

    /// Invalid profile or request configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
