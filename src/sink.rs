// src/sink.rs
//
// Append-capable destinations for captured lines. Every write lands the line
// and its terminator on the destination and flushes before returning, so a
// crash after line i never loses lines 1..i.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Whether a fresh capture file starts empty or extends existing content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Truncate,
    Append,
}

/// An append-capable line destination with per-line durability.
pub trait LineSink: Send {
    /// Append one record plus its line terminator and flush it through.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Release the sink. Further writes fail. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// File-backed sink. Lines are written unbuffered and flushed per record.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>, mode: WriteMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        options.create(true).write(true);
        match mode {
            WriteMode::Truncate => options.truncate(true),
            WriteMode::Append => options.append(true),
        };
        let file = options
            .open(&path)
            .map_err(|e| Error::Sink(format!("failed to open {}: {}", path.display(), e)))?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LineSink for FileSink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Sink(format!("{} is closed", self.path.display())))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush())
            .map_err(|e| Error::Sink(format!("write failed on {}: {}", self.path.display(), e)))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|e| Error::Sink(format!("sync failed on {}: {}", self.path.display(), e)))?;
        }
        Ok(())
    }
}
