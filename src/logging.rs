// src/logging.rs
//
// Timestamped stderr logging with an optional log file mirror.

use std::path::Path;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Initialise file logging to the given directory.
/// Creates a timestamped `*-linecap.log` file inside it.
pub fn init_file_logging(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| Error::Config(format!("failed to create log dir: {}", e)))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-linecap.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| Error::Config(format!("failed to create log file: {}", e)))?;

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // Use eprintln directly here since tlog! would try to lock LOG_FILE (which we just set)
    eprintln!(
        "{} [logging] File logging started: {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        log_path.display()
    );

    Ok(())
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.is_some() {
            *guard = None;
            eprintln!(
                "{} [logging] File logging stopped",
                chrono::Local::now().format("%H:%M:%S%.3f")
            );
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_stop_file_logging() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_file_logging(dir.path()).expect("init logging");
        tlog!("[test] hello from the log file");
        stop_file_logging();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read log dir")
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        let contents = std::fs::read_to_string(entries[0].path()).expect("read log");
        assert!(contents.contains("hello from the log file"));
    }
}
