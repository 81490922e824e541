// src/logging.rs
//
// Diagnostic logging: timestamped lines to stderr and, optionally, to a log
// file. This is separate from the frame log shown in the console.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// When false, `tlog!` only writes to the log file. Cleared by `--quiet` so
/// diagnostics do not interleave with the interactive console.
pub(crate) static LOG_STDERR: AtomicBool = AtomicBool::new(true);

pub(crate) fn set_stderr_logging(enabled: bool) {
    LOG_STDERR.store(enabled, Ordering::Relaxed);
}

/// Initialise file logging to the given directory.
/// Creates a timestamped log file and a `canviewer.log` symlink (Unix only).
pub(crate) fn init_file_logging(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-canviewer.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    #[cfg(unix)]
    {
        let symlink_path = log_dir.join("canviewer.log");
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} [logging] Failed to create canviewer.log symlink: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                e
            );
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // tlog! would lock LOG_FILE again
    if LOG_STDERR.load(Ordering::Relaxed) {
        eprintln!(
            "{} [logging] File logging started: {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            log_path.display()
        );
    }

    Ok(())
}

/// Stop file logging and close the log file.
pub(crate) fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.take().is_some() && LOG_STDERR.load(Ordering::Relaxed) {
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
        if $crate::logging::LOG_STDERR.load(std::sync::atomic::Ordering::Relaxed) {
            eprintln!("{}", msg);
        }
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
    fn test_file_logging_writes_to_timestamped_file() {
        let dir = std::env::temp_dir().join(format!("canviewer-log-{}", std::process::id()));
        init_file_logging(&dir).unwrap();
        tlog!("[test] hello from the log test");
        stop_file_logging();

        let logs: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with("-canviewer.log"))
            .collect();
        assert_eq!(logs.len(), 1);

        let contents = std::fs::read_to_string(dir.join(&logs[0])).unwrap();
        assert!(contents.contains("hello from the log test"));

        #[cfg(unix)]
        assert!(dir.join("canviewer.log").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
