//! Log backend for the `log` facade.
//!
//! Every record is written as one timestamped line to stdout and appended to
//! `<data_dir>/logs/tracker.log`. The file is rotated once it grows past
//! `MAX_LOG_BYTES`, keeping `BACKUP_COUNT` older files.

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const LOG_FILE_NAME: &str = "tracker.log";
const MAX_LOG_BYTES: u64 = 1_000_000;
const BACKUP_COUNT: usize = 3;

/// Setting this variable (to anything) switches the log level to debug.
const DEBUG_ENV: &str = "PTCG_DEBUG";

pub struct FileLogger {
    level: LevelFilter,
    path: PathBuf,
    /// Serializes append + rotate so lines from different threads never interleave.
    write_lock: Mutex<()>,
}

impl FileLogger {
    pub fn new(path: PathBuf, level: LevelFilter) -> Self {
        Self {
            level,
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn append(&self, line: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        rotate_if_needed(&self.path, MAX_LOG_BYTES, BACKUP_COUNT);
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            let _ = file.write_all(line.as_bytes());
        }
    }
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), record.target(), &record.args().to_string());
        write_console(&mut io::stdout().lock(), &line);
        self.append(&line);
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

/// Writes a line to the console. Errors from a closed or broken stdout are dropped.
fn write_console(out: &mut dyn Write, line: &str) {
    let _ = out.write_all(line.as_bytes());
}

/// Formats one log line: `[HH:MM:SS.mmm] LEVEL target: message\n`.
fn format_line(level: Level, target: &str, message: &str) -> String {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    format!("[{}] {:<5} {}: {}\n", timestamp, level, target, message)
}

/// Shifts `tracker.log` → `.1` → `.2` ... when the active file reaches `max_bytes`.
/// The oldest backup beyond `backups` is dropped.
fn rotate_if_needed(path: &Path, max_bytes: u64, backups: usize) {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return,
    };
    if size < max_bytes {
        return;
    }

    let backup = |n: usize| -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    };

    let _ = fs::remove_file(backup(backups));
    for n in (1..backups).rev() {
        let from = backup(n);
        if from.exists() {
            let _ = fs::rename(&from, backup(n + 1));
        }
    }
    let _ = fs::rename(path, backup(1));
}

/// Installs the file logger as the global `log` backend.
///
/// Safe to call more than once; only the first call takes effect.
pub fn init_logging(logs_dir: &Path) {
    let level = if std::env::var_os(DEBUG_ENV).is_some() {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let logger = FileLogger::new(logs_dir.join(LOG_FILE_NAME), level);
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }
}

/// Routes panics into the log file so a crash on a background thread leaves a trace.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        log::error!("[PANIC]{} {}", location, msg);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_format_line_contains_level_and_target() {
        let line = format_line(Level::Warn, "tracker::polling", "window lost");
        assert!(line.starts_with('['));
        assert!(line.contains("WARN "));
        assert!(line.contains("tracker::polling: window lost"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_rotation_shifts_backups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);

        fs::write(&path, "current").unwrap();
        fs::write(dir.path().join("tracker.log.1"), "older").unwrap();

        rotate_if_needed(&path, 4, 3);

        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("tracker.log.1")).unwrap(),
            "current"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("tracker.log.2")).unwrap(),
            "older"
        );
    }

    #[test]
    fn test_rotation_skipped_below_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        fs::write(&path, "small").unwrap();

        rotate_if_needed(&path, 1_000, 3);

        assert!(path.exists());
        assert!(!dir.path().join("tracker.log.1").exists());
    }

    #[test]
    fn test_rotation_drops_oldest_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        fs::write(&path, "new").unwrap();
        fs::write(dir.path().join("tracker.log.1"), "b1").unwrap();
        fs::write(dir.path().join("tracker.log.2"), "b2").unwrap();

        rotate_if_needed(&path, 1, 2);

        assert_eq!(fs::read_to_string(dir.path().join("tracker.log.1")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dir.path().join("tracker.log.2")).unwrap(), "b1");
        assert!(!dir.path().join("tracker.log.3").exists());
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_console_write_ignores_broken_pipe() {
        let result = std::panic::catch_unwind(|| write_console(&mut BrokenPipe, "lost\n"));
        assert!(result.is_ok());

        let mut buf = Vec::new();
        write_console(&mut buf, "kept\n");
        assert_eq!(buf, b"kept\n");
    }

    #[test]
    fn test_file_logger_appends() {
        let dir = tempdir().unwrap();
        let logger = FileLogger::new(dir.path().join(LOG_FILE_NAME), LevelFilter::Info);
        logger.append("one\n");
        logger.append("two\n");
        let content = fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }
}
