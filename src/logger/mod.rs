//! Structured leveled logger: timestamped `[SSG]` lines to stderr or a file.
//!
//! The logger is injected at pipeline construction, never discovered
//! statically. Write failures degrade (file, then stderr, then discard) and
//! never abort a run.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::LoggingConfig;

/// Log severity, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

enum Sink {
    Stderr,
    File(File),
    Discard,
}

/// Concurrent-safe leveled logger. Cheap to clone; clones share the sink.
#[derive(Clone)]
pub struct Logger {
    min_level: Level,
    sink: Arc<Mutex<Sink>>,
}

impl Logger {
    /// Build a logger from the `logging` config section. An unopenable file
    /// destination degrades to stderr with a warning rather than failing.
    pub fn from_config(cfg: &LoggingConfig) -> Self {
        let min_level = Level::parse(&cfg.level).unwrap_or(Level::Info);
        let sink = if cfg.output == "stderr" || cfg.output.is_empty() {
            Sink::Stderr
        } else {
            match open_append(Path::new(&cfg.output)) {
                Ok(file) => Sink::File(file),
                Err(err) => {
                    let _ = writeln!(
                        io::stderr(),
                        "[SSG] WARN cannot open log output {:?}, using stderr: {err}",
                        cfg.output
                    );
                    Sink::Stderr
                }
            }
        };
        Self {
            min_level,
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Stderr logger at the given level (tests, early startup).
    pub fn stderr(min_level: Level) -> Self {
        Self {
            min_level,
            sink: Arc::new(Mutex::new(Sink::Stderr)),
        }
    }

    pub fn debug(&self, msg: &str) {
        self.log(Level::Debug, msg);
    }

    pub fn info(&self, msg: &str) {
        self.log(Level::Info, msg);
    }

    pub fn warn(&self, msg: &str) {
        self.log(Level::Warn, msg);
    }

    pub fn error(&self, msg: &str) {
        self.log(Level::Error, msg);
    }

    pub fn log(&self, level: Level, msg: &str) {
        if level < self.min_level {
            return;
        }
        let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let line = format!("[SSG] {ts} {} {msg}\n", level.label());

        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::Stderr => {
                let _ = io::stderr().write_all(line.as_bytes());
            }
            Sink::File(file) => {
                if file.write_all(line.as_bytes()).is_err() {
                    // File destination failed mid-run; fall back to stderr.
                    let _ = io::stderr().write_all(line.as_bytes());
                    *sink = Sink::Stderr;
                }
            }
            Sink::Discard => {}
        }
    }

    /// Flush the underlying sink (file destinations only).
    pub fn flush(&self) {
        if let Sink::File(file) = &mut *self.sink.lock() {
            let _ = file.flush();
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_filters() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(Level::parse("DEBUG"), Some(Level::Debug));
        assert_eq!(Level::parse("warn"), Some(Level::Warn));
        assert_eq!(Level::parse("chatty"), None);
    }

    #[test]
    fn writes_to_file_destination() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sage.log");
        let logger = Logger::from_config(&LoggingConfig {
            level: "info".to_string(),
            output: out.to_string_lossy().into_owned(),
        });

        logger.info("hello from test");
        logger.debug("below threshold, dropped");
        logger.flush();

        let contents = std::fs::read_to_string(&out).unwrap();
        assert!(contents.contains("INFO hello from test"));
        assert!(!contents.contains("below threshold"));
    }

    #[test]
    fn file_lines_carry_prefix_and_level() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sage.log");
        let logger = Logger::from_config(&LoggingConfig {
            level: "debug".to_string(),
            output: out.to_string_lossy().into_owned(),
        });
        logger.error("boom");
        logger.flush();

        let contents = std::fs::read_to_string(&out).unwrap();
        let line = contents.lines().next().unwrap();
        assert!(line.starts_with("[SSG] "));
        assert!(line.contains(" ERROR boom"));
    }

    #[test]
    fn unopenable_output_degrades_to_stderr() {
        let logger = Logger::from_config(&LoggingConfig {
            level: "info".to_string(),
            output: "/proc/definitely/not/writable/sage.log".to_string(),
        });
        // Must not panic.
        logger.info("still alive");
    }

    #[test]
    fn clones_share_a_sink() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("shared.log");
        let logger = Logger::from_config(&LoggingConfig {
            level: "info".to_string(),
            output: out.to_string_lossy().into_owned(),
        });
        let clone = logger.clone();
        logger.info("one");
        clone.info("two");
        logger.flush();

        let contents = std::fs::read_to_string(&out).unwrap();
        assert!(contents.contains("one"));
        assert!(contents.contains("two"));
    }
}
